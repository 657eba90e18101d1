// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Progressive per-chain streams.
//!
//! Each stream spawns one task per supported chain and yields a
//! self-contained result as soon as that chain completes, in completion
//! order. Consumers that stop reading cancel the remaining work: every task
//! races its work against the channel closing.

use tokio::sync::mpsc;

use crate::error::WalletError;

use super::chains::{self, SUPPORTED_CHAINS};
use super::{ChainAddress, MultiChainAggregator};

/// One per-chain item of a progressive stream.
#[derive(Debug)]
pub struct ChainYield<T> {
    pub chain: &'static str,
    pub result: Result<T, WalletError>,
}

impl MultiChainAggregator {
    /// Yield one derived address per supported chain, in completion order.
    /// A chain whose derivation fails yields `address: None`.
    pub fn stream_addresses(&self, user_id: &str) -> mpsc::Receiver<ChainAddress> {
        let (tx, rx) = mpsc::channel(SUPPORTED_CHAINS.len());
        let seed = self
            .inner
            .store
            .ensure_seed(user_id)
            .map_err(|e| WalletError::internal(format!("ensure seed: {e}")));
        if let Err(e) = seed {
            // Without a seed nothing can derive: report every chain as empty.
            tracing::warn!(error = %e, "seed unavailable, address stream degrades");
            for chain in SUPPORTED_CHAINS {
                let _ = tx.try_send(ChainAddress {
                    chain: chain.id,
                    address: None,
                });
            }
            return rx;
        }

        for chain in SUPPORTED_CHAINS {
            let aggregator = self.clone();
            let user_id = user_id.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tx.closed() => {}
                    derived = aggregator.derive_address(&user_id, chain) => {
                        let _ = tx.send(derived).await;
                    }
                }
            });
        }
        rx
    }

    /// Yield one native balance per supported chain, normalized to 18
    /// decimals, in completion order. A chain without a derivable address
    /// yields an error item; the others are unaffected.
    pub fn stream_balances(&self, user_id: &str) -> mpsc::Receiver<ChainYield<String>> {
        let (tx, rx) = mpsc::channel(SUPPORTED_CHAINS.len());
        for chain in SUPPORTED_CHAINS {
            let aggregator = self.clone();
            let user_id = user_id.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tx.closed() => {}
                    result = balance_for_chain(&aggregator, &user_id, chain.id) => {
                        let _ = tx.send(ChainYield { chain: chain.id, result }).await;
                    }
                }
            });
        }
        rx
    }
}

async fn balance_for_chain(
    aggregator: &MultiChainAggregator,
    user_id: &str,
    chain_id: &'static str,
) -> Result<String, WalletError> {
    let chain = chains::chain(chain_id).expect("supported chain");
    let account = aggregator.account_for(user_id, chain).await?;
    Ok(aggregator
        .native_balance(user_id, chain, &account.address())
        .await)
}
