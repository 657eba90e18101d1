// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The send path: amount conversion, decimals resolution, balance
//! pre-check, and capability-ordered transfer dispatch.
//!
//! Decimals resolution for tokens is layered: an ERC-20 `decimals()` call
//! through the signer's provider, then the indexer's any-chain positions,
//! then 18 with a warning. The balance pre-check walks signer, provider,
//! and indexer in that order and only blocks a send on a *confirmed*
//! shortfall; unknown availability proceeds.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};

use crate::amount::to_smallest_units;
use crate::error::WalletError;
use crate::signer::{capability_priority, CallProvider, SignerAccount, TransferIntent};

use super::chains::{self, ChainSpec};
use super::MultiChainAggregator;

/// `decimals()` selector.
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
/// `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// Largest decimals value accepted from an on-chain `decimals()` call.
const MAX_SANE_DECIMALS: u8 = 36;

impl MultiChainAggregator {
    /// Send native or token funds. Returns the transaction hash.
    ///
    /// The human amount is converted by string arithmetic at the resolved
    /// decimals (extra fractional digits truncate); an amount of zero is
    /// rejected. On success the indexer cache for `(address, chain)` is
    /// invalidated best-effort.
    pub async fn send_crypto(
        &self,
        user_id: &str,
        chain_id: &str,
        recipient: &str,
        amount: &str,
        token_address: Option<&str>,
    ) -> Result<String, WalletError> {
        let chain = chains::chain(chain_id)
            .ok_or_else(|| WalletError::invalid_argument(format!("unsupported chain {chain_id}")))?;
        if recipient.trim().is_empty() {
            return Err(WalletError::invalid_argument("recipient must not be empty"));
        }

        let account = self.account_for(user_id, chain).await?;
        let decimals = self.resolve_decimals(&account, chain, token_address).await;
        let smallest = to_smallest_units(amount, decimals)?;
        if smallest.is_zero() {
            return Err(WalletError::invalid_argument(format!(
                "amount {amount} is zero at {decimals} decimals"
            )));
        }

        self.precheck_balance(&account, chain, token_address, smallest)
            .await?;

        let intent = TransferIntent {
            recipient: recipient.trim().to_string(),
            amount: smallest,
            token_address: token_address.map(str::to_string),
        };
        let tx_hash = dispatch_transfer(account.as_ref(), &intent).await?;

        self.indexer()
            .invalidate(&account.address(), chain.indexer_id);
        tracing::info!(
            chain = chain.id,
            tx_hash = %tx_hash,
            smallest_units = %smallest,
            "transfer submitted"
        );
        Ok(tx_hash)
    }

    /// Resolve the decimals to convert a human amount at.
    async fn resolve_decimals(
        &self,
        account: &Arc<dyn SignerAccount>,
        chain: &'static ChainSpec,
        token_address: Option<&str>,
    ) -> u8 {
        let Some(token) = token_address else {
            return chain.native_decimals;
        };

        if let Some(decimals) = erc20_decimals(account.call_provider(), token).await {
            return decimals;
        }
        if let Some(decimals) = self
            .indexer_decimals(&account.address(), chain, token)
            .await
        {
            return decimals;
        }
        tracing::warn!(token, "decimals resolution failed on every layer, defaulting to 18");
        18
    }

    /// Read decimals from the indexer's any-chain positions: the position
    /// must match the token's implementation address and this chain.
    async fn indexer_decimals(
        &self,
        address: &str,
        chain: &'static ChainSpec,
        token: &str,
    ) -> Option<u8> {
        let positions = self.indexer().portfolio(address, None).await.ok()?;
        positions
            .iter()
            .find(|position| {
                position
                    .implementation_address()
                    .map(|implementation| implementation.eq_ignore_ascii_case(token))
                    .unwrap_or(false)
                    && position.chain_id() == chain.indexer_id
            })
            .and_then(|position| position.attributes.fungible_info.as_ref())
            .and_then(|info| info.decimals)
    }

    /// Fail on a confirmed shortfall; proceed when availability is unknown.
    async fn precheck_balance(
        &self,
        account: &Arc<dyn SignerAccount>,
        chain: &'static ChainSpec,
        token_address: Option<&str>,
        required: U256,
    ) -> Result<(), WalletError> {
        let (available, source) = match token_address {
            Some(token) => self.token_availability(account, chain, token).await,
            None => match account.native_balance().await {
                Ok(balance) => (Some(balance), "wdk-getBalance"),
                Err(e) => {
                    tracing::warn!(error = %e, "native balance unavailable, proceeding");
                    (None, "")
                }
            },
        };

        match available {
            Some(available) if available < required => Err(WalletError::precondition_failed(
                format!(
                    "insufficient balance: availableSmallest={available}, requestedSmallest={required}, source={source}"
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Token availability in layers: signer, provider `balanceOf`, indexer.
    async fn token_availability(
        &self,
        account: &Arc<dyn SignerAccount>,
        chain: &'static ChainSpec,
        token: &str,
    ) -> (Option<U256>, &'static str) {
        match account.token_balance(token).await {
            Ok(Some(balance)) => return (Some(balance), "wdk-getTokenBalance"),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "signer token balance lookup failed"),
        }

        if let Some(balance) =
            balance_of(account.call_provider(), &account.address(), token).await
        {
            return (Some(balance), "rpc-balanceOf");
        }

        if let Some(balance) = self
            .indexer_token_balance(&account.address(), chain, token)
            .await
        {
            return (Some(balance), "indexer-positions");
        }
        (None, "")
    }

    async fn indexer_token_balance(
        &self,
        address: &str,
        chain: &'static ChainSpec,
        token: &str,
    ) -> Option<U256> {
        let positions = self.indexer().portfolio(address, None).await.ok()?;
        let position = positions.iter().find(|position| {
            position
                .implementation_address()
                .map(|implementation| implementation.eq_ignore_ascii_case(token))
                .unwrap_or(false)
                && position.chain_id() == chain.indexer_id
        })?;
        U256::from_str_radix(&position.attributes.quantity.int, 10).ok()
    }
}

/// Walk the capability priority order; first success wins.
async fn dispatch_transfer(
    account: &dyn SignerAccount,
    intent: &TransferIntent,
) -> Result<String, WalletError> {
    let advertised = account.capabilities();
    let mut last_error: Option<WalletError> = None;
    for capability in capability_priority(intent.token_address.is_none()) {
        if !advertised.contains(capability) {
            continue;
        }
        match account.transfer(*capability, intent).await {
            Ok(tx_hash) => return Ok(tx_hash),
            Err(e) => {
                tracing::warn!(capability = ?capability, error = %e, "transfer attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        WalletError::unavailable("signer exposes no transfer capability for this asset")
    }))
}

/// `decimals()` through the account's provider. Empty call results (`0x`)
/// and values outside `0..=36` are treated as unresolved.
async fn erc20_decimals(provider: Option<Arc<dyn CallProvider>>, token: &str) -> Option<u8> {
    let provider = provider?;
    let raw = provider.call(token, DECIMALS_SELECTOR.to_vec()).await.ok()?;
    if raw.is_empty() || raw.len() > 32 {
        return None;
    }
    let value = U256::from_be_slice(&raw);
    let decimals = u8::try_from(value).ok()?;
    (decimals <= MAX_SANE_DECIMALS).then_some(decimals)
}

/// Direct `balanceOf(owner)` through the provider.
async fn balance_of(
    provider: Option<Arc<dyn CallProvider>>,
    owner: &str,
    token: &str,
) -> Option<U256> {
    let provider = provider?;
    let owner = Address::from_str(owner).ok()?;
    let mut calldata = BALANCE_OF_SELECTOR.to_vec();
    calldata.extend_from_slice(&[0u8; 12]);
    calldata.extend_from_slice(owner.as_slice());

    let raw = provider.call(token, calldata).await.ok()?;
    if raw.is_empty() || raw.len() > 32 {
        return None;
    }
    Some(U256::from_be_slice(&raw))
}
