// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signer Interface
//!
//! The seed-holding signer/derivation service lives outside this crate;
//! these traits are the seam. A derived account advertises a *capability
//! set* for transfers instead of being probed by method name, and the
//! aggregator tries capabilities in a fixed priority order.

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;

use crate::aggregator::chains::ChainSpec;
use crate::error::WalletError;

/// Transfer entry points a signer account may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCapability {
    /// `send(recipient, amount)` for the chain's native asset.
    NativeTransfer,
    /// `transfer({token?, to, amount})` taking a request struct.
    TokenTransferByStruct,
    /// `transfer(token, recipient, amount)` positional form.
    TokenTransferByTriple,
    /// Generic `send(recipient, amount, options)` with an optional token.
    GenericSend,
}

/// Priority order the aggregator walks for a transfer; first success wins.
pub fn capability_priority(native: bool) -> &'static [TransferCapability] {
    if native {
        &[
            TransferCapability::NativeTransfer,
            TransferCapability::TokenTransferByStruct,
            TransferCapability::GenericSend,
        ]
    } else {
        &[
            TransferCapability::TokenTransferByStruct,
            TransferCapability::TokenTransferByTriple,
            TransferCapability::GenericSend,
        ]
    }
}

/// What to move where, in smallest units. `token_address` of `None` means
/// the chain's native asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub recipient: String,
    pub amount: U256,
    pub token_address: Option<String>,
}

/// An `eth_call`-style request surface some accounts expose.
#[async_trait]
pub trait CallProvider: Send + Sync {
    /// Execute a read-only call against `to` and return the raw result.
    async fn call(&self, to: &str, data: Vec<u8>) -> Result<Vec<u8>, WalletError>;
}

/// One derived account on one chain.
#[async_trait]
pub trait SignerAccount: Send + Sync {
    /// The account address in the chain's canonical format.
    fn address(&self) -> String;

    /// Native balance in smallest units.
    async fn native_balance(&self) -> Result<U256, WalletError>;

    /// Token balance in smallest units, if the signer can resolve it.
    async fn token_balance(&self, _token: &str) -> Result<Option<U256>, WalletError> {
        Ok(None)
    }

    /// The provider behind this account, when one is exposed.
    fn call_provider(&self) -> Option<Arc<dyn CallProvider>> {
        None
    }

    /// Transfer entry points this account supports.
    fn capabilities(&self) -> Vec<TransferCapability>;

    /// Execute a transfer through one advertised capability and return the
    /// transaction hash.
    async fn transfer(
        &self,
        capability: TransferCapability,
        intent: &TransferIntent,
    ) -> Result<String, WalletError>;
}

/// Derives per-chain accounts from a user's seed.
#[async_trait]
pub trait DerivationService: Send + Sync {
    async fn account(
        &self,
        user_id: &str,
        chain: &ChainSpec,
    ) -> Result<Arc<dyn SignerAccount>, WalletError>;
}
