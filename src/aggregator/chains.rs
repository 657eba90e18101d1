// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Supported chain table.
//!
//! One entry per derivable address: every EVM chain appears twice, once as a
//! plain EOA and once as its account-abstraction variant.

/// Derivation family a chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    Evm,
    Tron,
    Bitcoin,
    Solana,
}

/// Static description of one supported chain.
#[derive(Debug, Clone)]
pub struct ChainSpec {
    /// Stable identifier used in caches and API payloads.
    pub id: &'static str,
    pub family: ChainFamily,
    /// EVM chain id, for chains that have one.
    pub evm_chain_id: Option<u64>,
    /// The indexer's chain key, where the indexer covers the chain.
    pub indexer_id: Option<&'static str>,
    pub native_symbol: &'static str,
    pub native_decimals: u8,
    /// Whether addresses are smart-account (account abstraction) addresses.
    pub account_abstraction: bool,
}

pub const ETHEREUM: ChainSpec = ChainSpec {
    id: "ethereum",
    family: ChainFamily::Evm,
    evm_chain_id: Some(1),
    indexer_id: Some("ethereum"),
    native_symbol: "ETH",
    native_decimals: 18,
    account_abstraction: false,
};

pub const ETHEREUM_AA: ChainSpec = ChainSpec {
    id: "ethereum-aa",
    family: ChainFamily::Evm,
    evm_chain_id: Some(1),
    indexer_id: Some("ethereum"),
    native_symbol: "ETH",
    native_decimals: 18,
    account_abstraction: true,
};

pub const BASE: ChainSpec = ChainSpec {
    id: "base",
    family: ChainFamily::Evm,
    evm_chain_id: Some(8453),
    indexer_id: Some("base"),
    native_symbol: "ETH",
    native_decimals: 18,
    account_abstraction: false,
};

pub const BASE_AA: ChainSpec = ChainSpec {
    id: "base-aa",
    family: ChainFamily::Evm,
    evm_chain_id: Some(8453),
    indexer_id: Some("base"),
    native_symbol: "ETH",
    native_decimals: 18,
    account_abstraction: true,
};

pub const ARBITRUM: ChainSpec = ChainSpec {
    id: "arbitrum",
    family: ChainFamily::Evm,
    evm_chain_id: Some(42161),
    indexer_id: Some("arbitrum"),
    native_symbol: "ETH",
    native_decimals: 18,
    account_abstraction: false,
};

pub const ARBITRUM_AA: ChainSpec = ChainSpec {
    id: "arbitrum-aa",
    family: ChainFamily::Evm,
    evm_chain_id: Some(42161),
    indexer_id: Some("arbitrum"),
    native_symbol: "ETH",
    native_decimals: 18,
    account_abstraction: true,
};

pub const POLYGON: ChainSpec = ChainSpec {
    id: "polygon",
    family: ChainFamily::Evm,
    evm_chain_id: Some(137),
    indexer_id: Some("polygon"),
    native_symbol: "MATIC",
    native_decimals: 18,
    account_abstraction: false,
};

pub const POLYGON_AA: ChainSpec = ChainSpec {
    id: "polygon-aa",
    family: ChainFamily::Evm,
    evm_chain_id: Some(137),
    indexer_id: Some("polygon"),
    native_symbol: "MATIC",
    native_decimals: 18,
    account_abstraction: true,
};

pub const TRON: ChainSpec = ChainSpec {
    id: "tron",
    family: ChainFamily::Tron,
    evm_chain_id: None,
    indexer_id: None,
    native_symbol: "TRX",
    native_decimals: 6,
    account_abstraction: false,
};

pub const BITCOIN: ChainSpec = ChainSpec {
    id: "bitcoin",
    family: ChainFamily::Bitcoin,
    evm_chain_id: None,
    indexer_id: None,
    native_symbol: "BTC",
    native_decimals: 8,
    account_abstraction: false,
};

pub const SOLANA: ChainSpec = ChainSpec {
    id: "solana",
    family: ChainFamily::Solana,
    evm_chain_id: None,
    indexer_id: Some("solana"),
    native_symbol: "SOL",
    native_decimals: 9,
    account_abstraction: false,
};

/// Every chain an address is derived for, in display order.
pub const SUPPORTED_CHAINS: &[&ChainSpec] = &[
    &ETHEREUM,
    &ETHEREUM_AA,
    &BASE,
    &BASE_AA,
    &ARBITRUM,
    &ARBITRUM_AA,
    &POLYGON,
    &POLYGON_AA,
    &TRON,
    &BITCOIN,
    &SOLANA,
];

/// Look a chain up by its stable id.
pub fn chain(id: &str) -> Option<&'static ChainSpec> {
    SUPPORTED_CHAINS
        .iter()
        .copied()
        .find(|spec| spec.id.eq_ignore_ascii_case(id.trim()))
}
