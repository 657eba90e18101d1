// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Domain Models
//!
//! Cross-cutting data structures: the asset catalogue entry pushed by the
//! clearing node, the locally persisted session/participant/channel rows,
//! and the ledger rows returned by the clearing node's query methods.
//!
//! Rows are plain serde structs; persistence is behind
//! [`crate::store::WalletStore`].

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the server-pushed asset catalogue.
///
/// `token_address` is `None` for a chain's native asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub symbol: String,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    pub decimals: u8,
}

/// Seed bookkeeping row. The seed material itself lives in the external
/// encrypted store; this row only records existence and identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedRecord {
    pub user_id: String,
    pub seed_id: String,
    pub created_at: DateTime<Utc>,
}

/// Participant lifecycle inside an app session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Invited,
    Joined,
    Left,
}

/// Local bookkeeping row for one `(session, participant, asset)` position.
///
/// Uniqueness: `(app_session_id, address, asset)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub app_session_id: String,
    /// Participant wallet address, stored lowercase.
    pub address: String,
    pub weight: u64,
    /// Balance in the asset's smallest units.
    pub balance: U256,
    pub asset: String,
    pub status: ParticipantStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// App session lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// Locally persisted app-session row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSessionRecord {
    pub app_session_id: String,
    pub status: SessionStatus,
    pub version: u64,
    pub protocol: String,
    pub participants: Vec<String>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub challenge: u64,
    pub asset: String,
    pub chain: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Payment-channel lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRecordStatus {
    Active,
    Closed,
}

/// Locally persisted payment-channel row.
///
/// Uniqueness: `(user_id, chain_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub user_id: String,
    pub chain_id: u64,
    pub token: String,
    /// Version of the last state negotiated for this channel.
    pub version: u64,
    pub status: ChannelRecordStatus,
    pub updated_at: DateTime<Utc>,
}

/// Ledger transaction row as returned by the clearing node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerTransaction {
    pub id: u64,
    pub tx_type: String,
    pub asset: String,
    pub amount: String,
    pub from_account: String,
    pub to_account: String,
    #[serde(rename = "created_at")]
    pub timestamp_ms: u64,
    pub status: String,
}

/// Per-asset ledger balance as returned by the clearing node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerBalance {
    pub asset: String,
    pub amount: String,
}

/// Normalize an address for use as a storage key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_address_lowercases_and_trims() {
        assert_eq!(
            normalize_address(" 0xABCDef0123 "),
            "0xabcdef0123".to_string()
        );
    }

    #[test]
    fn asset_roundtrips_through_json() {
        let asset = Asset {
            symbol: "usdc".to_string(),
            chain_id: 8453,
            token_address: Some("0x8335".to_string()),
            decimals: 6,
        };
        let json = serde_json::to_string(&asset).unwrap();
        let back: Asset = serde_json::from_str(&json).unwrap();
        assert_eq!(asset, back);
    }

    #[test]
    fn native_asset_omits_token_address() {
        let asset = Asset {
            symbol: "eth".to_string(),
            chain_id: 1,
            token_address: None,
            decimals: 18,
        };
        let json = serde_json::to_string(&asset).unwrap();
        assert!(!json.contains("token_address"));
    }
}
