// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON:API response envelopes for the portfolio indexer.
//!
//! Every field the provider may omit is defaulted: an envelope with no
//! `data` (or `"data": null`) decodes to an empty list rather than an error.

use serde::Deserialize;

/// Top-level JSON:API envelope.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(bound = "T: Deserialize<'de>")]
pub struct Document<T> {
    #[serde(default = "Vec::new", deserialize_with = "crate::indexer::types::null_to_empty")]
    pub data: Vec<T>,
}

/// Deserialize `null` as an empty list.
pub(crate) fn null_to_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// One wallet position (native or fungible token).
#[derive(Debug, Clone, Deserialize)]
pub struct PositionResource {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub attributes: PositionAttributes,
    #[serde(default)]
    pub relationships: Option<Relationships>,
}

impl PositionResource {
    /// Provider chain key (e.g. `"base"`), from the chain relationship.
    pub fn chain_id(&self) -> Option<&str> {
        self.relationships
            .as_ref()
            .and_then(|rel| rel.chain.as_ref())
            .map(|chain| chain.data.id.as_str())
    }

    /// Contract address of the first implementation; `None` for native.
    pub fn implementation_address(&self) -> Option<&str> {
        self.attributes
            .fungible_info
            .as_ref()
            .and_then(|info| info.implementations.first())
            .and_then(|implementation| implementation.address.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionAttributes {
    #[serde(default)]
    pub name: Option<String>,
    pub quantity: Quantity,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub fungible_info: Option<FungibleInfo>,
    #[serde(default)]
    pub flags: Option<PositionFlags>,
}

/// Raw quantity: `int` is the smallest-unit integer as a string.
#[derive(Debug, Clone, Deserialize)]
pub struct Quantity {
    pub int: String,
    #[serde(default)]
    pub decimals: u8,
    #[serde(default)]
    pub numeric: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FungibleInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub implementations: Vec<Implementation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Implementation {
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PositionFlags {
    #[serde(default)]
    pub displayable: bool,
    #[serde(default)]
    pub is_trash: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relationships {
    #[serde(default)]
    pub chain: Option<RelationshipRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipRef {
    pub data: RelationshipData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipData {
    pub id: String,
}

/// One indexed transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResource {
    pub id: String,
    pub attributes: TransactionAttributes,
    #[serde(default)]
    pub relationships: Option<Relationships>,
}

impl TransactionResource {
    pub fn chain_id(&self) -> Option<&str> {
        self.relationships
            .as_ref()
            .and_then(|rel| rel.chain.as_ref())
            .map(|chain| chain.data.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionAttributes {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mined_at_block: Option<u64>,
    #[serde(default)]
    pub block_confirmations: Option<u64>,
    #[serde(default)]
    pub mined_at: Option<String>,
    #[serde(default)]
    pub sent_from: Option<String>,
    #[serde(default)]
    pub sent_to: Option<String>,
    #[serde(default)]
    pub transfers: Vec<TransferInfo>,
}

/// One asset movement inside a transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferInfo {
    #[serde(default)]
    pub fungible_info: Option<FungibleInfo>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub quantity: Option<Quantity>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
}
