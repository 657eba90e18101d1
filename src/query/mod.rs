// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Query Service
//!
//! Read-only access to the clearing node's ledger: balances, sessions,
//! channels, transactions, and entries. All reads are signed except the
//! public methods `ping` and `get_app_definition`.
//!
//! Pagination follows the clearing node's convention:
//! `{"page": {"size": n}, "offset": m}`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::SessionAuth;
use crate::error::WalletError;
use crate::models::{LedgerBalance, LedgerTransaction};
use crate::rpc::{now_ms, ClearingTransport, RequestSigner};

/// Filter for `get_app_sessions`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<String>,
    pub participant: Option<String>,
}

/// Filter and pagination for ledger transaction/entry queries.
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub asset: Option<String>,
    pub tx_type: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// An app session as reported by the clearing node. The bare sessions query
/// may omit participants for privacy; [`QueryService::get_app_session`]
/// merges them back in from the definition.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppSessionInfo {
    pub app_session_id: String,
    pub status: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub weights: Vec<u64>,
    #[serde(default)]
    pub quorum: Option<u64>,
    #[serde(default)]
    pub challenge: Option<u64>,
    #[serde(default)]
    pub session_data: Option<Value>,
}

/// A session definition as returned by `get_app_definition`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<String>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    #[serde(default)]
    pub challenge: u64,
    #[serde(default)]
    pub nonce: u64,
}

/// A payment channel as reported by the clearing node.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub status: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub version: u64,
}

/// `ping` reply; defaults are substituted for null payloads.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Ping {
    pub pong: String,
    pub timestamp: u64,
}

/// Read-side companion to the controllers.
pub struct QueryService {
    transport: ClearingTransport,
    auth: Arc<SessionAuth>,
}

impl QueryService {
    pub fn new(transport: ClearingTransport, auth: Arc<SessionAuth>) -> Self {
        Self { transport, auth }
    }

    /// Per-asset balances of the authenticated account (or `account_id`).
    pub async fn get_ledger_balances(
        &self,
        account_id: Option<&str>,
    ) -> Result<Vec<LedgerBalance>, WalletError> {
        let mut params = Map::new();
        if let Some(account_id) = account_id {
            params.insert("account_id".to_string(), json!(account_id));
        }
        let payload = self
            .transport
            .request(
                "get_ledger_balances",
                Value::Object(params),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        decode_list(&payload, "ledger_balances")
    }

    /// Sessions visible to this account, optionally filtered.
    pub async fn get_app_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<AppSessionInfo>, WalletError> {
        let mut params = Map::new();
        if let Some(status) = &filter.status {
            params.insert("status".to_string(), json!(status));
        }
        if let Some(participant) = &filter.participant {
            params.insert("participant".to_string(), json!(participant));
        }
        let payload = self
            .transport
            .request(
                "get_app_sessions",
                Value::Object(params),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        decode_list(&payload, "app_sessions")
    }

    /// Channels anchored for this account.
    pub async fn get_channels(&self) -> Result<Vec<ChannelInfo>, WalletError> {
        let payload = self
            .transport
            .request(
                "get_channels",
                json!({}),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        decode_list(&payload, "channels")
    }

    /// Ledger transactions, newest first.
    pub async fn get_ledger_transactions(
        &self,
        query: &LedgerQuery,
    ) -> Result<Vec<LedgerTransaction>, WalletError> {
        let payload = self
            .transport
            .request(
                "get_ledger_transactions",
                paginated_params(query),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        decode_list(&payload, "ledger_transactions")
    }

    /// Raw ledger entries (debits/credits) behind the transactions.
    pub async fn get_ledger_entries(
        &self,
        query: &LedgerQuery,
    ) -> Result<Vec<Value>, WalletError> {
        let payload = self
            .transport
            .request(
                "get_ledger_entries",
                paginated_params(query),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        decode_list(&payload, "ledger_entries")
    }

    /// The definition of one session. Public method: unsigned.
    pub async fn get_app_definition(
        &self,
        app_session_id: &str,
    ) -> Result<AppDefinition, WalletError> {
        let payload = self
            .transport
            .request(
                "get_app_definition",
                json!({"app_session_id": app_session_id}),
                None,
            )
            .await?;
        let definition = payload.get("definition").unwrap_or(&payload);
        serde_json::from_value(definition.clone())
            .map_err(|e| WalletError::internal(format!("decode app definition: {e}")))
    }

    /// Liveness probe. Public method: unsigned. A null reply defaults to
    /// `{"pong": "pong", "timestamp": now}`.
    pub async fn ping(&self) -> Result<Ping, WalletError> {
        let payload = self.transport.request("ping", json!({}), None).await?;
        if payload.is_null() {
            return Ok(Ping {
                pong: "pong".to_string(),
                timestamp: now_ms(),
            });
        }
        Ok(Ping {
            pong: payload
                .get("pong")
                .and_then(Value::as_str)
                .unwrap_or("pong")
                .to_string(),
            timestamp: payload
                .get("timestamp")
                .and_then(Value::as_u64)
                .unwrap_or_else(now_ms),
        })
    }

    /// One session with its definition merged in. The bare sessions list may
    /// omit participants; the definition is authoritative for them.
    pub async fn get_app_session(
        &self,
        app_session_id: &str,
    ) -> Result<AppSessionInfo, WalletError> {
        let sessions = self.get_app_sessions(&SessionFilter::default()).await?;
        let mut session = sessions
            .into_iter()
            .find(|session| session.app_session_id == app_session_id)
            .ok_or_else(|| WalletError::not_found(format!("session {app_session_id}")))?;

        match self.get_app_definition(app_session_id).await {
            Ok(definition) => {
                session.participants = definition.participants;
                session.weights = definition.weights;
                session.quorum = Some(definition.quorum);
                session.challenge = Some(definition.challenge);
                if session.protocol.is_none() {
                    session.protocol = Some(definition.protocol);
                }
            }
            Err(e) => {
                tracing::warn!(
                    app_session_id,
                    error = %e,
                    "definition fetch failed, returning bare session"
                );
            }
        }
        Ok(session)
    }
}

fn paginated_params(query: &LedgerQuery) -> Value {
    let mut params = Map::new();
    if let Some(asset) = &query.asset {
        params.insert("asset".to_string(), json!(asset));
    }
    if let Some(tx_type) = &query.tx_type {
        params.insert("tx_type".to_string(), json!(tx_type));
    }
    if let Some(limit) = query.limit {
        params.insert("page".to_string(), json!({"size": limit}));
    }
    if let Some(offset) = query.offset {
        params.insert("offset".to_string(), json!(offset));
    }
    Value::Object(params)
}

/// Decode a list payload that arrives either under a named field or as a
/// bare array. Null and missing both decode to an empty list.
fn decode_list<T: serde::de::DeserializeOwned>(
    payload: &Value,
    field: &str,
) -> Result<Vec<T>, WalletError> {
    let list = match payload.get(field) {
        Some(list) => list,
        None if payload.is_array() => payload,
        // A null or fieldless payload is an empty result, not an error.
        None => return Ok(Vec::new()),
    };
    if list.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(list.clone())
        .map_err(|e| WalletError::internal(format!("decode {field}: {e}")))
}
