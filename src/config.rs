// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup. The transport and
//! indexer carry their own tunable structs ([`crate::rpc::TransportConfig`],
//! [`crate::indexer::IndexerConfig`]); this module owns the environment
//! variable names, defaults, and the loader that assembles both.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CLEARING_WS_URL` | Clearing node WebSocket endpoint | Required |
//! | `CLEARING_MAX_RECONNECT_ATTEMPTS` | Reconnection budget | `5` |
//! | `CLEARING_REQUEST_TIMEOUT_MS` | Per-request timeout | `30000` |
//! | `INDEXER_API_URL` | Portfolio indexer base URL | Required |
//! | `INDEXER_API_KEY` | Indexer API key (basic auth user) | Required |
//! | `INDEXER_TIMEOUT_MS` | Indexer HTTP timeout | `10000` |
//! | `CUSTODY_ADDRESS_<CHAIN_ID>` | Custody contract per EVM chain | Optional |

use std::collections::HashMap;

use alloy::primitives::Address;

use crate::error::WalletError;
use crate::indexer::IndexerConfig;
use crate::rpc::TransportConfig;

/// Top-level configuration for the coordination core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Transport settings for the clearing-node connection.
    pub transport: TransportConfig,
    /// Indexer client settings.
    pub indexer: IndexerConfig,
    /// Custody contract address per EVM chain id.
    pub custody_addresses: HashMap<u64, Address>,
}

impl CoreConfig {
    /// Load configuration from the environment.
    ///
    /// Custody addresses are read from `CUSTODY_ADDRESS_<CHAIN_ID>` variables
    /// (e.g. `CUSTODY_ADDRESS_8453` for Base).
    pub fn from_env() -> Result<Self, WalletError> {
        let ws_url = env_required("CLEARING_WS_URL")?;
        let parsed: url::Url = ws_url
            .parse()
            .map_err(|e| WalletError::invalid_argument(format!("CLEARING_WS_URL: {e}")))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(WalletError::invalid_argument(format!(
                "CLEARING_WS_URL must be a ws:// or wss:// endpoint, got {}",
                parsed.scheme()
            )));
        }
        let mut transport = TransportConfig::new(ws_url);
        if let Some(attempts) = env_optional("CLEARING_MAX_RECONNECT_ATTEMPTS") {
            transport.max_reconnect_attempts = attempts.parse().map_err(|_| {
                WalletError::invalid_argument("CLEARING_MAX_RECONNECT_ATTEMPTS must be an integer")
            })?;
        }
        if let Some(timeout_ms) = env_optional("CLEARING_REQUEST_TIMEOUT_MS") {
            let ms: u64 = timeout_ms.parse().map_err(|_| {
                WalletError::invalid_argument("CLEARING_REQUEST_TIMEOUT_MS must be an integer")
            })?;
            transport.request_timeout = std::time::Duration::from_millis(ms);
        }

        let mut indexer = IndexerConfig::new(
            env_required("INDEXER_API_URL")?,
            env_required("INDEXER_API_KEY")?,
        );
        if let Some(timeout_ms) = env_optional("INDEXER_TIMEOUT_MS") {
            let ms: u64 = timeout_ms.parse().map_err(|_| {
                WalletError::invalid_argument("INDEXER_TIMEOUT_MS must be an integer")
            })?;
            indexer.timeout = std::time::Duration::from_millis(ms);
        }

        Ok(Self {
            transport,
            indexer,
            custody_addresses: custody_addresses_from_env()?,
        })
    }
}

/// Read `CUSTODY_ADDRESS_<CHAIN_ID>` variables into a chain id → address map.
fn custody_addresses_from_env() -> Result<HashMap<u64, Address>, WalletError> {
    let mut map = HashMap::new();
    for (key, value) in std::env::vars() {
        let Some(suffix) = key.strip_prefix("CUSTODY_ADDRESS_") else {
            continue;
        };
        let chain_id: u64 = suffix.parse().map_err(|_| {
            WalletError::invalid_argument(format!("{key}: chain id suffix must be an integer"))
        })?;
        let address: Address = value.trim().parse().map_err(|_| {
            WalletError::invalid_argument(format!("{key}: not a valid contract address"))
        })?;
        map.insert(chain_id, address);
    }
    Ok(map)
}

pub(crate) fn env_required(name: &str) -> Result<String, WalletError> {
    env_optional(name)
        .ok_or_else(|| WalletError::invalid_argument(format!("missing configuration: {name}")))
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}
