// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Portfolio Indexer Client
//!
//! HTTPS client for the cross-chain portfolio/transaction provider.
//!
//! - Basic authentication: `base64("{api_key}:")`, computed once.
//! - Retries: up to 3 attempts on 5xx and transport errors with exponential
//!   backoff; 4xx surfaces immediately.
//! - Two TTL caches: portfolio (30s) and transactions (60s), keyed by
//!   `(address, chain_filter)`.
//! - The `chain_ids` query parameter is sent *and* results are re-filtered
//!   client-side, so correctness does not depend on server-side filtering.

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::cache::TtlCache;
use crate::error::WalletError;

pub use types::{
    Document, FungibleInfo, Implementation, PositionResource, Quantity, TransactionResource,
    TransferInfo,
};

/// Portfolio cache TTL.
const PORTFOLIO_TTL: Duration = Duration::from_secs(30);
/// Transaction cache TTL.
const TRANSACTIONS_TTL: Duration = Duration::from_secs(60);
/// Cached addresses per cache.
const CACHE_CAPACITY: usize = 256;
/// Base delay between retries.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Indexer client settings.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl IndexerConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// HTTPS client with caching and bounded retries.
pub struct IndexerClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
    max_retries: u32,
    portfolio_cache: TtlCache<String, Arc<Vec<PositionResource>>>,
    tx_cache: TtlCache<String, Arc<Vec<TransactionResource>>>,
}

impl IndexerClient {
    pub fn new(config: IndexerConfig) -> Result<Self, WalletError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WalletError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", BASE64.encode(format!("{}:", config.api_key))),
            max_retries: config.max_retries.max(1),
            portfolio_cache: TtlCache::new(CACHE_CAPACITY, PORTFOLIO_TTL),
            tx_cache: TtlCache::new(CACHE_CAPACITY, TRANSACTIONS_TTL),
        })
    }

    /// Wallet positions, optionally narrowed to one provider chain key.
    pub async fn portfolio(
        &self,
        address: &str,
        chain: Option<&str>,
    ) -> Result<Arc<Vec<PositionResource>>, WalletError> {
        let key = cache_key(address, chain);
        if let Some(cached) = self.portfolio_cache.get(&key) {
            return Ok(cached);
        }

        let mut url = format!("{}/v1/wallets/{address}/portfolio", self.base_url);
        if let Some(chain) = chain {
            url.push_str(&format!("?chain_ids={chain}"));
        }

        let document: Document<PositionResource> = self.get_with_retry(&url).await?;
        let positions: Vec<PositionResource> = document
            .data
            .into_iter()
            .filter(|position| match chain {
                // Re-filter locally; a position with no chain relationship is
                // kept as-is.
                Some(chain) => position.chain_id().map(|id| id == chain).unwrap_or(true),
                None => true,
            })
            .collect();

        let positions = Arc::new(positions);
        self.portfolio_cache.put(key, Arc::clone(&positions));
        Ok(positions)
    }

    /// Wallet transactions, newest first, optionally narrowed to one chain.
    pub async fn transactions(
        &self,
        address: &str,
        chain: Option<&str>,
        page_size: u64,
    ) -> Result<Arc<Vec<TransactionResource>>, WalletError> {
        let key = cache_key(address, chain);
        if let Some(cached) = self.tx_cache.get(&key) {
            return Ok(cached);
        }

        let mut url = format!(
            "{}/v1/wallets/{address}/transactions/?page[size]={page_size}",
            self.base_url
        );
        if let Some(chain) = chain {
            url.push_str(&format!("&chain_ids={chain}"));
        }

        let document: Document<TransactionResource> = self.get_with_retry(&url).await?;
        let transactions: Vec<TransactionResource> = document
            .data
            .into_iter()
            .filter(|tx| match chain {
                Some(chain) => tx.chain_id().map(|id| id == chain).unwrap_or(true),
                None => true,
            })
            .collect();

        let transactions = Arc::new(transactions);
        self.tx_cache.put(key, Arc::clone(&transactions));
        Ok(transactions)
    }

    /// Best-effort invalidation after a send mutation. Drops the chain-scoped
    /// and any-chain entries for the address in both caches.
    pub fn invalidate(&self, address: &str, chain: Option<&str>) {
        let scoped = cache_key(address, chain);
        let any = cache_key(address, None);
        self.portfolio_cache.invalidate(&scoped);
        self.portfolio_cache.invalidate(&any);
        self.tx_cache.invalidate(&scoped);
        self.tx_cache.invalidate(&any);
    }

    /// GET with bounded retries: 5xx and transport errors back off and
    /// retry, 4xx surfaces immediately.
    async fn get_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T, WalletError> {
        let mut last_error = WalletError::unavailable("indexer request was never attempted");
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http
                .get(url)
                .header("Authorization", &self.auth_header)
                .header("Accept", "application/json")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "indexer request failed");
                    last_error = if e.is_timeout() {
                        WalletError::timeout(format!("indexer request timed out: {e}"))
                    } else {
                        WalletError::unavailable(format!("indexer unreachable: {e}"))
                    };
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    WalletError::internal(format!("indexer response was invalid: {e}"))
                });
            }

            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(match status {
                    StatusCode::NOT_FOUND => {
                        WalletError::not_found(format!("indexer returned 404: {body}"))
                    }
                    _ => WalletError::invalid_argument(format!(
                        "indexer returned {status}: {body}"
                    )),
                });
            }

            tracing::warn!(attempt, status = %status, "indexer server error");
            last_error = WalletError::unavailable(format!("indexer returned {status}: {body}"));
        }
        Err(last_error)
    }
}

fn cache_key(address: &str, chain: Option<&str>) -> String {
    format!("{}|{}", address.to_lowercase(), chain.unwrap_or("any"))
}
