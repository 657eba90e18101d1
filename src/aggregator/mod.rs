// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Multi-Chain Aggregator
//!
//! Fans per-chain work out to the signer and the indexer and assembles the
//! user-facing views: derived addresses, native and token balances,
//! transaction history, and cross-chain aggregates. Per-chain failures are
//! isolated: one chain yielding an error never aborts the others.
//!
//! Progressive variants of the address/balance reads live in
//! [`streams`]; the send path (decimals resolution, balance pre-check,
//! capability dispatch) lives in [`send`].

pub mod chains;
pub mod send;
pub mod streams;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::amount::scale_to_18;
use crate::cache::TtlCache;
use crate::error::WalletError;
use crate::indexer::{IndexerClient, PositionResource, TransactionResource};
use crate::signer::{DerivationService, SignerAccount};
use crate::store::WalletStore;

use chains::{ChainSpec, SUPPORTED_CHAINS};

/// Address cache TTL.
const ADDRESS_TTL: Duration = Duration::from_secs(60);
/// Cached users.
const ADDRESS_CACHE_CAPACITY: usize = 512;
/// Default transaction history page.
pub const DEFAULT_HISTORY_LIMIT: u64 = 50;

/// One derived address; `None` when derivation failed for this chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAddress {
    pub chain: &'static str,
    pub address: Option<String>,
}

/// A token (or native) balance normalized to 18 decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceEntry {
    /// Contract address; `None` denotes the native token.
    pub address: Option<String>,
    pub symbol: String,
    /// Smallest-unit integer string at 18 decimals.
    pub balance: String,
    pub decimals: u8,
    /// Provider chain key the balance lives on.
    pub chain: String,
}

/// Mapped transaction history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub timestamp: Option<String>,
    pub block_number: Option<u64>,
    pub status: TxStatus,
    pub chain: String,
    pub token_symbol: Option<String>,
    pub token_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
    Pending,
}

struct Inner {
    derivation: Arc<dyn DerivationService>,
    store: Arc<dyn WalletStore>,
    indexer: Arc<IndexerClient>,
    address_cache: TtlCache<String, Arc<Vec<ChainAddress>>>,
}

/// Aggregated multi-chain wallet views. Cheap to clone.
#[derive(Clone)]
pub struct MultiChainAggregator {
    inner: Arc<Inner>,
}

impl MultiChainAggregator {
    pub fn new(
        derivation: Arc<dyn DerivationService>,
        store: Arc<dyn WalletStore>,
        indexer: Arc<IndexerClient>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                derivation,
                store,
                indexer,
                address_cache: TtlCache::new(ADDRESS_CACHE_CAPACITY, ADDRESS_TTL),
            }),
        }
    }

    pub(crate) fn indexer(&self) -> &IndexerClient {
        &self.inner.indexer
    }

    /// Derive one address per supported chain. The seed is auto-created on
    /// first use; a failing chain yields `None` without aborting the rest.
    pub async fn get_addresses(
        &self,
        user_id: &str,
    ) -> Result<Arc<Vec<ChainAddress>>, WalletError> {
        if let Some(cached) = self.inner.address_cache.get(&user_id.to_string()) {
            return Ok(cached);
        }

        self.inner
            .store
            .ensure_seed(user_id)
            .map_err(|e| WalletError::internal(format!("ensure seed: {e}")))?;

        let derivations = SUPPORTED_CHAINS
            .iter()
            .map(|chain| self.derive_address(user_id, chain));
        let addresses: Vec<ChainAddress> = join_all(derivations).await;

        let addresses = Arc::new(addresses);
        self.inner
            .address_cache
            .put(user_id.to_string(), Arc::clone(&addresses));
        Ok(addresses)
    }

    async fn derive_address(&self, user_id: &str, chain: &'static ChainSpec) -> ChainAddress {
        match self.inner.derivation.account(user_id, chain).await {
            Ok(account) => ChainAddress {
                chain: chain.id,
                address: Some(account.address()),
            },
            Err(e) => {
                tracing::warn!(chain = chain.id, error = %e, "address derivation failed");
                ChainAddress {
                    chain: chain.id,
                    address: None,
                }
            }
        }
    }

    pub(crate) async fn account_for(
        &self,
        user_id: &str,
        chain: &'static ChainSpec,
    ) -> Result<Arc<dyn SignerAccount>, WalletError> {
        self.inner
            .store
            .ensure_seed(user_id)
            .map_err(|e| WalletError::internal(format!("ensure seed: {e}")))?;
        self.inner.derivation.account(user_id, chain).await
    }

    /// Native balance per chain, keyed by chain id, normalized to 18
    /// decimals. Chains whose derivation failed are omitted.
    pub async fn get_balances(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, String>, WalletError> {
        let addresses = self.get_addresses(user_id).await?;
        let lookups = addresses.iter().filter_map(|entry| {
            let address = entry.address.clone()?;
            let chain = chains::chain(entry.chain)?;
            Some(async move {
                let balance = self.native_balance(user_id, chain, &address).await;
                (entry.chain.to_string(), balance)
            })
        });
        Ok(join_all(lookups).await.into_iter().collect())
    }

    /// Native balance via the indexer, with a signer-side fallback.
    pub(crate) async fn native_balance(
        &self,
        user_id: &str,
        chain: &'static ChainSpec,
        address: &str,
    ) -> String {
        if let Some(indexer_id) = chain.indexer_id {
            match self.inner.indexer.portfolio(address, Some(indexer_id)).await {
                Ok(positions) => {
                    let native = positions
                        .iter()
                        .find(|position| position.implementation_address().is_none());
                    return match native {
                        Some(position) => scale_to_18(
                            &position.attributes.quantity.int,
                            position.attributes.quantity.decimals,
                        ),
                        None => "0".to_string(),
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        chain = chain.id,
                        error = %e,
                        "indexer portfolio failed, falling back to signer"
                    );
                }
            }
        }

        match self.account_for(user_id, chain).await {
            Ok(account) => match account.native_balance().await {
                Ok(balance) => scale_to_18(&balance.to_string(), chain.native_decimals),
                Err(e) => {
                    tracing::warn!(chain = chain.id, error = %e, "signer balance fallback failed");
                    "0".to_string()
                }
            },
            Err(_) => "0".to_string(),
        }
    }

    /// Token balances on one chain, normalized to 18 decimals. Zero balances
    /// are omitted; token discovery degrades to an empty list when the
    /// indexer is down (the native balance still falls back to the signer).
    pub async fn get_token_balances(
        &self,
        user_id: &str,
        chain_id: &str,
    ) -> Result<Vec<TokenBalanceEntry>, WalletError> {
        let chain = chains::chain(chain_id)
            .ok_or_else(|| WalletError::invalid_argument(format!("unsupported chain {chain_id}")))?;
        let account = self.account_for(user_id, chain).await?;
        let address = account.address();

        let positions = match chain.indexer_id {
            Some(indexer_id) => match self.inner.indexer.portfolio(&address, Some(indexer_id)).await
            {
                Ok(positions) => positions,
                Err(e) => {
                    tracing::warn!(chain = chain.id, error = %e, "token discovery degraded");
                    return Ok(self.native_only_entry(chain, account.as_ref()).await);
                }
            },
            None => return Ok(self.native_only_entry(chain, account.as_ref()).await),
        };

        let mut entries = Vec::new();
        for position in positions.iter() {
            if let Some(entry) = map_position(position, chain.id) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Fallback shape when the indexer cannot enumerate tokens.
    async fn native_only_entry(
        &self,
        chain: &'static ChainSpec,
        account: &dyn SignerAccount,
    ) -> Vec<TokenBalanceEntry> {
        match account.native_balance().await {
            Ok(balance) if !balance.is_zero() => vec![TokenBalanceEntry {
                address: None,
                symbol: chain.native_symbol.to_string(),
                balance: scale_to_18(&balance.to_string(), chain.native_decimals),
                decimals: chain.native_decimals,
                chain: chain.id.to_string(),
            }],
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(chain = chain.id, error = %e, "native fallback failed");
                Vec::new()
            }
        }
    }

    /// Mapped transaction history for one chain, newest first.
    pub async fn get_transaction_history(
        &self,
        user_id: &str,
        chain_id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<TransactionEntry>, WalletError> {
        let chain = chains::chain(chain_id)
            .ok_or_else(|| WalletError::invalid_argument(format!("unsupported chain {chain_id}")))?;
        let Some(indexer_id) = chain.indexer_id else {
            return Ok(Vec::new());
        };
        let account = self.account_for(user_id, chain).await?;

        let transactions = self
            .inner
            .indexer
            .transactions(
                &account.address(),
                Some(indexer_id),
                limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            )
            .await?;
        Ok(transactions
            .iter()
            .map(|tx| map_transaction(tx, chain.id))
            .collect())
    }

    /// The user's primary addresses for cross-chain aggregation: the EVM
    /// EOA, the first account-abstraction address, and solana.
    async fn primary_addresses(&self, user_id: &str) -> Result<Vec<String>, WalletError> {
        let addresses = self.get_addresses(user_id).await?;
        let mut primary = Vec::new();
        for wanted in [chains::ETHEREUM.id, chains::ETHEREUM_AA.id, chains::SOLANA.id] {
            if let Some(address) = addresses
                .iter()
                .find(|entry| entry.chain == wanted)
                .and_then(|entry| entry.address.clone())
            {
                primary.push(address);
            }
        }
        Ok(primary)
    }

    /// Token balances across every chain the indexer covers, deduplicated by
    /// `(chain, implementation | "native")`; first seen wins.
    pub async fn get_token_balances_any(
        &self,
        user_id: &str,
    ) -> Result<Vec<TokenBalanceEntry>, WalletError> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut entries = Vec::new();
        for address in self.primary_addresses(user_id).await? {
            let positions = match self.inner.indexer.portfolio(&address, None).await {
                Ok(positions) => positions,
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "any-chain portfolio failed");
                    continue;
                }
            };
            for position in positions.iter() {
                let chain = position.chain_id().unwrap_or("unknown").to_string();
                let key = (
                    chain.clone(),
                    position
                        .implementation_address()
                        .map(str::to_lowercase)
                        .unwrap_or_else(|| "native".to_string()),
                );
                if !seen.insert(key) {
                    continue;
                }
                if let Some(entry) = map_position(position, &chain) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Transactions across every chain, deduplicated by `(chain, hash)`;
    /// first seen wins.
    pub async fn get_transactions_any(
        &self,
        user_id: &str,
    ) -> Result<Vec<TransactionEntry>, WalletError> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut entries = Vec::new();
        for address in self.primary_addresses(user_id).await? {
            let transactions = match self
                .inner
                .indexer
                .transactions(&address, None, DEFAULT_HISTORY_LIMIT)
                .await
            {
                Ok(transactions) => transactions,
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "any-chain transactions failed");
                    continue;
                }
            };
            for tx in transactions.iter() {
                let chain = tx.chain_id().unwrap_or("unknown").to_string();
                let entry = map_transaction(tx, &chain);
                if entry.tx_hash.is_empty() {
                    continue;
                }
                if seen.insert((chain, entry.tx_hash.to_lowercase())) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }
}

/// Map one indexer position into a balance entry. Zero balances map to
/// `None` and are omitted by callers.
fn map_position(position: &PositionResource, chain: &str) -> Option<TokenBalanceEntry> {
    let quantity = &position.attributes.quantity;
    let normalized = scale_to_18(&quantity.int, quantity.decimals);
    if normalized == "0" {
        return None;
    }
    let symbol = position
        .attributes
        .fungible_info
        .as_ref()
        .and_then(|info| info.symbol.clone())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    Some(TokenBalanceEntry {
        address: position.implementation_address().map(str::to_string),
        symbol,
        balance: normalized,
        decimals: quantity.decimals,
        chain: chain.to_string(),
    })
}

/// Map one indexer transaction. Status derivation: an explicit
/// `confirmed`/`success` wins, `failed`/`error` wins, otherwise positive
/// block confirmations mean success and anything else is pending. The first
/// transfer supplies the token symbol and recipient when present.
fn map_transaction(tx: &TransactionResource, chain: &str) -> TransactionEntry {
    let attributes = &tx.attributes;
    let status = match attributes.status.as_deref().map(str::to_lowercase).as_deref() {
        Some("confirmed") | Some("success") => TxStatus::Success,
        Some("failed") | Some("error") => TxStatus::Failed,
        _ => {
            if attributes.block_confirmations.unwrap_or(0) > 0 {
                TxStatus::Success
            } else {
                TxStatus::Pending
            }
        }
    };

    let first_transfer = attributes.transfers.first();
    let token_symbol = first_transfer
        .and_then(|transfer| transfer.fungible_info.as_ref())
        .and_then(|info| info.symbol.clone());
    let token_address = first_transfer
        .and_then(|transfer| transfer.fungible_info.as_ref())
        .and_then(|info| info.implementations.first())
        .and_then(|implementation| implementation.address.clone());
    let to = first_transfer
        .and_then(|transfer| transfer.recipient.clone())
        .or_else(|| attributes.sent_to.clone())
        .unwrap_or_default();
    let value = first_transfer
        .and_then(|transfer| transfer.quantity.as_ref())
        .map(|quantity| quantity.int.clone())
        .unwrap_or_else(|| "0".to_string());

    TransactionEntry {
        tx_hash: attributes.hash.clone().unwrap_or_default(),
        from: attributes.sent_from.clone().unwrap_or_default(),
        to,
        value,
        timestamp: attributes.mined_at.clone(),
        block_number: attributes.mined_at_block,
        status,
        chain: chain.to_string(),
        token_symbol,
        token_address,
    }
}

#[cfg(test)]
pub(crate) mod testsupport {
    //! Shared stubs for aggregator tests.

    use super::*;
    use crate::signer::{CallProvider, TransferCapability, TransferIntent};
    use alloy::primitives::U256;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scriptable signer account.
    pub struct StubAccount {
        pub address: String,
        pub native: Result<U256, String>,
        pub token: Option<U256>,
        pub provider: Option<Arc<dyn CallProvider>>,
        pub capabilities: Vec<TransferCapability>,
        /// Capabilities that fail when tried.
        pub failing: Vec<TransferCapability>,
        pub transfers: Mutex<Vec<(TransferCapability, TransferIntent)>>,
        pub delay: Option<Duration>,
        /// Set once derivation (including its delay) has completed.
        pub derived: std::sync::atomic::AtomicBool,
    }

    impl StubAccount {
        pub fn new(address: &str) -> Self {
            Self {
                address: address.to_string(),
                native: Ok(U256::ZERO),
                token: None,
                provider: None,
                capabilities: vec![
                    TransferCapability::NativeTransfer,
                    TransferCapability::TokenTransferByStruct,
                    TransferCapability::TokenTransferByTriple,
                    TransferCapability::GenericSend,
                ],
                failing: Vec::new(),
                transfers: Mutex::new(Vec::new()),
                delay: None,
                derived: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SignerAccount for StubAccount {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn native_balance(&self) -> Result<U256, WalletError> {
            self.native
                .clone()
                .map_err(WalletError::internal)
        }

        async fn token_balance(&self, _token: &str) -> Result<Option<U256>, WalletError> {
            Ok(self.token)
        }

        fn call_provider(&self) -> Option<Arc<dyn CallProvider>> {
            self.provider.clone()
        }

        fn capabilities(&self) -> Vec<TransferCapability> {
            self.capabilities.clone()
        }

        async fn transfer(
            &self,
            capability: TransferCapability,
            intent: &TransferIntent,
        ) -> Result<String, WalletError> {
            if self.failing.contains(&capability) {
                return Err(WalletError::internal(format!(
                    "capability {capability:?} rejected"
                )));
            }
            self.transfers
                .lock()
                .unwrap()
                .push((capability, intent.clone()));
            Ok("0xhash".to_string())
        }
    }

    /// Derivation service backed by a per-chain account map. Chains with no
    /// entry fail derivation.
    #[derive(Default)]
    pub struct StubDerivation {
        pub accounts: HashMap<&'static str, Arc<StubAccount>>,
    }

    #[async_trait]
    impl DerivationService for StubDerivation {
        async fn account(
            &self,
            _user_id: &str,
            chain: &ChainSpec,
        ) -> Result<Arc<dyn SignerAccount>, WalletError> {
            let account = self
                .accounts
                .get(chain.id)
                .cloned()
                .ok_or_else(|| WalletError::unavailable(format!("no signer for {}", chain.id)))?;
            if let Some(delay) = account.delay {
                tokio::time::sleep(delay).await;
            }
            account
                .derived
                .store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(account)
        }
    }

    /// Aggregator over stubbed derivation and the given indexer base URL.
    pub fn aggregator_with(
        accounts: HashMap<&'static str, Arc<StubAccount>>,
        indexer_url: String,
    ) -> MultiChainAggregator {
        let indexer = Arc::new(
            IndexerClient::new(crate::indexer::IndexerConfig::new(indexer_url, "test-key"))
                .unwrap(),
        );
        MultiChainAggregator::new(
            Arc::new(StubDerivation { accounts }),
            Arc::new(crate::store::InMemoryStore::new()),
            indexer,
        )
    }

    /// Accounts for every supported chain with distinct addresses.
    pub fn full_account_map() -> HashMap<&'static str, Arc<StubAccount>> {
        SUPPORTED_CHAINS
            .iter()
            .enumerate()
            .map(|(position, chain)| {
                (
                    chain.id,
                    Arc::new(StubAccount::new(&format!("0x{:040x}", position + 1))),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testsupport::*;
    use super::*;
    use crate::testutil::spawn_http_server;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn addresses_cover_every_chain_and_isolate_failures() {
        let mut accounts = full_account_map();
        accounts.remove(chains::TRON.id); // tron derivation will fail
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_http_server(vec![(200, "{}".to_string())], hits).await;
        let aggregator = aggregator_with(accounts, url);

        let addresses = aggregator.get_addresses("user-1").await.unwrap();
        assert_eq!(addresses.len(), SUPPORTED_CHAINS.len());

        let tron = addresses
            .iter()
            .find(|entry| entry.chain == "tron")
            .unwrap();
        assert!(tron.address.is_none());
        let base = addresses
            .iter()
            .find(|entry| entry.chain == "base")
            .unwrap();
        assert!(base.address.is_some());
    }

    #[tokio::test]
    async fn token_balances_normalize_and_omit_zero() {
        let body = r#"{"data": [
            {
                "id": "usdc",
                "attributes": {
                    "quantity": {"int": "1500000", "decimals": 6},
                    "fungible_info": {"symbol": "USDC", "implementations": [{"chain_id": "base", "address": "0x8335", "decimals": 6}]}
                },
                "relationships": {"chain": {"data": {"id": "base"}}}
            },
            {
                "id": "dust",
                "attributes": {
                    "quantity": {"int": "0", "decimals": 18},
                    "fungible_info": {"symbol": "DUST", "implementations": [{"chain_id": "base", "address": "0xdead", "decimals": 18}]}
                },
                "relationships": {"chain": {"data": {"id": "base"}}}
            },
            {
                "id": "eth",
                "attributes": {
                    "quantity": {"int": "2000000000000000000", "decimals": 18},
                    "fungible_info": {"symbol": "ETH", "implementations": []}
                },
                "relationships": {"chain": {"data": {"id": "base"}}}
            }
        ]}"#;
        let url = spawn_http_server(
            vec![(200, body.to_string())],
            Arc::new(AtomicUsize::new(0)),
        )
        .await;
        let aggregator = aggregator_with(full_account_map(), url);

        let balances = aggregator.get_token_balances("user-1", "base").await.unwrap();
        assert_eq!(balances.len(), 2, "zero balance must be omitted");

        let usdc = balances.iter().find(|entry| entry.symbol == "USDC").unwrap();
        assert_eq!(usdc.balance, "1500000000000000000");
        assert_eq!(usdc.address.as_deref(), Some("0x8335"));

        let eth = balances.iter().find(|entry| entry.symbol == "ETH").unwrap();
        assert!(eth.address.is_none());
    }

    #[tokio::test]
    async fn indexer_outage_degrades_to_signer_native() {
        let mut accounts = full_account_map();
        let account = Arc::get_mut(accounts.get_mut("base").unwrap()).unwrap();
        account.native = Ok(alloy::primitives::U256::from(3_000_000_000_000_000_000u64));

        let url = spawn_http_server(
            vec![(500, "{}".to_string())],
            Arc::new(AtomicUsize::new(0)),
        )
        .await;
        let aggregator = aggregator_with(accounts, url);

        let balances = aggregator.get_token_balances("user-1", "base").await.unwrap();
        assert_eq!(balances.len(), 1);
        assert!(balances[0].address.is_none());
        assert_eq!(balances[0].balance, "3000000000000000000");
        assert_eq!(balances[0].symbol, "ETH");
    }

    #[tokio::test]
    async fn history_maps_statuses() {
        let body = r#"{"data": [
            {"id": "t1", "attributes": {"hash": "0x01", "status": "confirmed", "sent_from": "0xa", "sent_to": "0xb"},
             "relationships": {"chain": {"data": {"id": "base"}}}},
            {"id": "t2", "attributes": {"hash": "0x02", "status": "failed", "sent_from": "0xa"},
             "relationships": {"chain": {"data": {"id": "base"}}}},
            {"id": "t3", "attributes": {"hash": "0x03", "block_confirmations": 12,
                "transfers": [{"fungible_info": {"symbol": "USDC", "implementations": [{"address": "0x8335"}]},
                               "quantity": {"int": "1000000", "decimals": 6}, "recipient": "0xbbb"}]},
             "relationships": {"chain": {"data": {"id": "base"}}}},
            {"id": "t4", "attributes": {"hash": "0x04"},
             "relationships": {"chain": {"data": {"id": "base"}}}}
        ]}"#;
        let url = spawn_http_server(
            vec![(200, body.to_string())],
            Arc::new(AtomicUsize::new(0)),
        )
        .await;
        let aggregator = aggregator_with(full_account_map(), url);

        let history = aggregator
            .get_transaction_history("user-1", "base", None)
            .await
            .unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].status, TxStatus::Success);
        assert_eq!(history[1].status, TxStatus::Failed);
        assert_eq!(history[2].status, TxStatus::Success);
        assert_eq!(history[3].status, TxStatus::Pending);

        // First transfer supplies recipient, value, and token metadata.
        assert_eq!(history[2].to, "0xbbb");
        assert_eq!(history[2].value, "1000000");
        assert_eq!(history[2].token_symbol.as_deref(), Some("USDC"));
        assert_eq!(history[2].token_address.as_deref(), Some("0x8335"));
    }

    #[tokio::test]
    async fn any_chain_aggregation_deduplicates() {
        // Every primary address returns the same portfolio, so dedupe must
        // collapse the duplicates.
        let body = r#"{"data": [
            {"id": "usdc-base", "attributes": {
                "quantity": {"int": "1500000", "decimals": 6},
                "fungible_info": {"symbol": "USDC", "implementations": [{"chain_id": "base", "address": "0x8335"}]}},
             "relationships": {"chain": {"data": {"id": "base"}}}},
            {"id": "usdc-polygon", "attributes": {
                "quantity": {"int": "2500000", "decimals": 6},
                "fungible_info": {"symbol": "USDC", "implementations": [{"chain_id": "polygon", "address": "0x3c49"}]}},
             "relationships": {"chain": {"data": {"id": "polygon"}}}}
        ]}"#;
        let url = spawn_http_server(
            vec![(200, body.to_string())],
            Arc::new(AtomicUsize::new(0)),
        )
        .await;
        let aggregator = aggregator_with(full_account_map(), url);

        let tokens = aggregator.get_token_balances_any("user-1").await.unwrap();
        assert_eq!(tokens.len(), 2);
        let chains_seen: Vec<&str> = tokens.iter().map(|entry| entry.chain.as_str()).collect();
        assert!(chains_seen.contains(&"base"));
        assert!(chains_seen.contains(&"polygon"));
    }

    #[tokio::test]
    async fn any_chain_transactions_deduplicate_by_hash() {
        let body = r#"{"data": [
            {"id": "t1", "attributes": {"hash": "0xAA", "status": "confirmed"},
             "relationships": {"chain": {"data": {"id": "base"}}}}
        ]}"#;
        let url = spawn_http_server(
            vec![(200, body.to_string())],
            Arc::new(AtomicUsize::new(0)),
        )
        .await;
        let aggregator = aggregator_with(full_account_map(), url);

        let transactions = aggregator.get_transactions_any("user-1").await.unwrap();
        assert_eq!(transactions.len(), 1, "same (chain, hash) must collapse");
    }
}
