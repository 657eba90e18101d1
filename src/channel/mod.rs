// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment-Channel Controller
//!
//! Orchestrates the two-phase protocol for 2-party payment channels:
//!
//! - **Phase A** (off-chain): a signed RPC to the clearing node negotiates
//!   the channel tuple or the next state, countersigned by the node.
//! - **Phase B** (on-chain): the custody contract call is submitted through
//!   the external [`CustodySubmitter`] with exactly the two signatures from
//!   Phase A, in `[user, server]` order, and one confirmation is awaited.
//!
//! A failure after Phase A succeeded surfaces as the distinct
//! `OnchainFailed` error kind so operational tooling can reconcile instead
//! of renegotiating blindly.

pub mod custody;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, I256, U256};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::auth::SessionAuth;
use crate::error::WalletError;
use crate::models::{ChannelRecord, ChannelRecordStatus};
use crate::rpc::{ClearingTransport, RequestSigner};
use crate::store::WalletStore;

pub use custody::{AllocationEntry, ChannelState, ChannelTuple, StateIntent};

/// Receipt for one confirmed custody-contract submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub success: bool,
}

/// External on-chain submitter. Implementations own gas, nonces, and the
/// RPC node; this crate only hands them calldata and awaits one receipt.
#[async_trait]
pub trait CustodySubmitter: Send + Sync {
    async fn submit(
        &self,
        chain_id: u64,
        to: Address,
        calldata: Vec<u8>,
    ) -> Result<SubmissionReceipt, WalletError>;
}

/// Result of a channel create.
#[derive(Debug, Clone)]
pub struct CreatedChannel {
    pub channel: ChannelTuple,
    pub channel_id: String,
    pub state: ChannelState,
    pub chain_id: u64,
    pub status: ChannelRecordStatus,
}

/// Result of a resize or close.
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub state: ChannelState,
    pub tx_hash: String,
    pub status: ChannelRecordStatus,
}

/// Two-phase channel orchestration.
pub struct ChannelController {
    transport: ClearingTransport,
    auth: Arc<SessionAuth>,
    submitter: Arc<dyn CustodySubmitter>,
    custody_addresses: HashMap<u64, Address>,
    store: Arc<dyn WalletStore>,
}

impl ChannelController {
    pub fn new(
        transport: ClearingTransport,
        auth: Arc<SessionAuth>,
        submitter: Arc<dyn CustodySubmitter>,
        custody_addresses: HashMap<u64, Address>,
        store: Arc<dyn WalletStore>,
    ) -> Self {
        Self {
            transport,
            auth,
            submitter,
            custody_addresses,
            store,
        }
    }

    fn custody_address(&self, chain_id: u64) -> Result<Address, WalletError> {
        self.custody_addresses.get(&chain_id).copied().ok_or_else(|| {
            WalletError::invalid_argument(format!("no custody contract configured for chain {chain_id}"))
        })
    }

    /// Negotiate and open a channel, then anchor it on-chain.
    pub async fn create_channel(
        &self,
        user_id: &str,
        chain_id: u64,
        token: &str,
        initial_deposit: Option<U256>,
    ) -> Result<CreatedChannel, WalletError> {
        let custody = self.custody_address(chain_id)?;

        let payload = self
            .transport
            .request(
                "create_channel",
                json!({"chain_id": chain_id, "token": token}),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;

        let channel = parse_channel(
            payload
                .get("channel")
                .ok_or_else(|| WalletError::internal("create_channel reply carried no channel"))?,
        )?;
        let channel_id = channel.channel_id();
        let channel_id_hex = format!("{channel_id:#x}");

        // Cross-check any server echo against the locally derived id.
        if let Some(echo) = payload.get("channel_id").and_then(Value::as_str) {
            if !echo.eq_ignore_ascii_case(&channel_id_hex) {
                return Err(WalletError::internal(format!(
                    "channel id mismatch: derived {channel_id_hex}, node echoed {echo}"
                )));
            }
        }

        let sigs = signature_pair(&payload)?;
        let state = ChannelState::initial(initial_deposit.unwrap_or(U256::ZERO));

        let receipt = self
            .submit(chain_id, custody, custody::encode_create(channel_id, &state, sigs))
            .await?;
        if !receipt.success {
            return Err(WalletError::OnchainFailed(format!(
                "create reverted in tx {}",
                receipt.tx_hash
            )));
        }

        self.persist(ChannelRecord {
            channel_id: channel_id_hex.clone(),
            user_id: user_id.to_string(),
            chain_id,
            token: token.to_string(),
            version: state.version,
            status: ChannelRecordStatus::Active,
            updated_at: Utc::now(),
        })?;

        Ok(CreatedChannel {
            channel,
            channel_id: channel_id_hex,
            state,
            chain_id,
            status: ChannelRecordStatus::Active,
        })
    }

    /// Negotiate a resized state and submit it on-chain.
    ///
    /// `delta` is the signed change of the user's allocation, in the
    /// channel token's smallest units.
    pub async fn resize_channel(
        &self,
        channel_id: &str,
        chain_id: u64,
        delta: I256,
    ) -> Result<ChannelOutcome, WalletError> {
        let custody = self.custody_address(chain_id)?;
        let record = self.known_channel(channel_id)?;

        let payload = self
            .transport
            .request(
                "resize_channel",
                json!({"channel_id": channel_id, "resize_amount": delta.to_string()}),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;

        let state = parse_state(
            payload
                .get("state")
                .ok_or_else(|| WalletError::internal("resize_channel reply carried no state"))?,
        )?;
        if state.intent != StateIntent::Resize {
            return Err(WalletError::internal(format!(
                "resize_channel returned intent {:?}",
                state.intent
            )));
        }
        if state.version <= record.version {
            return Err(WalletError::internal(format!(
                "state version must strictly increase ({} -> {})",
                record.version, state.version
            )));
        }

        let sigs = signature_pair(&payload)?;
        let id = parse_channel_id(channel_id)?;
        let receipt = self
            .submit(chain_id, custody, custody::encode_resize(id, &state, sigs))
            .await?;
        if !receipt.success {
            return Err(WalletError::OnchainFailed(format!(
                "resize reverted in tx {}",
                receipt.tx_hash
            )));
        }

        self.persist(ChannelRecord {
            version: state.version,
            updated_at: Utc::now(),
            ..record
        })?;

        Ok(ChannelOutcome {
            channel_id: channel_id.to_string(),
            state,
            tx_hash: receipt.tx_hash,
            status: ChannelRecordStatus::Active,
        })
    }

    /// Negotiate the final state and close the channel on-chain. Remaining
    /// funds are released to `destination`.
    pub async fn close_channel(
        &self,
        channel_id: &str,
        chain_id: u64,
        destination: Address,
    ) -> Result<ChannelOutcome, WalletError> {
        let custody = self.custody_address(chain_id)?;
        let record = self.known_channel(channel_id)?;

        let payload = self
            .transport
            .request(
                "close_channel",
                json!({
                    "channel_id": channel_id,
                    "funds_destination": format!("{destination:#x}"),
                }),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;

        let state = parse_state(
            payload
                .get("state")
                .ok_or_else(|| WalletError::internal("close_channel reply carried no state"))?,
        )?;
        if state.intent != StateIntent::Finalize {
            return Err(WalletError::internal(format!(
                "close_channel returned intent {:?}",
                state.intent
            )));
        }
        if state.version <= record.version {
            return Err(WalletError::internal(format!(
                "state version must strictly increase ({} -> {})",
                record.version, state.version
            )));
        }

        let sigs = signature_pair(&payload)?;
        let id = parse_channel_id(channel_id)?;
        let receipt = self
            .submit(chain_id, custody, custody::encode_close(id, &state, sigs))
            .await?;
        if !receipt.success {
            return Err(WalletError::OnchainFailed(format!(
                "close reverted in tx {}",
                receipt.tx_hash
            )));
        }

        self.persist(ChannelRecord {
            version: state.version,
            status: ChannelRecordStatus::Closed,
            updated_at: Utc::now(),
            ..record
        })?;

        Ok(ChannelOutcome {
            channel_id: channel_id.to_string(),
            state,
            tx_hash: receipt.tx_hash,
            status: ChannelRecordStatus::Closed,
        })
    }

    fn known_channel(&self, channel_id: &str) -> Result<ChannelRecord, WalletError> {
        self.store
            .channel(channel_id)
            .map_err(|e| WalletError::internal(format!("load channel: {e}")))?
            .ok_or_else(|| WalletError::not_found(format!("channel {channel_id}")))
    }

    /// Submitter errors after a successful negotiation are partial outcomes.
    async fn submit(
        &self,
        chain_id: u64,
        custody: Address,
        calldata: Vec<u8>,
    ) -> Result<SubmissionReceipt, WalletError> {
        self.submitter
            .submit(chain_id, custody, calldata)
            .await
            .map_err(|e| WalletError::OnchainFailed(e.to_string()))
    }

    fn persist(&self, record: ChannelRecord) -> Result<(), WalletError> {
        self.store
            .upsert_channel(record)
            .map_err(|e| WalletError::internal(format!("persist channel: {e}")))
    }
}

fn parse_channel_id(channel_id: &str) -> Result<alloy::primitives::B256, WalletError> {
    alloy::primitives::B256::from_str(channel_id)
        .map_err(|e| WalletError::invalid_argument(format!("malformed channel id: {e}")))
}

/// Accepts u64 numbers, decimal strings, and 0x-hex strings.
fn parse_u256(value: &Value, field: &str) -> Result<U256, WalletError> {
    if let Some(number) = value.as_u64() {
        return Ok(U256::from(number));
    }
    if let Some(text) = value.as_str() {
        let parsed = if let Some(hex) = text.strip_prefix("0x") {
            U256::from_str_radix(hex, 16)
        } else {
            U256::from_str_radix(text, 10)
        };
        return parsed
            .map_err(|e| WalletError::internal(format!("malformed {field}: {e}")));
    }
    Err(WalletError::internal(format!("malformed {field}: {value}")))
}

fn parse_address(value: &Value, field: &str) -> Result<Address, WalletError> {
    value
        .as_str()
        .and_then(|text| Address::from_str(text).ok())
        .ok_or_else(|| WalletError::internal(format!("malformed {field}: {value}")))
}

/// Parse the channel tuple from a clearing-node payload.
fn parse_channel(value: &Value) -> Result<ChannelTuple, WalletError> {
    let participants = value
        .get("participants")
        .and_then(Value::as_array)
        .ok_or_else(|| WalletError::internal("channel payload carried no participants"))?;
    if participants.len() != 2 {
        return Err(WalletError::internal(format!(
            "expected 2 channel participants, got {}",
            participants.len()
        )));
    }
    Ok(ChannelTuple {
        participants: [
            parse_address(&participants[0], "participants[0]")?,
            parse_address(&participants[1], "participants[1]")?,
        ],
        adjudicator: parse_address(
            value
                .get("adjudicator")
                .unwrap_or(&Value::Null),
            "adjudicator",
        )?,
        challenge: parse_u256(value.get("challenge").unwrap_or(&Value::Null), "challenge")?,
        nonce: parse_u256(value.get("nonce").unwrap_or(&Value::Null), "nonce")?,
    })
}

/// Parse a negotiated state from a clearing-node payload.
fn parse_state(value: &Value) -> Result<ChannelState, WalletError> {
    let intent: StateIntent = serde_json::from_value(
        value
            .get("intent")
            .cloned()
            .ok_or_else(|| WalletError::internal("state payload carried no intent"))?,
    )
    .map_err(|e| WalletError::internal(format!("malformed state intent: {e}")))?;

    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| WalletError::internal("state payload carried no version"))?;

    let data = match value.get("data").and_then(Value::as_str) {
        Some(hex) => custody::signature_bytes(hex)?,
        None => Bytes::new(),
    };

    let mut allocations = Vec::new();
    if let Some(rows) = value.get("allocations").and_then(Value::as_array) {
        for (position, row) in rows.iter().enumerate() {
            allocations.push(AllocationEntry {
                index: parse_u256(
                    row.get("index").unwrap_or(&Value::Null),
                    &format!("allocations[{position}].index"),
                )?,
                amount: parse_u256(
                    row.get("amount").unwrap_or(&Value::Null),
                    &format!("allocations[{position}].amount"),
                )?,
            });
        }
    }

    Ok(ChannelState {
        intent,
        version,
        data,
        allocations,
    })
}

/// Extract the `[user, server]` signature pair, preserving order.
fn signature_pair(payload: &Value) -> Result<Vec<Bytes>, WalletError> {
    let user = payload
        .get("user_signature")
        .and_then(Value::as_str)
        .ok_or_else(|| WalletError::internal("reply carried no user_signature"))?;
    let server = payload
        .get("server_signature")
        .and_then(Value::as_str)
        .ok_or_else(|| WalletError::internal("reply carried no server_signature"))?;
    Ok(vec![
        custody::signature_bytes(user)?,
        custody::signature_bytes(server)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::testutil::{connected_transport, spawn_rpc_server, test_auth};
    use custody::ICustody;
    use alloy::sol_types::SolCall;
    use serde_json::json;
    use std::sync::Mutex;

    const CUSTODY: &str = "0x4444444444444444444444444444444444444444";

    /// Records submissions; scripted success per call.
    struct RecordingSubmitter {
        calls: Mutex<Vec<(u64, Address, Vec<u8>)>>,
        succeed: bool,
    }

    impl RecordingSubmitter {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                succeed,
            })
        }
    }

    #[async_trait]
    impl CustodySubmitter for RecordingSubmitter {
        async fn submit(
            &self,
            chain_id: u64,
            to: Address,
            calldata: Vec<u8>,
        ) -> Result<SubmissionReceipt, WalletError> {
            self.calls.lock().unwrap().push((chain_id, to, calldata));
            Ok(SubmissionReceipt {
                tx_hash: "0xfeed".to_string(),
                block_number: 1200,
                success: self.succeed,
            })
        }
    }

    fn channel_payload() -> Value {
        json!({
            "participants": [
                "0x1111111111111111111111111111111111111111",
                "0x2222222222222222222222222222222222222222"
            ],
            "adjudicator": "0x3333333333333333333333333333333333333333",
            "challenge": 3600,
            "nonce": "7"
        })
    }

    fn controller(
        transport: ClearingTransport,
        submitter: Arc<RecordingSubmitter>,
        store: Arc<InMemoryStore>,
    ) -> ChannelController {
        let mut custody_addresses = HashMap::new();
        custody_addresses.insert(8453u64, Address::from_str(CUSTODY).unwrap());
        ChannelController::new(transport, test_auth(), submitter, custody_addresses, store)
    }

    #[tokio::test]
    async fn create_channel_runs_both_phases() {
        let url = spawn_rpc_server(|method, _params| {
            assert_eq!(method, "create_channel");
            Ok(json!({
                "channel": channel_payload(),
                "user_signature": format!("0x{}", "11".repeat(65)),
                "server_signature": format!("0x{}", "22".repeat(65)),
            }))
        })
        .await;
        let transport = connected_transport(url).await;
        let submitter = RecordingSubmitter::new(true);
        let store = Arc::new(InMemoryStore::new());
        let controller = controller(transport.clone(), Arc::clone(&submitter), Arc::clone(&store));

        let created = controller
            .create_channel("user-1", 8453, "usdc", Some(U256::from(10_000_000u64)))
            .await
            .unwrap();

        assert_eq!(created.state.intent, StateIntent::Initialize);
        assert_eq!(created.state.version, 0);
        assert_eq!(created.status, ChannelRecordStatus::Active);
        assert!(created.channel_id.starts_with("0x"));

        // On-chain call carried both signatures in [user, server] order.
        let calls = submitter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let decoded = ICustody::createCall::abi_decode(&calls[0].2).unwrap();
        assert_eq!(decoded.sigs.len(), 2);
        assert_eq!(decoded.sigs[0].as_ref()[0], 0x11);
        assert_eq!(decoded.sigs[1].as_ref()[0], 0x22);
        assert_eq!(decoded.state.allocations[0].amount, U256::from(10_000_000u64));

        // Local row persisted under (user, chain).
        let rows = store.channels_for_user("user-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 0);

        transport.close().await;
    }

    #[tokio::test]
    async fn create_channel_rejects_mismatched_echo() {
        let url = spawn_rpc_server(|_method, _params| {
            Ok(json!({
                "channel": channel_payload(),
                "channel_id": format!("0x{}", "ab".repeat(32)),
                "user_signature": "0x11",
                "server_signature": "0x22",
            }))
        })
        .await;
        let transport = connected_transport(url).await;
        let controller = controller(
            transport.clone(),
            RecordingSubmitter::new(true),
            Arc::new(InMemoryStore::new()),
        );

        let err = controller
            .create_channel("user-1", 8453, "usdc", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel id mismatch"));
        transport.close().await;
    }

    #[tokio::test]
    async fn onchain_revert_is_a_partial_outcome() {
        let url = spawn_rpc_server(|_method, _params| {
            Ok(json!({
                "channel": channel_payload(),
                "user_signature": "0x11",
                "server_signature": "0x22",
            }))
        })
        .await;
        let transport = connected_transport(url).await;
        let store = Arc::new(InMemoryStore::new());
        let controller = controller(
            transport.clone(),
            RecordingSubmitter::new(false),
            Arc::clone(&store),
        );

        let err = controller
            .create_channel("user-1", 8453, "usdc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::OnchainFailed(_)));
        assert!(store.channels_for_user("user-1").unwrap().is_empty());
        transport.close().await;
    }

    #[tokio::test]
    async fn missing_custody_address_fails_before_any_rpc() {
        let url = spawn_rpc_server(|_m, _p| panic!("no RPC expected")).await;
        let transport = connected_transport(url).await;
        let controller = controller(
            transport.clone(),
            RecordingSubmitter::new(true),
            Arc::new(InMemoryStore::new()),
        );

        let err = controller
            .create_channel("user-1", 42161, "usdc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidArgument(_)));
        transport.close().await;
    }

    fn seeded_store(channel_id: &str, version: u64) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_channel(ChannelRecord {
                channel_id: channel_id.to_string(),
                user_id: "user-1".to_string(),
                chain_id: 8453,
                token: "usdc".to_string(),
                version,
                status: ChannelRecordStatus::Active,
                updated_at: Utc::now(),
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn resize_requires_a_strictly_newer_version() {
        let channel_id = format!("0x{}", "cd".repeat(32));
        let url = spawn_rpc_server(|method, _params| {
            assert_eq!(method, "resize_channel");
            Ok(json!({
                "state": {
                    "intent": "RESIZE",
                    "version": 3,
                    "data": "0x",
                    "allocations": [
                        {"index": 0, "amount": "15000000"},
                        {"index": 1, "amount": 0}
                    ]
                },
                "user_signature": "0x11",
                "server_signature": "0x22",
            }))
        })
        .await;
        let transport = connected_transport(url).await;
        let submitter = RecordingSubmitter::new(true);

        // Stored version 3 == negotiated version 3: stale, refused locally.
        let controller_stale = controller(
            transport.clone(),
            Arc::clone(&submitter),
            seeded_store(&channel_id, 3),
        );
        let err = controller_stale
            .resize_channel(&channel_id, 8453, I256::try_from(5_000_000i64).unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("strictly increase"));

        // Stored version 2 < negotiated version 3: accepted and persisted.
        let store = seeded_store(&channel_id, 2);
        let controller_ok = controller(transport.clone(), submitter, Arc::clone(&store));
        let outcome = controller_ok
            .resize_channel(&channel_id, 8453, I256::try_from(5_000_000i64).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.state.version, 3);
        assert_eq!(store.channel(&channel_id).unwrap().unwrap().version, 3);

        transport.close().await;
    }

    #[tokio::test]
    async fn close_channel_finalizes_and_marks_closed() {
        let channel_id = format!("0x{}", "ef".repeat(32));
        let url = spawn_rpc_server(|method, params| {
            assert_eq!(method, "close_channel");
            assert!(params["funds_destination"].as_str().unwrap().starts_with("0x"));
            Ok(json!({
                "state": {
                    "intent": "FINALIZE",
                    "version": 5,
                    "data": "0x",
                    "allocations": [
                        {"index": 0, "amount": "15000000"},
                        {"index": 1, "amount": 0}
                    ]
                },
                "user_signature": "0x11",
                "server_signature": "0x22",
            }))
        })
        .await;
        let transport = connected_transport(url).await;
        let store = seeded_store(&channel_id, 4);
        let controller = controller(transport.clone(), RecordingSubmitter::new(true), Arc::clone(&store));

        let outcome = controller
            .close_channel(
                &channel_id,
                8453,
                Address::from_str("0x1111111111111111111111111111111111111111").unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, ChannelRecordStatus::Closed);
        assert_eq!(outcome.state.intent, StateIntent::Finalize);
        let row = store.channel(&channel_id).unwrap().unwrap();
        assert_eq!(row.status, ChannelRecordStatus::Closed);
        assert_eq!(row.version, 5);

        transport.close().await;
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let url = spawn_rpc_server(|_m, _p| panic!("no RPC expected")).await;
        let transport = connected_transport(url).await;
        let controller = controller(
            transport.clone(),
            RecordingSubmitter::new(true),
            Arc::new(InMemoryStore::new()),
        );

        let err = controller
            .resize_channel(
                &format!("0x{}", "00".repeat(32)),
                8453,
                I256::try_from(1i64).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::NotFound(_)));
        transport.close().await;
    }
}
