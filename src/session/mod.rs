// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # App-Session Controller
//!
//! Manages N-party off-chain sessions ("lightning nodes") hosted by the
//! clearing node. All four operations are purely off-chain:
//!
//! - `create` negotiates a weighted-quorum session definition and records a
//!   participant row per allocation,
//! - `deposit` raises one participant's balance (`DEPOSIT` intent),
//! - `transfer` moves funds between participants (`OPERATE` intent, total
//!   allocation per asset is conserved),
//! - `close` terminates the session; closing an already-closed session is a
//!   no-op returning the stored terminal state.
//!
//! The local participant signs every mutation with the session key;
//! co-participant signatures are aggregated by the clearing node and
//! validated against the quorum on its side. If local persistence fails
//! after a successful off-chain mutation, the controller logs a desync
//! warning and schedules a reconciliation read through the query service.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::U256;
use chrono::Utc;
use serde_json::{json, Value};

use crate::amount::to_smallest_units;
use crate::auth::SessionAuth;
use crate::error::WalletError;
use crate::models::{
    normalize_address, AppSessionRecord, ParticipantRecord, ParticipantStatus, SessionStatus,
};
use crate::query::QueryService;
use crate::rpc::{ClearingTransport, RequestSigner};
use crate::store::WalletStore;

/// Default session protocol version.
pub const DEFAULT_PROTOCOL: &str = "NitroRPC/0.4";

/// Default challenge window in seconds.
pub const DEFAULT_CHALLENGE_SECS: u64 = 3600;

/// Parameters for creating an app session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub participants: Vec<String>,
    pub weights: Vec<u64>,
    pub quorum: u64,
    pub asset: String,
    pub chain: String,
    /// Initial allocation per participant address, in human units.
    pub initial_allocations: HashMap<String, String>,
    pub protocol: String,
    pub challenge: u64,
}

impl CreateSessionRequest {
    pub fn new(
        participants: Vec<String>,
        weights: Vec<u64>,
        quorum: u64,
        asset: impl Into<String>,
        chain: impl Into<String>,
    ) -> Self {
        Self {
            participants,
            weights,
            quorum,
            asset: asset.into(),
            chain: chain.into(),
            initial_allocations: HashMap::new(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            challenge: DEFAULT_CHALLENGE_SECS,
        }
    }

    pub fn with_allocation(mut self, participant: impl Into<String>, amount: impl Into<String>) -> Self {
        self.initial_allocations
            .insert(participant.into(), amount.into());
        self
    }
}

/// A freshly created session with its initial participant rows.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub app_session_id: String,
    pub version: u64,
    pub status: SessionStatus,
    pub participants: Vec<ParticipantRecord>,
}

/// Off-chain session orchestration.
pub struct AppSessionController {
    transport: ClearingTransport,
    auth: Arc<SessionAuth>,
    store: Arc<dyn WalletStore>,
    query: Option<Arc<QueryService>>,
}

impl AppSessionController {
    pub fn new(
        transport: ClearingTransport,
        auth: Arc<SessionAuth>,
        store: Arc<dyn WalletStore>,
        query: Option<Arc<QueryService>>,
    ) -> Self {
        Self {
            transport,
            auth,
            store,
            query,
        }
    }

    fn asset_decimals(&self, asset: &str) -> Result<u8, WalletError> {
        self.transport
            .find_asset(asset, None)
            .map(|entry| entry.decimals)
            .ok_or_else(|| {
                WalletError::precondition_failed(format!(
                    "asset {asset} is not in the clearing node catalogue"
                ))
            })
    }

    /// Create a session and persist one participant row per member.
    pub async fn create(&self, request: CreateSessionRequest) -> Result<CreatedSession, WalletError> {
        if request.participants.is_empty() {
            return Err(WalletError::invalid_argument(
                "a session needs at least one participant",
            ));
        }
        if request.participants.len() != request.weights.len() {
            return Err(WalletError::invalid_argument(format!(
                "{} participants but {} weights",
                request.participants.len(),
                request.weights.len()
            )));
        }
        let total_weight: u64 = request.weights.iter().sum();
        if request.quorum == 0 || request.quorum > total_weight {
            return Err(WalletError::invalid_argument(format!(
                "quorum {} is not satisfiable by total weight {total_weight}",
                request.quorum
            )));
        }

        let members: Vec<String> = request
            .participants
            .iter()
            .map(|address| normalize_address(address))
            .collect();
        for address in request.initial_allocations.keys() {
            if !members.contains(&normalize_address(address)) {
                return Err(WalletError::invalid_argument(format!(
                    "allocation for {address} who is not a participant"
                )));
            }
        }

        let decimals = self.asset_decimals(&request.asset)?;
        let mut balances: HashMap<String, U256> = members
            .iter()
            .map(|address| (address.clone(), U256::ZERO))
            .collect();
        for (address, human) in &request.initial_allocations {
            balances.insert(normalize_address(address), to_smallest_units(human, decimals)?);
        }

        let allocations: Vec<Value> = members
            .iter()
            .map(|address| {
                json!({
                    "participant": address,
                    "asset": request.asset,
                    "amount": balances[address].to_string(),
                })
            })
            .collect();

        let payload = self
            .transport
            .request(
                "create_app_session",
                json!({
                    "definition": {
                        "protocol": request.protocol,
                        "participants": members,
                        "weights": request.weights,
                        "quorum": request.quorum,
                        "challenge": request.challenge,
                        "nonce": crate::rpc::now_ms(),
                    },
                    "allocations": allocations,
                }),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;

        let app_session_id = payload
            .get("app_session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WalletError::internal("create_app_session reply carried no app_session_id")
            })?
            .to_string();
        let version = payload.get("version").and_then(Value::as_u64).unwrap_or(1);

        let session = AppSessionRecord {
            app_session_id: app_session_id.clone(),
            status: SessionStatus::Open,
            version,
            protocol: request.protocol.clone(),
            participants: members.clone(),
            weights: request.weights.clone(),
            quorum: request.quorum,
            challenge: request.challenge,
            asset: request.asset.clone(),
            chain: request.chain.clone(),
            created_at: Utc::now(),
            closed_at: None,
        };

        let mut rows = Vec::new();
        for (position, address) in members.iter().enumerate() {
            rows.push(ParticipantRecord {
                app_session_id: app_session_id.clone(),
                address: address.clone(),
                weight: request.weights[position],
                balance: balances[address],
                asset: request.asset.clone(),
                status: ParticipantStatus::Invited,
                last_seen_at: None,
            });
        }

        let persisted = self.store.insert_session(session).and_then(|()| {
            rows.iter()
                .try_for_each(|row| self.store.upsert_participant(row.clone()))
        });
        if let Err(e) = persisted {
            self.report_desync(&app_session_id, &e.to_string());
        }

        Ok(CreatedSession {
            app_session_id,
            version,
            status: SessionStatus::Open,
            participants: rows,
        })
    }

    /// Raise one participant's balance with a `DEPOSIT` mutation.
    ///
    /// Returns the participant's new balance in smallest units.
    pub async fn deposit(
        &self,
        app_session_id: &str,
        participant: &str,
        amount: &str,
        asset: &str,
    ) -> Result<U256, WalletError> {
        let session = self.open_session(app_session_id)?;
        let row = self.known_participant(app_session_id, participant, asset)?;
        let decimals = self.asset_decimals(asset)?;
        let delta = to_smallest_units(amount, decimals)?;
        if delta.is_zero() {
            return Err(WalletError::invalid_argument("deposit amount must be positive"));
        }

        let new_balance = row.balance + delta;
        let allocations =
            self.allocation_rows(app_session_id, asset, &[(row.address.clone(), new_balance)])?;

        let payload = self
            .transport
            .request(
                "operate_app_session",
                json!({
                    "app_session_id": app_session_id,
                    "intent": "deposit",
                    "allocations": allocations,
                }),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        let version = payload
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(session.version + 1);

        let persisted = self
            .store
            .update_balances(app_session_id, asset, &[(row.address.clone(), new_balance)])
            .and_then(|()| {
                self.store.set_participant_status(
                    app_session_id,
                    &row.address,
                    asset,
                    ParticipantStatus::Joined,
                )
            })
            .and_then(|()| self.store.set_session_version(app_session_id, version));
        if let Err(e) = persisted {
            self.report_desync(app_session_id, &e.to_string());
        }

        Ok(new_balance)
    }

    /// Move funds between two participants with an `OPERATE` mutation.
    ///
    /// Returns the `(sender, recipient)` balances after the transfer.
    pub async fn transfer(
        &self,
        app_session_id: &str,
        from: &str,
        to: &str,
        amount: &str,
        asset: &str,
    ) -> Result<(U256, U256), WalletError> {
        let session = self.open_session(app_session_id)?;
        let sender = self.known_participant(app_session_id, from, asset)?;
        let recipient = self.known_participant(app_session_id, to, asset)?;
        if sender.address == recipient.address {
            return Err(WalletError::invalid_argument(
                "transfer sender and recipient must differ",
            ));
        }

        // An invited participant may only receive or deposit. A participant
        // funded at creation counts as joined the moment it first spends.
        if sender.status == ParticipantStatus::Invited && sender.balance.is_zero() {
            return Err(WalletError::precondition_failed(format!(
                "participant {from} has not joined the session"
            )));
        }

        let decimals = self.asset_decimals(asset)?;
        let delta = to_smallest_units(amount, decimals)?;
        if delta.is_zero() {
            return Err(WalletError::invalid_argument("transfer amount must be positive"));
        }
        if sender.balance < delta {
            return Err(WalletError::precondition_failed(format!(
                "insufficient session balance: {from} holds {} but {} is required",
                sender.balance, delta
            )));
        }

        let sender_balance = sender.balance - delta;
        let recipient_balance = recipient.balance + delta;
        let updates = [
            (sender.address.clone(), sender_balance),
            (recipient.address.clone(), recipient_balance),
        ];
        let allocations = self.allocation_rows(app_session_id, asset, &updates)?;

        let payload = self
            .transport
            .request(
                "operate_app_session",
                json!({
                    "app_session_id": app_session_id,
                    "intent": "operate",
                    "allocations": allocations,
                }),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        let version = payload
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(session.version + 1);

        let persisted = self
            .store
            .update_balances(app_session_id, asset, &updates)
            .and_then(|()| {
                if sender.status == ParticipantStatus::Invited {
                    self.store.set_participant_status(
                        app_session_id,
                        &sender.address,
                        asset,
                        ParticipantStatus::Joined,
                    )
                } else {
                    Ok(())
                }
            })
            .and_then(|()| self.store.set_session_version(app_session_id, version));
        if let Err(e) = persisted {
            self.report_desync(app_session_id, &e.to_string());
        }

        Ok((sender_balance, recipient_balance))
    }

    /// Close a session. Closing an already-closed session skips the RPC and
    /// returns the stored terminal state.
    pub async fn close(&self, app_session_id: &str) -> Result<AppSessionRecord, WalletError> {
        let session = self
            .store
            .session(app_session_id)
            .map_err(|e| WalletError::internal(format!("load session: {e}")))?
            .ok_or_else(|| WalletError::not_found(format!("session {app_session_id}")))?;
        if session.status == SessionStatus::Closed {
            return Ok(session);
        }

        let payload = self
            .transport
            .request(
                "close_app_session",
                json!({"app_session_id": app_session_id}),
                Some(self.auth.as_ref() as &dyn RequestSigner),
            )
            .await?;
        let version = payload
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(session.version + 1);

        match self.store.close_session(app_session_id, version) {
            Ok(record) => Ok(record),
            Err(e) => {
                self.report_desync(app_session_id, &e.to_string());
                Ok(AppSessionRecord {
                    status: SessionStatus::Closed,
                    version,
                    closed_at: Some(Utc::now()),
                    ..session
                })
            }
        }
    }

    fn open_session(&self, app_session_id: &str) -> Result<AppSessionRecord, WalletError> {
        let session = self
            .store
            .session(app_session_id)
            .map_err(|e| WalletError::internal(format!("load session: {e}")))?
            .ok_or_else(|| WalletError::not_found(format!("session {app_session_id}")))?;
        if session.status == SessionStatus::Closed {
            return Err(WalletError::precondition_failed(format!(
                "session {app_session_id} is closed"
            )));
        }
        Ok(session)
    }

    fn known_participant(
        &self,
        app_session_id: &str,
        address: &str,
        asset: &str,
    ) -> Result<ParticipantRecord, WalletError> {
        self.store
            .participant(app_session_id, address, asset)
            .map_err(|e| WalletError::internal(format!("load participant: {e}")))?
            .ok_or_else(|| {
                WalletError::precondition_failed(format!(
                    "{address} holds no {asset} position in session {app_session_id}"
                ))
            })
    }

    /// Build the full allocations vector for a mutation: every current
    /// balance, with the given rows replaced.
    fn allocation_rows(
        &self,
        app_session_id: &str,
        asset: &str,
        replacements: &[(String, U256)],
    ) -> Result<Vec<Value>, WalletError> {
        let rows = self
            .store
            .participants(app_session_id)
            .map_err(|e| WalletError::internal(format!("load participants: {e}")))?;
        Ok(rows
            .iter()
            .filter(|row| row.asset == asset)
            .map(|row| {
                let balance = replacements
                    .iter()
                    .find(|(address, _)| normalize_address(address) == row.address)
                    .map(|(_, balance)| *balance)
                    .unwrap_or(row.balance);
                json!({
                    "participant": row.address,
                    "asset": asset,
                    "amount": balance.to_string(),
                })
            })
            .collect())
    }

    fn report_desync(&self, app_session_id: &str, error: &str) {
        tracing::warn!(
            app_session_id,
            error,
            "local state desynchronized from clearing node, scheduling reconciliation"
        );
        if let Some(query) = &self.query {
            let query = Arc::clone(query);
            let id = app_session_id.to_string();
            tokio::spawn(async move {
                match query.get_app_session(&id).await {
                    Ok(_) => tracing::info!(app_session_id = %id, "reconciliation read completed"),
                    Err(e) => {
                        tracing::warn!(app_session_id = %id, error = %e, "reconciliation read failed")
                    }
                }
            });
        }
    }
}
