// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistence interface for seeds, sessions, participants, and channels.
//!
//! The durable store (encrypted KV, database) lives outside this crate; the
//! controllers only depend on [`WalletStore`]. [`InMemoryStore`] is the
//! reference implementation used by tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::U256;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    normalize_address, AppSessionRecord, ChannelRecord, ParticipantRecord, ParticipantStatus,
    SeedRecord, SessionStatus,
};

/// Errors surfaced by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistence operations the controllers and the aggregator depend on.
///
/// Implementations must enforce the uniqueness constraints documented on the
/// row types: `(app_session_id, address, asset)` for participants and
/// `(user_id, chain_id)` for channels.
pub trait WalletStore: Send + Sync {
    /// Fetch the seed record for a user, creating one if absent.
    fn ensure_seed(&self, user_id: &str) -> Result<SeedRecord, StoreError>;

    fn insert_session(&self, session: AppSessionRecord) -> Result<(), StoreError>;

    fn session(&self, app_session_id: &str) -> Result<Option<AppSessionRecord>, StoreError>;

    /// Mark a session closed and bump its version. Closing an already-closed
    /// session is a no-op that returns the stored row.
    fn close_session(&self, app_session_id: &str, version: u64)
        -> Result<AppSessionRecord, StoreError>;

    fn set_session_version(&self, app_session_id: &str, version: u64) -> Result<(), StoreError>;

    /// Insert or replace the row keyed by `(app_session_id, address, asset)`.
    fn upsert_participant(&self, participant: ParticipantRecord) -> Result<(), StoreError>;

    fn participant(
        &self,
        app_session_id: &str,
        address: &str,
        asset: &str,
    ) -> Result<Option<ParticipantRecord>, StoreError>;

    fn participants(&self, app_session_id: &str) -> Result<Vec<ParticipantRecord>, StoreError>;

    /// Apply a set of balance updates for one session and asset atomically:
    /// either every row is written or none is.
    fn update_balances(
        &self,
        app_session_id: &str,
        asset: &str,
        updates: &[(String, U256)],
    ) -> Result<(), StoreError>;

    fn set_participant_status(
        &self,
        app_session_id: &str,
        address: &str,
        asset: &str,
        status: ParticipantStatus,
    ) -> Result<(), StoreError>;

    /// Insert or replace the channel row keyed by `(user_id, chain_id)`.
    fn upsert_channel(&self, channel: ChannelRecord) -> Result<(), StoreError>;

    fn channel(&self, channel_id: &str) -> Result<Option<ChannelRecord>, StoreError>;

    fn channels_for_user(&self, user_id: &str) -> Result<Vec<ChannelRecord>, StoreError>;
}

/// In-memory store over `HashMap`s behind a mutex.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    seeds: HashMap<String, SeedRecord>,
    sessions: HashMap<String, AppSessionRecord>,
    /// Keyed by `(app_session_id, address, asset)`.
    participants: HashMap<(String, String, String), ParticipantRecord>,
    /// Keyed by `(user_id, chain_id)`.
    channels: HashMap<(String, u64), ChannelRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }
}

impl WalletStore for InMemoryStore {
    fn ensure_seed(&self, user_id: &str) -> Result<SeedRecord, StoreError> {
        let mut tables = self.lock()?;
        let record = tables
            .seeds
            .entry(user_id.to_string())
            .or_insert_with(|| SeedRecord {
                user_id: user_id.to_string(),
                seed_id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
            });
        Ok(record.clone())
    }

    fn insert_session(&self, session: AppSessionRecord) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        tables
            .sessions
            .insert(session.app_session_id.clone(), session);
        Ok(())
    }

    fn session(&self, app_session_id: &str) -> Result<Option<AppSessionRecord>, StoreError> {
        Ok(self.lock()?.sessions.get(app_session_id).cloned())
    }

    fn close_session(
        &self,
        app_session_id: &str,
        version: u64,
    ) -> Result<AppSessionRecord, StoreError> {
        let mut tables = self.lock()?;
        let session = tables
            .sessions
            .get_mut(app_session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {app_session_id}")))?;
        if session.status == SessionStatus::Open {
            session.status = SessionStatus::Closed;
            session.version = version;
            session.closed_at = Some(Utc::now());
        }
        Ok(session.clone())
    }

    fn set_session_version(&self, app_session_id: &str, version: u64) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let session = tables
            .sessions
            .get_mut(app_session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {app_session_id}")))?;
        session.version = version;
        Ok(())
    }

    fn upsert_participant(&self, participant: ParticipantRecord) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let key = (
            participant.app_session_id.clone(),
            normalize_address(&participant.address),
            participant.asset.clone(),
        );
        tables.participants.insert(key, participant);
        Ok(())
    }

    fn participant(
        &self,
        app_session_id: &str,
        address: &str,
        asset: &str,
    ) -> Result<Option<ParticipantRecord>, StoreError> {
        let key = (
            app_session_id.to_string(),
            normalize_address(address),
            asset.to_string(),
        );
        Ok(self.lock()?.participants.get(&key).cloned())
    }

    fn participants(&self, app_session_id: &str) -> Result<Vec<ParticipantRecord>, StoreError> {
        let tables = self.lock()?;
        let mut rows: Vec<ParticipantRecord> = tables
            .participants
            .values()
            .filter(|row| row.app_session_id == app_session_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(rows)
    }

    fn update_balances(
        &self,
        app_session_id: &str,
        asset: &str,
        updates: &[(String, U256)],
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        // Validate every row exists before writing any of them.
        let keys: Vec<(String, String, String)> = updates
            .iter()
            .map(|(address, _)| {
                (
                    app_session_id.to_string(),
                    normalize_address(address),
                    asset.to_string(),
                )
            })
            .collect();
        for key in &keys {
            if !tables.participants.contains_key(key) {
                return Err(StoreError::NotFound(format!(
                    "participant {} in session {app_session_id}",
                    key.1
                )));
            }
        }
        for (key, (_, balance)) in keys.iter().zip(updates) {
            if let Some(row) = tables.participants.get_mut(key) {
                row.balance = *balance;
                row.last_seen_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn set_participant_status(
        &self,
        app_session_id: &str,
        address: &str,
        asset: &str,
        status: ParticipantStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let key = (
            app_session_id.to_string(),
            normalize_address(address),
            asset.to_string(),
        );
        let row = tables
            .participants
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("participant {address}")))?;
        row.status = status;
        Ok(())
    }

    fn upsert_channel(&self, channel: ChannelRecord) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let key = (channel.user_id.clone(), channel.chain_id);
        tables.channels.insert(key, channel);
        Ok(())
    }

    fn channel(&self, channel_id: &str) -> Result<Option<ChannelRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .channels
            .values()
            .find(|row| row.channel_id == channel_id)
            .cloned())
    }

    fn channels_for_user(&self, user_id: &str) -> Result<Vec<ChannelRecord>, StoreError> {
        let tables = self.lock()?;
        let mut rows: Vec<ChannelRecord> = tables
            .channels
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.chain_id);
        Ok(rows)
    }
}
