// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Server-push notification dispatch.
//!
//! The read loop classifies any envelope whose id is not pending as a
//! notification and hands it to the registry. Subscribers receive
//! notifications through a bounded channel so a slow consumer can never
//! stall the read loop; dispatch uses `try_send` and drops on a full buffer.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::WalletError;
use crate::models::{LedgerBalance, LedgerTransaction};

/// Default per-subscriber buffer.
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Recognized notification methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// `bu`: ledger balance update.
    BalanceUpdate,
    /// `cu`: payment channel update.
    ChannelUpdate,
    /// `tr`: ledger transfer.
    Transfer,
    /// `asu`: app-session update.
    AppSessionUpdate,
    /// `assets`: full asset catalogue replacement.
    Assets,
}

impl NotificationKind {
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "bu" => Some(Self::BalanceUpdate),
            "cu" => Some(Self::ChannelUpdate),
            "tr" => Some(Self::Transfer),
            "asu" => Some(Self::AppSessionUpdate),
            "assets" => Some(Self::Assets),
            _ => None,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::BalanceUpdate => "bu",
            Self::ChannelUpdate => "cu",
            Self::Transfer => "tr",
            Self::AppSessionUpdate => "asu",
            Self::Assets => "assets",
        }
    }
}

/// One dispatched notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub params: Value,
}

impl Notification {
    /// Decode the raw params into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, WalletError> {
        serde_json::from_value(self.params.clone()).map_err(|e| {
            WalletError::internal(format!(
                "decode {} notification payload: {e}",
                self.kind.method()
            ))
        })
    }
}

/// Typed payload of a `bu` notification.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BalanceUpdateNotice {
    pub balance_updates: Vec<LedgerBalance>,
}

/// Typed payload of a `cu` notification.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChannelUpdateNotice {
    pub channel_id: String,
    pub status: String,
    #[serde(default)]
    pub version: u64,
}

/// Typed payload of a `tr` notification.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TransferNotice {
    pub transactions: Vec<LedgerTransaction>,
}

/// Typed payload of an `asu` notification.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppSessionUpdateNotice {
    pub app_session_id: String,
    #[serde(default)]
    pub version: u64,
    pub status: String,
}

/// Subscription registry keyed by notification kind.
#[derive(Default)]
pub struct NotificationRegistry {
    subscribers: Mutex<HashMap<NotificationKind, Vec<mpsc::Sender<Notification>>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the default buffer capacity.
    pub fn subscribe(&self, kind: NotificationKind) -> mpsc::Receiver<Notification> {
        self.subscribe_with_capacity(kind, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        kind: NotificationKind,
        capacity: usize,
    ) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if let Ok(mut map) = self.subscribers.lock() {
            map.entry(kind).or_default().push(tx);
        }
        rx
    }

    /// Hand a notification to every live subscriber of its kind.
    ///
    /// Never blocks: a full subscriber buffer drops this notification for
    /// that subscriber, a closed subscriber is unregistered.
    pub fn dispatch(&self, notification: Notification) {
        let Ok(mut map) = self.subscribers.lock() else {
            return;
        };
        let Some(senders) = map.get_mut(&notification.kind) else {
            return;
        };
        senders.retain(|sender| match sender.try_send(notification.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    method = notification.kind.method(),
                    "notification subscriber buffer full, dropping update"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if senders.is_empty() {
            map.remove(&notification.kind);
        }
    }
}
