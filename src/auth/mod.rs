// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session-Key Authentication
//!
//! Holds an ephemeral session key generated at construction and drives the
//! clearing node's challenge/response handshake:
//!
//! 1. `auth_request` (unsigned) carries the session public key and identity
//!    claims,
//! 2. the node replies with a challenge,
//! 3. `auth_verify` carries the session-key signature over the challenge,
//! 4. the node confirms with an authenticated flag and an expiry.
//!
//! The module also signs ordinary requests: a detached secp256k1 signature
//! over keccak256 of the canonical `req` encoding. Public methods (`ping`,
//! `get_app_definition`) bypass signing by passing no signer.
//!
//! Authentication state is reset and the handshake repeated on every
//! reconnect, before the transport flushes its offline queue; the transport
//! drives this through its on-connect hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use alloy::primitives::keccak256;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::error::WalletError;
use crate::rpc::{ClearingTransport, ConnectHook, RequestSigner};

/// Identity presented to the clearing node during the handshake.
#[derive(Debug, Clone)]
pub struct IdentityClaims {
    /// The user's main wallet address the session acts for.
    pub wallet_address: String,
    /// Application name registered with the clearing node.
    pub application: String,
    /// Requested scope.
    pub scope: String,
    /// Requested session lifetime in seconds.
    pub session_ttl_secs: u64,
}

impl IdentityClaims {
    pub fn new(wallet_address: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            application: application.into(),
            scope: "console".to_string(),
            session_ttl_secs: 3600,
        }
    }
}

/// Ephemeral session-key holder and handshake driver.
pub struct SessionAuth {
    session_key: PrivateKeySigner,
    identity: IdentityClaims,
    authenticated: AtomicBool,
    expires_at: Mutex<Option<DateTime<Utc>>>,
}

impl SessionAuth {
    /// Generate a fresh session key for the given identity.
    pub fn new(identity: IdentityClaims) -> Self {
        Self {
            session_key: PrivateKeySigner::random(),
            identity,
            authenticated: AtomicBool::new(false),
            expires_at: Mutex::new(None),
        }
    }

    /// The session public address sent in `auth_request`.
    pub fn session_address(&self) -> String {
        format!("{:#x}", self.session_key.address())
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at.lock().ok().and_then(|guard| *guard)
    }

    /// Perform the challenge/response handshake over an open connection.
    pub async fn handshake(&self, transport: &ClearingTransport) -> Result<(), WalletError> {
        self.authenticated.store(false, Ordering::SeqCst);

        let challenge_payload = transport
            .request(
                "auth_request",
                json!({
                    "address": self.identity.wallet_address,
                    "session_key": self.session_address(),
                    "application": self.identity.application,
                    "scope": self.identity.scope,
                    "expire": self.identity.session_ttl_secs,
                    "allowances": [],
                }),
                None,
            )
            .await?;

        let challenge = challenge_payload
            .get("challenge_message")
            .or_else(|| challenge_payload.get("challenge"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                WalletError::unauthenticated("handshake response carried no challenge")
            })?;

        let signature = self
            .session_key
            .sign_message_sync(challenge.as_bytes())
            .map_err(|e| WalletError::internal(format!("sign challenge: {e}")))?;

        let verdict = transport
            .request(
                "auth_verify",
                json!({
                    "challenge": challenge,
                    "signature": format!("0x{}", alloy::hex::encode(signature.as_bytes())),
                }),
                None,
            )
            .await
            .map_err(|e| match e {
                WalletError::ClearingNode { code, message } => WalletError::unauthenticated(
                    format!("clearing node refused session ({code}): {message}"),
                ),
                other => other,
            })?;

        let success = verdict
            .get("success")
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        if !success {
            return Err(WalletError::unauthenticated(
                "clearing node did not confirm the session",
            ));
        }

        if let Ok(mut guard) = self.expires_at.lock() {
            *guard = verdict
                .get("expires_at")
                .and_then(|value| value.as_i64())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        }
        self.authenticated.store(true, Ordering::SeqCst);
        tracing::info!(
            session_key = %self.session_address(),
            "clearing node session established"
        );
        Ok(())
    }
}

impl RequestSigner for SessionAuth {
    /// Detached signature over keccak256 of the canonical `req` encoding.
    fn sign(&self, payload: &[u8]) -> Result<String, WalletError> {
        let digest = keccak256(payload);
        let signature = self
            .session_key
            .sign_hash_sync(&digest)
            .map_err(|e| WalletError::internal(format!("sign request: {e}")))?;
        Ok(format!("0x{}", alloy::hex::encode(signature.as_bytes())))
    }
}

#[async_trait]
impl ConnectHook for SessionAuth {
    async fn on_connect(&self, transport: &ClearingTransport) -> Result<(), WalletError> {
        self.handshake(transport).await
    }
}
