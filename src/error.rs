// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Core Error Handling
//!
//! This module provides the unified error type for the coordination core.
//! Every fallible public operation returns [`WalletError`], and every error
//! carries a stable [`ErrorKind`] that callers (and the API layer above this
//! crate) can match on without inspecting message text.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crate::error::WalletError;
//!
//! // Reject a malformed amount
//! return Err(WalletError::invalid_argument("amount must be positive"));
//!
//! // Report an insufficient balance
//! return Err(WalletError::precondition_failed("insufficient balance"));
//! ```

use serde::Serialize;

/// Stable error classification.
///
/// Kinds are part of the crate's contract: they do not change when message
/// wording does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad amount, address, chain, or other caller-supplied input.
    InvalidArgument,
    /// Insufficient balance, closed session, wrong participant.
    PreconditionFailed,
    /// Transport past its reconnection budget, indexer 5xx, node timeout.
    Unavailable,
    /// Session handshake refused or session expired.
    Unauthenticated,
    /// An RPC or HTTP call did not complete in time.
    Timeout,
    /// Session or channel id unknown.
    NotFound,
    /// Parse failures and invariant violations.
    Internal,
    /// Off-chain negotiation succeeded but the on-chain submission failed.
    OnchainFailed,
}

/// Unified error for the coordination core.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// The clearing node rejected a request with an explicit error payload.
    /// Surfaced verbatim so operators can correlate with node logs.
    #[error("clearing node rejected request ({code}): {message}")]
    ClearingNode { code: i64, message: String },

    /// Off-chain negotiation succeeded but the on-chain call reverted or the
    /// receipt reported failure. Distinct so callers can reconcile instead of
    /// blindly retrying the whole operation.
    #[error("on-chain submission failed after off-chain negotiation: {0}")]
    OnchainFailed(String),
}

impl WalletError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable kind for this error.
    ///
    /// Clearing-node rejections map to `PreconditionFailed`: the node refused
    /// a well-formed, authenticated request on business grounds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::Internal,
            Self::ClearingNode { .. } => ErrorKind::PreconditionFailed,
            Self::OnchainFailed(_) => ErrorKind::OnchainFailed,
        }
    }
}
