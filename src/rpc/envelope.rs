// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wire format for the clearing-node RPC protocol.
//!
//! Text frames carry JSON envelopes. A request is
//! `{"req": [id, method, params, ts], "sig": ["0x..."]}`; a response is
//! `{"res": [id, method, payload, ts], "sig": [...]}` with an optional
//! `error` object. A response whose id matches no outstanding request is a
//! notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WalletError;

/// Outgoing request before framing. The id is transport-assigned and never
/// escapes to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
    pub timestamp_ms: u64,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value, timestamp_ms: u64) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            timestamp_ms,
        }
    }

    /// Canonical encoding of the `req` array. Signatures are computed over
    /// exactly these bytes.
    pub fn canonical(&self) -> Result<String, WalletError> {
        serde_json::to_string(&(
            self.id,
            self.method.as_str(),
            &self.params,
            self.timestamp_ms,
        ))
        .map_err(|e| WalletError::internal(format!("encode request payload: {e}")))
    }

    /// Wrap into a wire frame with the given detached signatures.
    pub fn into_frame(self, sig: Vec<String>) -> RequestFrame {
        RequestFrame {
            req: (self.id, self.method, self.params, self.timestamp_ms),
            sig,
        }
    }
}

/// Serialized request envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestFrame {
    pub req: (u64, String, Value, u64),
    pub sig: Vec<String>,
}

impl RequestFrame {
    pub fn encode(&self) -> Result<String, WalletError> {
        serde_json::to_string(self)
            .map_err(|e| WalletError::internal(format!("encode request frame: {e}")))
    }

    pub fn decode(text: &str) -> Result<Self, WalletError> {
        serde_json::from_str(text)
            .map_err(|e| WalletError::internal(format!("decode request frame: {e}")))
    }

    pub fn request(&self) -> RpcRequest {
        RpcRequest {
            id: self.req.0,
            method: self.req.1.clone(),
            params: self.req.2.clone(),
            timestamp_ms: self.req.3,
        }
    }
}

/// Error payload attached to a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// Incoming response or notification envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseFrame {
    pub res: (u64, String, Value, u64),
    #[serde(default)]
    pub sig: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl ResponseFrame {
    pub fn decode(text: &str) -> Result<Self, WalletError> {
        serde_json::from_str(text)
            .map_err(|e| WalletError::internal(format!("decode response frame: {e}")))
    }

    pub fn id(&self) -> u64 {
        self.res.0
    }

    pub fn method(&self) -> &str {
        &self.res.1
    }

    pub fn payload(&self) -> &Value {
        &self.res.2
    }

    /// Convert into the caller-visible result: the payload, or the typed
    /// clearing-node error when `error` is present.
    pub fn into_result(self) -> Result<Value, WalletError> {
        match self.error {
            Some(body) => Err(WalletError::ClearingNode {
                code: body.code,
                message: body.message,
            }),
            None => Ok(self.res.2),
        }
    }
}
