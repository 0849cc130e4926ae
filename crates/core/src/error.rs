// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Paneloop Authors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes returned to RPC callers. Shared across every method
/// handler registered with [`crate::rpc::Dispatcher`] regardless of which
/// daemon owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or unparseable JSON frame, or missing `method`/`id`.
    ParseError,
    /// `method` does not name a registered handler.
    MethodNotFound,
    /// Params failed validation for an otherwise-known method.
    InvalidParams,
    /// Precondition not met (e.g. operation requires an attached target).
    NotConnected,
    /// Underlying transport closed, timed out, or failed to connect.
    TransportError,
    /// Named target no longer exists.
    TargetGone,
    /// Unhandled internal error; message carries detail for diagnostics.
    Internal,
}

impl ErrorCode {
    /// Numeric code placed in the `error.code` field of an RPC response.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::NotConnected => -32000,
            Self::TransportError => -32001,
            Self::TargetGone => -32002,
            Self::Internal => -32603,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::NotConnected => "NOT_CONNECTED",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::TargetGone => "TARGET_GONE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error carrying both the stable [`ErrorCode`] and a human message,
/// returned by RPC handlers and converted to the wire `error` object by
/// the dispatcher.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn target_gone(target: impl fmt::Display) -> Self {
        Self::new(ErrorCode::TargetGone, format!("target gone: {target}"))
    }

    /// Render as the wire-level `{"code": ..., "message": ...}` object.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({ "code": self.code.code(), "message": self.message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_as_str() {
        assert_eq!(ErrorCode::InvalidParams.to_string(), "INVALID_PARAMS");
    }

    #[test]
    fn wire_shape_has_code_and_message() {
        let err = RpcError::invalid_params("bad target id");
        let wire = err.to_wire();
        assert_eq!(wire["code"], -32602);
        assert_eq!(wire["message"], "bad target id");
    }
}
