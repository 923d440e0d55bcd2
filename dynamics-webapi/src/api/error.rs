//! Error types for Web API calls
//!
//! Errors that are detected before a request leaves the process carry a
//! status of `0`, the same as transport-level failures. Anything the server
//! rejected carries the HTTP status and the parsed OData error body.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DynamicsError>;

#[derive(Debug, Error)]
pub enum DynamicsError {
    /// Missing or contradictory request fields
    #[error("{operation}: {message}")]
    InvalidRequest { operation: String, message: String },

    #[error("Token is empty. Request is aborted.")]
    EmptyToken,

    #[error("{operation} cannot be used in a batch request")]
    BatchIncompatible { operation: String },

    #[error("a batch is already open on this client")]
    BatchAlreadyOpen,

    #[error("no batch is open on this client")]
    NoOpenBatch,

    /// The request never got an HTTP response
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("request was cancelled")]
    Cancelled,

    /// Non-2xx response with a parseable OData error body
    #[error("{}", .0.message)]
    OData(Box<HttpError>),

    /// Non-2xx response whose body is not an OData error
    #[error("{}", .0.message)]
    UnexpectedResponse(Box<HttpError>),

    /// Another operation in the same change set failed, so this one was rolled back
    #[error("change set rolled back before operation {content_id} completed")]
    ChangeSetRolledBack { content_id: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Details of an HTTP-level failure
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    pub status: u16,
    pub status_text: String,
    /// Response headers, keys lowercased
    pub headers: HashMap<String, String>,
    /// OData error code (e.g. `0x80040217`)
    pub code: Option<String>,
    pub message: String,
    pub inner_error: Option<Value>,
}

impl DynamicsError {
    pub fn invalid(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// HTTP status of the failure, `0` when the server never answered
    pub fn status(&self) -> u16 {
        match self {
            Self::OData(e) | Self::UnexpectedResponse(e) => e.status,
            _ => 0,
        }
    }

    /// Stable name distinguishing the kind of failure
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "InvalidRequestError",
            Self::EmptyToken => "EmptyTokenError",
            Self::BatchIncompatible { .. } => "BatchIncompatibleOperationError",
            Self::BatchAlreadyOpen | Self::NoOpenBatch => "BatchStateError",
            Self::Transport(_) => "TransportError",
            Self::Timeout => "TimeoutError",
            Self::Cancelled => "AbortError",
            Self::OData(_) => "ODataError",
            Self::UnexpectedResponse(_) => "UnexpectedResponseError",
            Self::ChangeSetRolledBack { .. } => "ChangeSetRolledBackError",
            Self::Config(_) => "ConfigError",
            Self::Json(_) => "JsonError",
        }
    }

    /// The HTTP details, if the server answered
    pub fn http(&self) -> Option<&HttpError> {
        match self {
            Self::OData(e) | Self::UnexpectedResponse(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
