//! Error types for the ES compat client
//!
//! Uses `thiserror` so every failure keeps its source and enough context to
//! tell pre-I/O rejections apart from server and transport failures.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

use crate::response::ServerError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, EsCompatError>;

/// A single shape complaint raised before any network I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The document type is required by the targeted protocol but absent
    MissingType,
    /// No index was named
    MissingIndex,
    /// No document id was given where one is required
    MissingId,
    /// Request has nothing to send
    EmptyRequest,
    /// Anything else
    Other(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingType => f.write_str("type is missing"),
            Self::MissingIndex => f.write_str("index is missing"),
            Self::MissingId => f.write_str("id is missing"),
            Self::EmptyRequest => f.write_str("no requests added"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_detail(detail: &Option<ServerError>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

/// Primary error type for all client operations
#[derive(Error, Debug)]
pub enum EsCompatError {
    /// Request shape rejected before I/O
    #[error("Validation failed: {}", join_violations(.violations))]
    Validation { violations: Vec<Violation> },

    /// A rewrite rule produced invalid output from valid input
    #[error("Translation error in rule '{rule}': {message}")]
    Translation { rule: String, message: String },

    /// Network or connection failure
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Non-2xx response that was not tolerated
    #[error("Server returned status {status}{}", describe_detail(.detail))]
    Status {
        status: u16,
        detail: Option<ServerError>,
        body: Bytes,
    },

    /// Unparseable response; the raw payload is kept for diagnosis
    #[error("Decode error: {message}")]
    Decode { message: String, raw: Bytes },

    /// Bulk item rejected by an overloaded node; resubmitted in a later batch
    #[error("Retryable write failure for '{id}': {reason}")]
    RetryableWrite { id: String, reason: String },

    /// Bulk item failed for good; logged, never retried
    #[error("Terminal write failure for '{id}': {reason}")]
    TerminalWrite { id: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Component already closed
    #[error("Shutdown requested")]
    Shutdown,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EsCompatError {
    pub fn validation(violations: Vec<Violation>) -> Self {
        Self::Validation { violations }
    }

    pub fn translation(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Translation {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn decode(message: impl Into<String>, raw: impl Into<Bytes>) -> Self {
        Self::Decode {
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub fn retryable_write(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RetryableWrite {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn terminal_write(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TerminalWrite {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if the cluster signalled overload and the call may be repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, detail, .. } => {
                matches!(status, 429 | 503)
                    || detail.as_ref().is_some_and(ServerError::is_rejection)
            }
            Self::Transport { message, .. } => is_rejection_message(message),
            Self::RetryableWrite { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Check if the failure happened before a response was read
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// Rejection signal as it appears in wrapped transport-error text
pub fn is_rejection_message(message: &str) -> bool {
    message.contains("EsRejectedExecutionException")
        || message.contains("es_rejected_execution_exception")
}
