//! Error types for transport, reads, writes, and settings

use field_model::{CollectionName, ModelError};
use thiserror::Error;

/// Failure talking to the reporting server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server could not be reached at all
    #[error("Connection error: {0}")]
    Connectivity(String),

    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The server answered with a body we could not interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// How the sync engine treats a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Keep the operation and retry after backoff
    Retry,
    /// Keep the operation, back off, and ask for new credentials
    AuthRequired,
    /// The server refused the operation; drop it and report
    Reject,
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the request never got a server verdict.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TransportError::Connectivity(_) | TransportError::Timeout)
    }

    /// 401 and 403.
    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// Whether the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        match self.status() {
            Some(status) => status >= 500 || status == 408 || status == 429,
            None => true,
        }
    }

    pub fn classify(&self) -> FailureClass {
        if self.is_auth() {
            FailureClass::AuthRequired
        } else if self.is_retryable() {
            FailureClass::Retry
        } else {
            FailureClass::Reject
        }
    }
}

/// Failure of a cached read.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadError {
    #[error("No cached {0} available while offline")]
    NotCached(CollectionName),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure of a write that was not queued.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Invalid write: {0}")]
    Invalid(#[from] ModelError),

    #[error("Write failed: {0}")]
    Transport(TransportError),
}

impl DispatchError {
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            DispatchError::Transport(e) => Some(e),
            DispatchError::Invalid(_) => None,
        }
    }
}

/// Failure loading or saving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
