//! Error types for evs-core operations.
//!
//! Arbitration outcomes (`NONE`/`BUSY`/`UNAVAILABLE`) are reported through
//! [`evs_protocol::ErrorCode`]; `EvsError` covers everything that is a genuine
//! failure of the caller or the environment.

use evs_protocol::ServiceType;
use std::path::PathBuf;

/// Failure to deliver a callback to a client. Never aborts a transition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("client is no longer reachable")]
    Disconnected,

    #[error("client rejected delivery: {0}")]
    Rejected(String),
}

/// All errors that can occur in evs-core operations.
#[derive(Debug, thiserror::Error)]
pub enum EvsError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid service descriptor '{descriptor}': {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    #[error("Home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Caller Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Service type not supported: {0}")]
    UnsupportedServiceType(ServiceType),

    #[error("Caller {uid} is not allowed to {operation}")]
    PermissionDenied { uid: u32, operation: &'static str },

    // ─────────────────────────────────────────────────────────────────────
    // HAL Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("HAL operation failed: {operation}: {details}")]
    Hal {
        operation: &'static str,
        details: String,
    },

    #[error("Client delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl EvsError {
    pub fn hal(operation: &'static str, details: impl Into<String>) -> Self {
        EvsError::Hal {
            operation,
            details: details.into(),
        }
    }
}

/// Convenience type alias for Results using EvsError.
pub type Result<T> = std::result::Result<T, EvsError>;

impl From<EvsError> for String {
    fn from(err: EvsError) -> String {
        err.to_string()
    }
}
