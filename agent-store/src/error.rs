//! Error types for document store backends.

use thiserror::Error;

/// Errors emitted by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or did not answer in time.
    #[error("store unreachable: {reason}")]
    Connectivity {
        /// Transport-level context.
        reason: String,
    },
    /// The backend answered with a non-success status.
    #[error("store rejected request ({status}): {reason}")]
    Rejected {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Response body or reason phrase.
        reason: String,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Encoding {
        /// Source [`serde_json::Error`].
        #[from]
        source: serde_json::Error,
    },
    /// Underlying I/O failure while reading or writing fallback files.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// The backend configuration was invalid.
    #[error("invalid store configuration: {reason}")]
    InvalidConfig {
        /// Human-readable reason.
        reason: String,
    },
    /// The backend answered with a payload the client could not interpret.
    #[error("malformed store response: {reason}")]
    Malformed {
        /// Human-readable reason.
        reason: String,
    },
}

impl StoreError {
    /// Helper to construct connectivity errors.
    #[must_use]
    pub fn connectivity(reason: impl Into<String>) -> Self {
        Self::Connectivity {
            reason: reason.into(),
        }
    }

    /// Helper to construct configuration errors.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Helper to construct malformed-response errors.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Returns `true` when the failure stems from the environment (network,
    /// backend availability, local disk) rather than from the request itself.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Connectivity { .. } | Self::Io { .. } => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
