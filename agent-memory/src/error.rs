//! Error types for the memory subsystem.

use agent_store::StoreError;
use thiserror::Error;

/// Coarse classification of a [`MemoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A backing service could not be reached or failed in transit.
    Connectivity,
    /// Caller input was rejected before any I/O.
    Validation,
    /// Embedding or (de)serialisation failed.
    Encoding,
    /// The subsystem was wired or configured incorrectly.
    Configuration,
    /// The requested tier is not enabled.
    Unavailable,
}

/// Errors emitted by memory components.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Persistence failed.
    #[error("store error: {source}")]
    Store {
        /// Underlying backend failure.
        #[from]
        source: StoreError,
    },
    /// A record failed validation or could not be decoded.
    #[error("invalid record: {source}")]
    Record {
        /// Underlying record error.
        #[from]
        source: agent_primitives::Error,
    },
    /// The embedding provider failed or returned an unusable vector.
    #[error("embedding error: {reason}")]
    Embedding {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// The semantic index reported a failure.
    #[error("semantic index error: {source}")]
    Index {
        /// Underlying transport or protocol failure.
        source: StoreError,
    },
    /// The semantic index answered with something it should not have.
    #[error("semantic index returned an unexpected response: {reason}")]
    IndexResponse {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// The provided configuration was invalid.
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(&'static str),
    /// Semantic operations were requested but no index is configured.
    #[error("semantic indexing is disabled")]
    SemanticDisabled,
}

impl MemoryError {
    /// Helper to construct embedding errors from string-like values.
    #[must_use]
    pub fn embedding(reason: impl Into<String>) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }

    /// Wraps a transport failure raised while talking to the semantic index.
    #[must_use]
    pub fn index(source: StoreError) -> Self {
        Self::Index { source }
    }

    /// Helper for malformed index responses.
    #[must_use]
    pub fn index_response(reason: impl Into<String>) -> Self {
        Self::IndexResponse {
            reason: reason.into(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store { source } | Self::Index { source } => store_kind(source),
            Self::Record { source } => match source {
                agent_primitives::Error::MissingFields { .. }
                | agent_primitives::Error::InvalidField { .. } => ErrorKind::Validation,
                agent_primitives::Error::Decode { .. } => ErrorKind::Encoding,
            },
            Self::Embedding { .. } | Self::IndexResponse { .. } => ErrorKind::Encoding,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::SemanticDisabled => ErrorKind::Unavailable,
        }
    }
}

fn store_kind(error: &StoreError) -> ErrorKind {
    match error {
        StoreError::Encoding { .. } | StoreError::Malformed { .. } => ErrorKind::Encoding,
        StoreError::InvalidConfig { .. } => ErrorKind::Configuration,
        StoreError::Rejected { status, .. } if *status < 500 => ErrorKind::Validation,
        _ => ErrorKind::Connectivity,
    }
}

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let missing = MemoryError::from(agent_primitives::Error::MissingFields {
            fields: vec!["user_id"],
        });
        assert_eq!(missing.kind(), ErrorKind::Validation);

        let down = MemoryError::from(StoreError::connectivity("refused"));
        assert_eq!(down.kind(), ErrorKind::Connectivity);

        let upstream = MemoryError::index(StoreError::Rejected {
            status: 503,
            reason: "busy".into(),
        });
        assert_eq!(upstream.kind(), ErrorKind::Connectivity);

        assert_eq!(MemoryError::embedding("bad").kind(), ErrorKind::Encoding);
        assert_eq!(MemoryError::SemanticDisabled.kind(), ErrorKind::Unavailable);
    }
}
