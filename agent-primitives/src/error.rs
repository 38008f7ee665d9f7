//! Shared error definitions for memory records.

use thiserror::Error;

/// Result alias used throughout the memory workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or decoding memory records.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more required fields were absent or blank.
    #[error("missing required fields: {}", fields.join(", "))]
    MissingFields {
        /// Names of the missing fields, in declaration order.
        fields: Vec<&'static str>,
    },

    /// A field was present but carried an unusable value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A stored document could not be decoded into a record.
    #[error("failed to decode record: {source}")]
    Decode {
        /// Source error from `serde_json`.
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Convenience constructor for invalid field values.
    #[must_use]
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
