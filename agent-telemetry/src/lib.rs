//! Observability utilities for the memory subsystem.

#![warn(missing_docs, clippy::pedantic)]

use std::fmt;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Result of a mutating memory operation, recorded as the `outcome` field of
/// its trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceOutcome {
    /// The write reached its store.
    Written,
    /// Records were removed.
    Removed,
    /// Nothing matched; no state changed.
    Unchanged,
    /// The operation was rejected before any I/O.
    Rejected,
    /// The operation failed in a backing store.
    Failed,
    /// The operation was skipped because its tier is disabled.
    Skipped,
}

impl TraceOutcome {
    /// Returns the lowercase label used in trace output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Removed => "removed",
            Self::Unchanged => "unchanged",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (for example `"info"` or `"agent_memory=debug"`).
///
/// # Errors
///
/// Fails if the directive does not parse or a global subscriber is already
/// installed.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .with_context(|| format!("invalid log directive `{default_directive}`"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber already installed: {err}"))
}
