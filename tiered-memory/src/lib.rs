//! Multi-tier memory for cooperating agents.
//!
//! This crate bundles the memory workspace behind feature flags. With the
//! default `config` feature, [`MemoryRuntime::connect`] assembles a
//! [`memory::MemoryManager`] from a [`config::RuntimeConfig`], and [`global`]
//! offers one lazily connected runtime per process.

#![warn(missing_docs, clippy::pedantic)]

/// Shared record types.
pub use agent_primitives as primitives;

/// Document store backends.
pub use agent_store as store;

/// Memory manager, semantic index, and preference logic.
pub use agent_memory as memory;

/// Environment-driven configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

#[cfg(feature = "config")]
mod runtime;

#[cfg(feature = "config")]
pub use runtime::{MemoryRuntime, global};
