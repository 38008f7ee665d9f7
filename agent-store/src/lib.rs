//! Document store backends for tiered agent memory.
//!
//! [`StoreBackend`] picks a networked document database when one is configured
//! and reachable, otherwise local JSON files, otherwise process memory. Every
//! memory tier talks to it through the same filter/upsert/drain surface.

#![warn(missing_docs, clippy::pedantic)]

mod backend;
mod collections;
mod document;
mod error;
mod file;
pub mod http;
mod memory;
mod remote;

/// Backend trait, strategy selection, and the sanitising wrapper.
pub use backend::{DocumentStore, StoreBackend, StoreConfig, StoreKind};
/// Document model, filters, and extended-JSON sanitisation.
pub use document::{
    Document, Filter, FindOptions, ID_FIELD, PutOutcome, SortOrder, filter, matches, plain_id,
    sanitize_document, sanitize_value,
};
/// Errors raised by any backend.
pub use error::{StoreError, StoreResult};
/// JSON-file fallback store.
pub use file::{DEFAULT_LOG_COLLECTIONS, FileStore};
/// Volatile in-process store.
pub use memory::InMemoryStore;
/// Networked document store client.
pub use remote::{DEFAULT_TIMEOUT, RemoteConfig, RemoteStore};
