//! Core shared records for the tiered agent memory subsystem.

#![warn(missing_docs, clippy::pedantic)]

mod episode;
mod error;
mod ids;
mod preference;
mod records;
mod time;

/// Episodic log entries and their unvalidated input form.
pub use episode::{Episode, NewEpisode};
/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifier of a point in the semantic episode index.
pub use ids::PointId;
/// Long-term preference records and their keys.
pub use preference::{PreferenceKey, PreferenceRecord};
/// Scratch, mailbox, and blackboard records.
pub use records::{Message, ScratchEntry, SharedDatum, ShortTermSummary};
/// Timestamp helpers used for every stored record.
pub use time::{normalize_timestamp, now_timestamp, parse_timestamp};
