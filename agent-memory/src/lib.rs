//! Tiered memory for cooperating agents.
//!
//! [`MemoryManager`] fronts five tiers over one [`agent_store::StoreBackend`]:
//! session scratch, the append-only episode log, merged long-term preferences,
//! a drain-on-read mailbox, and a shared blackboard. Appended episodes can be
//! mirrored into a semantic [`EpisodeIndex`] for similarity recall.

#![warn(missing_docs, clippy::pedantic)]

pub mod embeddings;
mod error;
pub mod index;
pub mod manager;
pub mod preferences;

/// Embedding vectors and providers.
pub use embeddings::{
    DEFAULT_DIMENSIONS, Embedder, EmbeddingVector, HashingEmbedder, HttpEmbedder,
    HttpEmbedderConfig,
};
/// Error type, classification, and result alias.
pub use error::{ErrorKind, MemoryError, MemoryResult};
/// Semantic episode index implementations.
pub use index::{
    EpisodeIndex, EpisodeMatch, IndexSettings, LocalEpisodeIndex, QdrantConfig, QdrantIndex,
    SearchRequest,
};
/// The memory manager and its builder.
pub use manager::{
    EpisodeReceipt, IndexOutcome, MemoryManager, MemoryManagerBuilder, ScratchMode,
};
/// Preference reconciliation helpers.
pub use preferences::{merge, parse_preferences};
