//! Coordinates the scratch, episodic, preference, mailbox, and blackboard tiers
//! over one store backend, plus optional semantic episode indexing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use agent_primitives::{
    Episode, Message, NewEpisode, PointId, PreferenceKey, PreferenceRecord, ScratchEntry,
    ShortTermSummary, now_timestamp,
};
use agent_store::{Document, Filter, FindOptions, StoreBackend, filter};
use agent_telemetry::TraceOutcome;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;
use crate::index::{EpisodeIndex, EpisodeMatch, IndexSettings, SearchRequest};
use crate::preferences::merge;
use crate::{MemoryError, MemoryResult};

/// Collection names used by the manager.
pub mod collections {
    /// Session scratch entries.
    pub const SHORT_TERM: &str = "short_term";
    /// Append-only episode log.
    pub const EPISODIC_LOG: &str = "episodic_log";
    /// Merged preference records.
    pub const PREFERENCES: &str = "preferences";
    /// Per-user long-term key/value pairs.
    pub const LONG_TERM: &str = "long_term";
    /// Undelivered inter-agent messages.
    pub const MESSAGES: &str = "messages";
    /// Blackboard entries.
    pub const SHARED_DATA: &str = "shared_data";
}

use collections::{EPISODIC_LOG, LONG_TERM, MESSAGES, PREFERENCES, SHARED_DATA, SHORT_TERM};

/// Where scratch entries live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScratchMode {
    /// In the store backend's `short_term` collection, shared across processes.
    #[default]
    Store,
    /// In a map owned by this manager.
    Process,
}

/// What happened to the semantic mirror of an appended episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The episode was embedded and upserted under this point.
    Indexed(PointId),
    /// Semantic indexing is not configured.
    Disabled,
    /// Embedding or upsert failed; the log entry was kept.
    Failed(String),
}

/// Result of [`MemoryManager::append_episode`].
#[derive(Debug, Clone)]
pub struct EpisodeReceipt {
    /// The stored episode, carrying its log identifier.
    pub episode: Episode,
    /// Semantic indexing outcome.
    pub index: IndexOutcome,
}

/// Builder for [`MemoryManager`] instances.
pub struct MemoryManagerBuilder {
    store: StoreBackend,
    scratch: ScratchMode,
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn EpisodeIndex>>,
    settings: IndexSettings,
}

impl MemoryManagerBuilder {
    /// Starts a new builder over `store`.
    #[must_use]
    pub fn new(store: StoreBackend) -> Self {
        Self {
            store,
            scratch: ScratchMode::default(),
            embedder: None,
            index: None,
            settings: IndexSettings::default(),
        }
    }

    /// Chooses where scratch entries live.
    #[must_use]
    pub fn with_scratch(mut self, scratch: ScratchMode) -> Self {
        self.scratch = scratch;
        self
    }

    /// Installs the embedding provider used for semantic indexing.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Installs the semantic episode index.
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn EpisodeIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Overrides search defaults and the expected vector dimension.
    #[must_use]
    pub fn with_index_settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the [`MemoryManager`].
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when only one of embedder and
    /// index was provided, or when the embedder's dimension disagrees with the
    /// index settings.
    pub fn build(self) -> MemoryResult<MemoryManager> {
        let semantic = match (self.embedder, self.index) {
            (Some(embedder), Some(index)) => {
                if embedder.dimensions() != self.settings.dimensions() {
                    return Err(MemoryError::InvalidConfig(
                        "embedder dimension does not match the index dimension",
                    ));
                }
                Some(Semantic { embedder, index })
            }
            (None, None) => None,
            _ => {
                return Err(MemoryError::InvalidConfig(
                    "semantic indexing needs both an embedder and an index",
                ));
            }
        };

        let scratch = match self.scratch {
            ScratchMode::Store => Scratch::Store,
            ScratchMode::Process => Scratch::Process(Arc::default()),
        };

        Ok(MemoryManager {
            store: self.store,
            scratch,
            semantic,
            settings: self.settings,
        })
    }
}

#[derive(Clone)]
enum Scratch {
    Store,
    Process(Arc<RwLock<HashMap<String, ScratchEntry>>>),
}

#[derive(Clone)]
struct Semantic {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn EpisodeIndex>,
}

/// Unified memory API shared by every agent in a process.
///
/// Cheap to clone; clones share the same store connection, scratch map, and
/// semantic index.
#[derive(Clone)]
pub struct MemoryManager {
    store: StoreBackend,
    scratch: Scratch,
    semantic: Option<Semantic>,
    settings: IndexSettings,
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("store", &self.store)
            .field("scratch_in_process", &matches!(self.scratch, Scratch::Process(_)))
            .field("semantic", &self.semantic.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl MemoryManager {
    /// Creates a builder for a memory manager.
    #[must_use]
    pub fn builder(store: StoreBackend) -> MemoryManagerBuilder {
        MemoryManagerBuilder::new(store)
    }

    /// Returns the store backend.
    #[must_use]
    pub fn store(&self) -> &StoreBackend {
        &self.store
    }

    /// Returns `true` when appended episodes are mirrored into a semantic index.
    #[must_use]
    pub fn is_semantic_enabled(&self) -> bool {
        self.semantic.is_some()
    }

    /// Returns the semantic search defaults.
    #[must_use]
    pub fn index_settings(&self) -> &IndexSettings {
        &self.settings
    }

    // Scratch tier

    /// Creates or overwrites a scratch entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the write fails.
    pub async fn write_short(&self, key: &str, value: Value) -> MemoryResult<()> {
        let entry = ScratchEntry {
            key: key.to_owned(),
            value,
            updated_at: now_timestamp(),
        };
        let result = match &self.scratch {
            Scratch::Process(map) => {
                map.write().await.insert(entry.key.clone(), entry);
                Ok(())
            }
            Scratch::Store => {
                let document = document_of([
                    ("value", entry.value),
                    ("updated_at", Value::from(entry.updated_at)),
                ]);
                self.store
                    .put(SHORT_TERM, &filter([("key", key)]), document, true)
                    .await
                    .map(|_| ())
                    .map_err(MemoryError::from)
            }
        };
        traced("scratch", key, result, |_| TraceOutcome::Written)
    }

    /// Returns the value of a scratch entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the read fails.
    pub async fn read_short(&self, key: &str) -> MemoryResult<Option<Value>> {
        match &self.scratch {
            Scratch::Process(map) => Ok(map.read().await.get(key).map(|entry| entry.value.clone())),
            Scratch::Store => Ok(self
                .store
                .find_one(SHORT_TERM, &filter([("key", key)]))
                .await?
                .and_then(|mut document| document.remove("value"))),
        }
    }

    /// Wipes every scratch entry, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the delete fails.
    pub async fn clear_short(&self) -> MemoryResult<u64> {
        let result = match &self.scratch {
            Scratch::Process(map) => {
                let mut guard = map.write().await;
                let removed = guard.len() as u64;
                guard.clear();
                Ok(removed)
            }
            Scratch::Store => self
                .store
                .delete(SHORT_TERM, &Filter::new())
                .await
                .map_err(MemoryError::from),
        };
        traced("scratch", "*", result, |removed| removed_outcome(*removed))
    }

    /// Summarises the scratch tier: entry count, keys in order, last write time.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] on read failure or
    /// [`MemoryError::Record`] for an undecodable entry.
    pub async fn short_term_summary(&self) -> MemoryResult<ShortTermSummary> {
        let entries: Vec<ScratchEntry> = match &self.scratch {
            Scratch::Process(map) => map.read().await.values().cloned().collect(),
            Scratch::Store => self
                .store
                .find(SHORT_TERM, &Filter::new(), &FindOptions::default())
                .await?
                .into_iter()
                .map(decode)
                .collect::<MemoryResult<_>>()?,
        };

        let last_updated = entries.iter().map(|entry| entry.updated_at.clone()).max();
        let mut keys: Vec<String> = entries.into_iter().map(|entry| entry.key).collect();
        keys.sort();
        Ok(ShortTermSummary {
            total_items: keys.len(),
            keys,
            last_updated,
        })
    }

    // Episodic tier

    /// Validates and appends an episode to the log, then mirrors it into the
    /// semantic index when one is configured.
    ///
    /// Index failures are reported in the receipt; the log entry stays.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Record`] naming missing fields before any I/O,
    /// or [`MemoryError::Store`] when the log write fails.
    pub async fn append_episode(&self, draft: NewEpisode) -> MemoryResult<EpisodeReceipt> {
        let episode = match draft.validate() {
            Ok(episode) => episode,
            Err(err) => {
                warn!(component = "episodic", key = "-", outcome = %TraceOutcome::Rejected, error = %err, "episode rejected");
                return Err(err.into());
            }
        };

        let payload = episode.to_payload()?;
        let result = self
            .store
            .insert(EPISODIC_LOG, payload)
            .await
            .map_err(MemoryError::from);
        let id = traced("episodic", episode.user_id(), result, |_| TraceOutcome::Written)?;
        let episode = episode.with_id(id);

        let index = self.index_episode(&episode).await;
        Ok(EpisodeReceipt { episode, index })
    }

    async fn index_episode(&self, episode: &Episode) -> IndexOutcome {
        let Some(semantic) = &self.semantic else {
            return IndexOutcome::Disabled;
        };
        let point = PointId::random();
        let result = async {
            let vector = semantic.embedder.embed(episode.query()).await?;
            semantic.index.upsert_episode(point, vector, episode).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(component = "semantic", key = %point, outcome = %TraceOutcome::Written, user_id = episode.user_id(), "episode indexed");
                IndexOutcome::Indexed(point)
            }
            Err(err) => {
                warn!(component = "semantic", key = %point, outcome = %TraceOutcome::Failed, error = %err, "episode logged but not indexed");
                IndexOutcome::Failed(err.to_string())
            }
        }
    }

    /// Returns episodes newest first, optionally for one user and capped.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] on read failure or
    /// [`MemoryError::Record`] for an undecodable entry.
    pub async fn get_episodes(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<Episode>> {
        let query = user_id.map_or_else(Filter::new, |user_id| filter([("user_id", user_id)]));
        let mut options = FindOptions::default().sort_desc("timestamp");
        if let Some(limit) = limit {
            options = options.limit(limit);
        }
        let episodes = self
            .store
            .find(EPISODIC_LOG, &query, &options)
            .await?
            .into_iter()
            .map(|document| Episode::from_document(document).map_err(MemoryError::from))
            .collect::<MemoryResult<Vec<_>>>()?;
        debug!(user_id, count = episodes.len(), "read episodes");
        Ok(episodes)
    }

    /// Truncates the episode log. The semantic index is left untouched; see
    /// [`MemoryManager::forget_user`].
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the delete fails.
    pub async fn clear_episodes(&self) -> MemoryResult<u64> {
        let result = self
            .store
            .delete(EPISODIC_LOG, &Filter::new())
            .await
            .map_err(MemoryError::from);
        traced("episodic", "*", result, |removed| removed_outcome(*removed))
    }

    // Preference tier

    /// Returns the preference record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] on read failure or
    /// [`MemoryError::Record`] for an undecodable record.
    pub async fn get_user_preferences(
        &self,
        key: &PreferenceKey,
    ) -> MemoryResult<Option<PreferenceRecord>> {
        self.store
            .find_one(PREFERENCES, &key.to_filter())
            .await?
            .map(|document| PreferenceRecord::from_document(document).map_err(MemoryError::from))
            .transpose()
    }

    /// Returns every preference record, optionally only those scoped to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] on read failure or
    /// [`MemoryError::Record`] for an undecodable record.
    pub async fn list_preferences(&self, user_id: Option<&str>) -> MemoryResult<Vec<PreferenceRecord>> {
        let query = user_id.map_or_else(Filter::new, |user_id| filter([("user_id", user_id)]));
        self.preference_records(&query, &FindOptions::default()).await
    }

    /// Merges `attributes` into the record stored under `key` and writes the
    /// result back, returning it.
    ///
    /// Concurrent saves to one key are last-write-wins on the merged record.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the read or write fails.
    pub async fn save_user_preferences(
        &self,
        key: &PreferenceKey,
        attributes: Map<String, Value>,
    ) -> MemoryResult<PreferenceRecord> {
        let existing = self.get_user_preferences(key).await?;
        let merged = merge(existing.as_ref(), key, attributes, now_timestamp());
        let document = merged.to_document()?;
        let result = self
            .store
            .put(PREFERENCES, &key.to_filter(), document, true)
            .await
            .map_err(MemoryError::from);
        let label = key.to_string();
        traced("preferences", &label, result, |_| TraceOutcome::Written)?;
        Ok(merged)
    }

    /// Deletes the record under `key`, or every record when `key` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the delete fails.
    pub async fn delete_preferences(&self, key: Option<&PreferenceKey>) -> MemoryResult<u64> {
        let query = key.map_or_else(Filter::new, PreferenceKey::to_filter);
        let label = key.map_or_else(|| "*".to_owned(), ToString::to_string);
        let result = self
            .store
            .delete(PREFERENCES, &query)
            .await
            .map_err(MemoryError::from);
        traced("preferences", &label, result, |removed| removed_outcome(*removed))
    }

    /// Returns the most recently written preference records first, optionally
    /// for a single item.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] on read failure or
    /// [`MemoryError::Record`] for an undecodable record.
    pub async fn preference_history(
        &self,
        item_name: Option<&str>,
        limit: usize,
    ) -> MemoryResult<Vec<PreferenceRecord>> {
        let query = item_name.map_or_else(Filter::new, |item| filter([("item_name", item)]));
        let options = FindOptions::default().sort_desc("timestamp").limit(limit);
        self.preference_records(&query, &options).await
    }

    async fn preference_records(
        &self,
        query: &Filter,
        options: &FindOptions,
    ) -> MemoryResult<Vec<PreferenceRecord>> {
        self.store
            .find(PREFERENCES, query, options)
            .await?
            .into_iter()
            .map(|document| PreferenceRecord::from_document(document).map_err(MemoryError::from))
            .collect()
    }

    // Long-term key/value tier

    /// Stores `value` under `(user_id, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the write fails.
    pub async fn write_long(&self, user_id: &str, key: &str, value: Value) -> MemoryResult<()> {
        let document = document_of([("value", value), ("timestamp", Value::from(now_timestamp()))]);
        let result = self
            .store
            .put(LONG_TERM, &long_term_filter(user_id, key), document, true)
            .await
            .map(|_| ())
            .map_err(MemoryError::from);
        let label = format!("{user_id}/{key}");
        traced("long_term", &label, result, |_| TraceOutcome::Written)
    }

    /// Returns the value stored under `(user_id, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the read fails.
    pub async fn read_long(&self, user_id: &str, key: &str) -> MemoryResult<Option<Value>> {
        Ok(self
            .store
            .find_one(LONG_TERM, &long_term_filter(user_id, key))
            .await?
            .and_then(|mut document| document.remove("value")))
    }

    // Mailbox

    /// Queues a message for `to_agent`, returning its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the write fails.
    pub async fn send_message(
        &self,
        from_agent: &str,
        to_agent: &str,
        body: &str,
    ) -> MemoryResult<String> {
        let message = Message::new(from_agent, to_agent, body, now_timestamp());
        let result = self
            .store
            .insert(MESSAGES, message.to_document()?)
            .await
            .map_err(MemoryError::from);
        traced("mailbox", to_agent, result, |_| TraceOutcome::Written)
    }

    /// Drains every message addressed to `to_agent`, oldest first.
    ///
    /// A message is returned by exactly one call, even when several readers
    /// drain the same mailbox concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the drain fails.
    pub async fn get_messages(&self, to_agent: &str) -> MemoryResult<Vec<Message>> {
        let result = self
            .store
            .take(MESSAGES, &filter([("to_agent", to_agent)]))
            .await
            .map_err(MemoryError::from);
        let documents = traced("mailbox", to_agent, result, |taken| {
            removed_outcome(taken.len() as u64)
        })?;
        let mut messages = documents
            .into_iter()
            .map(|document| Message::from_document(document).map_err(MemoryError::from))
            .collect::<MemoryResult<Vec<_>>>()?;
        messages.sort_by(|a, b| a.timestamp().cmp(b.timestamp()));
        Ok(messages)
    }

    // Blackboard

    /// Publishes `value` under `key`; the last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the write fails.
    pub async fn share_data(&self, key: &str, value: Value) -> MemoryResult<()> {
        let document = document_of([("value", value), ("timestamp", Value::from(now_timestamp()))]);
        let result = self
            .store
            .put(SHARED_DATA, &filter([("key", key)]), document, true)
            .await
            .map(|_| ())
            .map_err(MemoryError::from);
        traced("blackboard", key, result, |_| TraceOutcome::Written)
    }

    /// Returns the value published under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the read fails.
    pub async fn get_shared_data(&self, key: &str) -> MemoryResult<Option<Value>> {
        Ok(self
            .store
            .find_one(SHARED_DATA, &filter([("key", key)]))
            .await?
            .and_then(|mut document| document.remove("value")))
    }

    /// Removes every blackboard entry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Store`] when the delete fails.
    pub async fn clear_shared_data(&self) -> MemoryResult<u64> {
        let result = self
            .store
            .delete(SHARED_DATA, &Filter::new())
            .await
            .map_err(MemoryError::from);
        traced("blackboard", "*", result, |removed| removed_outcome(*removed))
    }

    // Semantic recall

    /// Embeds `query_text` and returns similar episodes, best first.
    ///
    /// `limit` and `score_threshold` default to the index settings; a match
    /// scoring exactly the threshold is included.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::SemanticDisabled`] without an index, an
    /// embedding error, or the index's transport error.
    pub async fn semantic_search(
        &self,
        query_text: &str,
        user_id: Option<&str>,
        limit: Option<usize>,
        score_threshold: Option<f32>,
    ) -> MemoryResult<Vec<EpisodeMatch>> {
        let semantic = self.semantic.as_ref().ok_or(MemoryError::SemanticDisabled)?;
        let vector = semantic.embedder.embed(query_text).await?;

        let mut request = SearchRequest::new(vector, &self.settings);
        if let Some(user_id) = user_id {
            request = request.for_user(user_id);
        }
        if let Some(limit) = limit {
            request = request.limit(limit);
        }
        if let Some(score_threshold) = score_threshold {
            request = request.score_threshold(score_threshold);
        }

        let matches = semantic.index.search(&request).await.inspect_err(|err| {
            warn!(user_id, error = %err, "semantic search failed");
        })?;
        debug!(user_id, count = matches.len(), "semantic search");
        Ok(matches)
    }

    /// Removes every semantic index point owned by `user_id`. A no-op when
    /// semantic indexing is disabled.
    ///
    /// # Errors
    ///
    /// Returns the index's transport error.
    pub async fn forget_user(&self, user_id: &str) -> MemoryResult<()> {
        let Some(semantic) = &self.semantic else {
            info!(component = "semantic", key = user_id, outcome = %TraceOutcome::Skipped, "no index to forget from");
            return Ok(());
        };
        let result = semantic.index.delete_user(user_id).await;
        traced("semantic", user_id, result, |_| TraceOutcome::Removed)
    }
}

fn traced<T>(
    component: &'static str,
    key: &str,
    result: MemoryResult<T>,
    outcome: impl FnOnce(&T) -> TraceOutcome,
) -> MemoryResult<T> {
    match &result {
        Ok(value) => info!(component, key, outcome = %outcome(value), "memory write"),
        Err(err) => {
            warn!(component, key, outcome = %TraceOutcome::Failed, error = %err, "memory write failed");
        }
    }
    result
}

fn removed_outcome(removed: u64) -> TraceOutcome {
    if removed == 0 {
        TraceOutcome::Unchanged
    } else {
        TraceOutcome::Removed
    }
}

fn long_term_filter(user_id: &str, key: &str) -> Filter {
    filter([("user_id", user_id), ("key", key)])
}

fn document_of<const N: usize>(fields: [(&str, Value); N]) -> Document {
    fields
        .into_iter()
        .map(|(field, value)| (field.to_owned(), value))
        .collect()
}

fn decode<T: DeserializeOwned>(document: Document) -> MemoryResult<T> {
    serde_json::from_value(Value::Object(document))
        .map_err(|err| MemoryError::from(agent_primitives::Error::from(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::index::LocalEpisodeIndex;
    use serde_json::json;

    fn manager(scratch: ScratchMode) -> MemoryManager {
        MemoryManager::builder(StoreBackend::in_memory())
            .with_scratch(scratch)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn scratch_round_trip_in_both_modes() {
        for mode in [ScratchMode::Store, ScratchMode::Process] {
            let memory = manager(mode);
            memory.write_short("cart", json!(["watch"])).await.unwrap();
            memory.write_short("step", json!(1)).await.unwrap();
            memory.write_short("step", json!(2)).await.unwrap();

            assert_eq!(memory.read_short("step").await.unwrap(), Some(json!(2)));
            let summary = memory.short_term_summary().await.unwrap();
            assert_eq!(summary.total_items, 2);
            assert_eq!(summary.keys, vec!["cart".to_owned(), "step".to_owned()]);
            assert!(summary.last_updated.is_some());

            assert_eq!(memory.clear_short().await.unwrap(), 2);
            assert_eq!(memory.read_short("cart").await.unwrap(), None);
            assert_eq!(memory.short_term_summary().await.unwrap(), ShortTermSummary::default());
        }
    }

    #[tokio::test]
    async fn process_scratch_is_not_shared_through_the_store() {
        let store = StoreBackend::in_memory();
        let local = MemoryManager::builder(store.clone())
            .with_scratch(ScratchMode::Process)
            .build()
            .unwrap();
        let shared = MemoryManager::builder(store).build().unwrap();

        local.write_short("k", json!("v")).await.unwrap();
        assert_eq!(shared.read_short("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn episodes_are_newest_first_and_filtered() {
        let memory = manager(ScratchMode::Store);
        for (user, query, timestamp) in [
            ("u1", "watch", "2024-05-01T10:00:00.000000Z"),
            ("u2", "phone", "2024-05-02T10:00:00.000000Z"),
            ("u1", "strap", "2024-05-03T10:00:00.000000Z"),
        ] {
            let receipt = memory
                .append_episode(
                    NewEpisode::new()
                        .user_id(user)
                        .query(query)
                        .final_items(["x"])
                        .timestamp(timestamp),
                )
                .await
                .unwrap();
            assert_eq!(receipt.index, IndexOutcome::Disabled);
            assert!(receipt.episode.id().is_some());
        }

        let all = memory.get_episodes(None, None).await.unwrap();
        assert_eq!(
            all.iter().map(Episode::query).collect::<Vec<_>>(),
            ["strap", "phone", "watch"]
        );

        let mine = memory.get_episodes(Some("u1"), Some(1)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].query(), "strap");
        assert!(mine[0].id().is_some());
    }

    #[tokio::test]
    async fn long_term_and_blackboard() {
        let memory = manager(ScratchMode::Store);
        memory.write_long("u1", "size", json!("M")).await.unwrap();
        memory.write_long("u1", "size", json!("L")).await.unwrap();
        assert_eq!(memory.read_long("u1", "size").await.unwrap(), Some(json!("L")));
        assert_eq!(memory.read_long("u2", "size").await.unwrap(), None);

        memory.share_data("query", json!("watch")).await.unwrap();
        memory.share_data("query", json!("clock")).await.unwrap();
        assert_eq!(memory.get_shared_data("query").await.unwrap(), Some(json!("clock")));
        assert_eq!(memory.clear_shared_data().await.unwrap(), 1);
        assert_eq!(memory.get_shared_data("query").await.unwrap(), None);
    }

    #[tokio::test]
    async fn semantic_requires_both_halves() {
        let err = MemoryManager::builder(StoreBackend::in_memory())
            .with_index(Arc::new(LocalEpisodeIndex::new()))
            .build()
            .expect_err("embedder missing");
        assert!(matches!(err, MemoryError::InvalidConfig(_)));

        let err = MemoryManager::builder(StoreBackend::in_memory())
            .with_index(Arc::new(LocalEpisodeIndex::new()))
            .with_embedder(Arc::new(HashingEmbedder::new(16).unwrap()))
            .build()
            .expect_err("dimension mismatch");
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn search_without_index_is_unavailable() {
        let memory = manager(ScratchMode::Store);
        let err = memory
            .semantic_search("watch", None, None, None)
            .await
            .expect_err("disabled");
        assert_eq!(err.kind(), crate::ErrorKind::Unavailable);
        memory.forget_user("u1").await.unwrap();
    }
}
