//! Semantic episode index: a local cosine index and a Qdrant client.

use std::collections::HashMap;
use std::time::Duration;

use agent_primitives::{Episode, PointId};
use agent_store::http::JsonClient;
use agent_store::{Document, StoreError, sanitize_document};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::embeddings::{DEFAULT_DIMENSIONS, EmbeddingVector};
use crate::{MemoryError, MemoryResult};

/// Payload field carrying the owning user.
pub const USER_FIELD: &str = "user_id";

/// Sizing and ranking defaults for a semantic index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    collection: String,
    dimensions: usize,
    limit: usize,
    score_threshold: f32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            collection: "shopping_episodes".to_owned(),
            dimensions: DEFAULT_DIMENSIONS,
            limit: 5,
            score_threshold: 0.75,
        }
    }
}

impl IndexSettings {
    /// Sets the collection name.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Sets the vector dimension.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Sets the default result cap.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the default minimum score.
    #[must_use]
    pub fn with_score_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the vector dimension.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Returns the default result cap.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the default minimum score.
    #[must_use]
    pub const fn score_threshold(&self) -> f32 {
        self.score_threshold
    }
}

/// Filtered nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    vector: EmbeddingVector,
    user_id: Option<String>,
    limit: usize,
    score_threshold: f32,
}

impl SearchRequest {
    /// Creates a query using the defaults in `settings`.
    #[must_use]
    pub fn new(vector: EmbeddingVector, settings: &IndexSettings) -> Self {
        Self {
            vector,
            user_id: None,
            limit: settings.limit,
            score_threshold: settings.score_threshold,
        }
    }

    /// Restricts matches to episodes owned by `user_id`.
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Overrides the result cap.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Overrides the minimum score. Matches scoring exactly this value are kept.
    #[must_use]
    pub fn score_threshold(mut self, score_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self
    }

    /// Returns the query vector.
    #[must_use]
    pub fn vector(&self) -> &EmbeddingVector {
        &self.vector
    }

    /// Returns the user filter.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeMatch {
    /// Episode stored as the point payload.
    pub episode: Episode,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Similarity-searchable store of episode vectors.
#[async_trait]
pub trait EpisodeIndex: Send + Sync {
    /// Prepares the index (collection, `user_id` keyword index). Idempotent.
    async fn ensure_ready(&self) -> MemoryResult<()>;

    /// Inserts or overwrites the point `id`.
    async fn upsert_episode(
        &self,
        id: PointId,
        vector: EmbeddingVector,
        episode: &Episode,
    ) -> MemoryResult<()>;

    /// Returns matches at or above the threshold, best first.
    async fn search(&self, request: &SearchRequest) -> MemoryResult<Vec<EpisodeMatch>>;

    /// Removes every point owned by `user_id`.
    async fn delete_user(&self, user_id: &str) -> MemoryResult<()>;
}

/// In-process cosine index.
#[derive(Debug, Default)]
pub struct LocalEpisodeIndex {
    points: RwLock<HashMap<PointId, (EmbeddingVector, Episode)>>,
    dimensions: Option<usize>,
}

impl LocalEpisodeIndex {
    /// Creates an empty index accepting vectors of any (consistent) length.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty index that rejects vectors not of `dimensions` length.
    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            points: RwLock::default(),
            dimensions: Some(dimensions),
        }
    }

    /// Returns the number of stored points.
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    /// Returns `true` when no point is stored.
    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl EpisodeIndex for LocalEpisodeIndex {
    async fn ensure_ready(&self) -> MemoryResult<()> {
        Ok(())
    }

    async fn upsert_episode(
        &self,
        id: PointId,
        vector: EmbeddingVector,
        episode: &Episode,
    ) -> MemoryResult<()> {
        if let Some(expected) = self.dimensions.filter(|expected| *expected != vector.len()) {
            return Err(MemoryError::embedding(format!(
                "vector has {} dimensions, index expects {expected}",
                vector.len()
            )));
        }
        let mut guard = self.points.write().await;
        guard.insert(id, (vector, episode.clone()));
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> MemoryResult<Vec<EpisodeMatch>> {
        let guard = self.points.read().await;
        let mut matches: Vec<EpisodeMatch> = guard
            .values()
            .filter(|(_, episode)| {
                request
                    .user_id()
                    .is_none_or(|user_id| episode.user_id() == user_id)
            })
            .filter_map(|(vector, episode)| {
                let score = vector.cosine_similarity(&request.vector);
                (score >= request.score_threshold).then(|| EpisodeMatch {
                    episode: episode.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(request.limit);
        Ok(matches)
    }

    async fn delete_user(&self, user_id: &str) -> MemoryResult<()> {
        let mut guard = self.points.write().await;
        guard.retain(|_, (_, episode)| episode.user_id() != user_id);
        Ok(())
    }
}

/// Connection settings for [`QdrantIndex`].
#[derive(Clone)]
pub struct QdrantConfig {
    url: String,
    api_key: Option<String>,
    settings: IndexSettings,
    timeout: Duration,
}

impl std::fmt::Debug for QdrantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantConfig")
            .field("url", &self.url)
            .field("settings", &self.settings)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl QdrantConfig {
    /// Targets the Qdrant REST endpoint at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            settings: IndexSettings::default(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Sets the API key sent in the `api-key` header.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Replaces the index settings.
    #[must_use]
    pub fn with_settings(mut self, settings: IndexSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the index settings.
    #[must_use]
    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }
}

/// Episode index backed by a Qdrant collection.
///
/// The collection and its `user_id` keyword index are created on first use;
/// concurrent first callers share one bootstrap.
#[derive(Debug)]
pub struct QdrantIndex {
    client: JsonClient,
    settings: IndexSettings,
    ready: OnceCell<()>,
}

#[derive(Deserialize)]
struct QdrantEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    payload_schema: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Document>,
}

impl QdrantIndex {
    /// Creates the client. No request is sent until first use.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Index`] for a malformed URL or API key.
    pub fn new(config: &QdrantConfig) -> MemoryResult<Self> {
        let mut client = JsonClient::new(&config.url, config.timeout).map_err(MemoryError::index)?;
        if let Some(api_key) = &config.api_key {
            client = client
                .with_header("api-key", api_key)
                .map_err(MemoryError::index)?;
        }
        Ok(Self {
            client,
            settings: config.settings.clone(),
            ready: OnceCell::new(),
        })
    }

    fn collection_path(&self, suffix: &str) -> String {
        format!("collections/{}{suffix}", self.settings.collection)
    }

    async fn ensure_collection(&self) -> MemoryResult<()> {
        let info = match self.client.get(&self.collection_path("")).await {
            Ok(response) => decode::<CollectionInfo>(response)?,
            Err(StoreError::Rejected { status: 404, .. }) => {
                info!(collection = %self.settings.collection, dimensions = self.settings.dimensions, "creating semantic index collection");
                self.client
                    .put(
                        &self.collection_path(""),
                        &json!({
                            "vectors": { "size": self.settings.dimensions, "distance": "Cosine" }
                        }),
                    )
                    .await
                    .map_err(MemoryError::index)?;
                CollectionInfo {
                    payload_schema: serde_json::Map::new(),
                }
            }
            Err(err) => return Err(MemoryError::index(err)),
        };

        if info.payload_schema.contains_key(USER_FIELD) {
            debug!(collection = %self.settings.collection, "user_id index already present");
            return Ok(());
        }
        self.client
            .put(
                &self.collection_path("/index?wait=true"),
                &json!({ "field_name": USER_FIELD, "field_schema": "keyword" }),
            )
            .await
            .map_err(MemoryError::index)?;
        info!(collection = %self.settings.collection, "created user_id keyword index");
        Ok(())
    }
}

fn decode<T: for<'de> Deserialize<'de>>(response: Value) -> MemoryResult<T> {
    serde_json::from_value::<QdrantEnvelope<T>>(response)
        .map(|envelope| envelope.result)
        .map_err(|err| MemoryError::index_response(err.to_string()))
}

fn user_filter(user_id: &str) -> Value {
    json!({ "must": [{ "key": USER_FIELD, "match": { "value": user_id } }] })
}

fn search_body(request: &SearchRequest) -> Value {
    let mut body = json!({
        "vector": request.vector,
        "limit": request.limit,
        "with_payload": true,
        "score_threshold": request.score_threshold,
    });
    if let (Some(user_id), Value::Object(map)) = (request.user_id(), &mut body) {
        map.insert("filter".to_owned(), user_filter(user_id));
    }
    body
}

#[async_trait]
impl EpisodeIndex for QdrantIndex {
    async fn ensure_ready(&self) -> MemoryResult<()> {
        self.ready
            .get_or_try_init(|| self.ensure_collection())
            .await
            .map(|_| ())
    }

    async fn upsert_episode(
        &self,
        id: PointId,
        vector: EmbeddingVector,
        episode: &Episode,
    ) -> MemoryResult<()> {
        self.ensure_ready().await?;
        let body = json!({
            "points": [{
                "id": id.to_string(),
                "vector": vector,
                "payload": episode.to_payload()?,
            }]
        });
        self.client
            .put(&self.collection_path("/points?wait=true"), &body)
            .await
            .map_err(MemoryError::index)?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> MemoryResult<Vec<EpisodeMatch>> {
        self.ensure_ready().await?;
        let response = self
            .client
            .post(&self.collection_path("/points/search"), &search_body(request))
            .await
            .map_err(MemoryError::index)?;
        let points: Vec<ScoredPoint> = decode(response)?;
        Ok(collect_matches(points, request.score_threshold))
    }

    async fn delete_user(&self, user_id: &str) -> MemoryResult<()> {
        self.ensure_ready().await?;
        self.client
            .post(
                &self.collection_path("/points/delete?wait=true"),
                &json!({ "filter": user_filter(user_id) }),
            )
            .await
            .map_err(MemoryError::index)?;
        Ok(())
    }
}

fn collect_matches(points: Vec<ScoredPoint>, score_threshold: f32) -> Vec<EpisodeMatch> {
    let mut matches: Vec<EpisodeMatch> = points
        .into_iter()
        .filter(|point| point.score >= score_threshold)
        .filter_map(|point| {
            let payload = sanitize_document(point.payload?);
            match Episode::from_document(payload) {
                Ok(episode) => Some(EpisodeMatch {
                    episode,
                    score: point.score,
                }),
                Err(err) => {
                    warn!(error = %err, "skipping point with undecodable payload");
                    None
                }
            }
        })
        .collect();
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_primitives::NewEpisode;

    fn episode(user_id: &str, query: &str) -> Episode {
        NewEpisode::new()
            .user_id(user_id)
            .query(query)
            .final_items(["item"])
            .validate()
            .unwrap()
    }

    fn vector(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::from_slice(values).unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_point_id() {
        let index = LocalEpisodeIndex::new();
        let id = PointId::random();
        index
            .upsert_episode(id, vector(&[1.0, 0.0]), &episode("u1", "watch"))
            .await
            .unwrap();
        index
            .upsert_episode(id, vector(&[0.0, 1.0]), &episode("u1", "phone"))
            .await
            .unwrap();
        assert_eq!(index.len().await, 1);

        let request = SearchRequest::new(vector(&[0.0, 1.0]), &IndexSettings::default());
        let matches = index.search(&request).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].episode.query(), "phone");
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let index = LocalEpisodeIndex::with_dimensions(3);
        let err = index
            .upsert_episode(PointId::random(), vector(&[1.0]), &episode("u", "q"))
            .await
            .expect_err("dimension mismatch");
        assert!(matches!(err, MemoryError::Embedding { .. }));
    }

    #[tokio::test]
    async fn delete_user_removes_only_their_points() {
        let index = LocalEpisodeIndex::new();
        for user in ["a", "b", "a"] {
            index
                .upsert_episode(PointId::random(), vector(&[1.0]), &episode(user, "q"))
                .await
                .unwrap();
        }
        index.delete_user("a").await.unwrap();
        assert_eq!(index.len().await, 1);
    }

    #[test]
    fn search_body_carries_user_filter() {
        let request = SearchRequest::new(vector(&[0.5, 0.5]), &IndexSettings::default())
            .for_user("u1")
            .limit(3);
        let body = search_body(&request);
        assert_eq!(body["limit"], 3);
        assert_eq!(body["with_payload"], true);
        assert_eq!(body["filter"]["must"][0]["key"], "user_id");
        assert_eq!(body["filter"]["must"][0]["match"]["value"], "u1");
        assert!((body["score_threshold"].as_f64().unwrap() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn decodes_search_response() {
        let response = json!({
            "status": "ok",
            "time": 0.001,
            "result": [
                {"id": "a", "version": 1, "score": 0.8, "payload": {
                    "user_id": "u1", "query": "watch", "final_items": ["w"],
                    "timestamp": "2024-05-01T10:00:00.000000Z"
                }},
                {"id": "b", "version": 1, "score": 0.9, "payload": {
                    "user_id": "u1", "query": "clock", "final_items": [{"$oid": "65f0c0ffee00000000000001"}],
                    "timestamp": "2024-05-02T10:00:00.000000Z"
                }},
                {"id": "c", "version": 1, "score": 0.95, "payload": {"unrelated": true}}
            ]
        });
        let points: Vec<ScoredPoint> = decode(response).unwrap();
        let matches = collect_matches(points, 0.75);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].episode.query(), "clock");
        assert_eq!(matches[0].episode.final_items()[0], "65f0c0ffee00000000000001");
        assert_eq!(matches[1].episode.query(), "watch");
    }

    #[tokio::test]
    async fn unreachable_qdrant_is_a_connectivity_error() {
        let index = QdrantIndex::new(
            &QdrantConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        let request = SearchRequest::new(vector(&[1.0]), &IndexSettings::default());
        let err = index.search(&request).await.expect_err("nothing listens");
        assert_eq!(err.kind(), crate::ErrorKind::Connectivity);
    }
}
