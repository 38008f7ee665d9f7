//! Environment-driven configuration for the memory subsystem.
//!
//! [`RuntimeConfig::from_env`] reads the process environment; tests and
//! embedders can feed any lookup through [`RuntimeConfig::from_lookup`].

#![warn(missing_docs, clippy::pedantic)]

use std::str::FromStr;
use std::time::Duration;

use agent_memory::{HttpEmbedderConfig, IndexSettings, QdrantConfig, ScratchMode};
use agent_store::{RemoteConfig, StoreConfig};
use anyhow::{Context, Result, bail};
use tracing::debug;

/// Which semantic index, if any, mirrors appended episodes.
#[derive(Debug, Clone)]
pub enum SemanticBackend {
    /// Episodes are only logged.
    Disabled,
    /// An in-process cosine index.
    Local,
    /// A Qdrant collection.
    Qdrant(QdrantConfig),
}

/// Which embedding provider feeds the semantic index.
#[derive(Debug, Clone)]
pub enum EmbedderSettings {
    /// The offline feature-hashing embedder.
    Hashing {
        /// Vector dimension.
        dimensions: usize,
    },
    /// A remote model server.
    Http(HttpEmbedderConfig),
}

/// Everything needed to assemble a memory manager.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    store: StoreConfig,
    scratch: ScratchMode,
    index: IndexSettings,
    semantic: SemanticBackend,
    embedder: EmbedderSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let index = IndexSettings::default();
        Self {
            store: StoreConfig::new(),
            scratch: ScratchMode::Store,
            embedder: EmbedderSettings::Hashing {
                dimensions: index.dimensions(),
            },
            index,
            semantic: SemanticBackend::Disabled,
        }
    }
}

impl RuntimeConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when a variable holds an unusable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration from `lookup`, which maps variable names to
    /// values. Blank values count as absent.
    ///
    /// # Errors
    ///
    /// Fails when a variable holds an unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let timeout = Duration::from_secs(parse_or(&get, "MEMORY_TIMEOUT_SECS", 5_u64)?);

        let mut store = StoreConfig::new();
        if let Some(url) = get("MEMORY_STORE_URL") {
            let mut remote = RemoteConfig::new(url)
                .with_database(get("MEMORY_DB_NAME").unwrap_or_else(|| "shopping_ai".to_owned()))
                .with_data_source(
                    get("MEMORY_STORE_DATA_SOURCE").unwrap_or_else(|| "Cluster0".to_owned()),
                )
                .with_timeout(timeout);
            if let Some(api_key) = get("MEMORY_STORE_API_KEY") {
                remote = remote.with_api_key(api_key);
            }
            store = store.with_remote(remote);
        }
        if let Some(dir) = get("MEMORY_DATA_DIR") {
            store = store.with_data_dir(dir);
        }

        let scratch = match get("MEMORY_SCRATCH").as_deref() {
            None | Some("store") => ScratchMode::Store,
            Some("process") => ScratchMode::Process,
            Some(other) => bail!("MEMORY_SCRATCH must be `store` or `process`, got `{other}`"),
        };

        let dimensions = parse_or(&get, "MEMORY_VECTOR_DIM", IndexSettings::default().dimensions())?;
        if dimensions == 0 {
            bail!("MEMORY_VECTOR_DIM must be positive");
        }
        let score_threshold = parse_or(
            &get,
            "MEMORY_SCORE_THRESHOLD",
            IndexSettings::default().score_threshold(),
        )?;
        if !score_threshold.is_finite() {
            bail!("MEMORY_SCORE_THRESHOLD must be a finite number");
        }
        let mut index = IndexSettings::default()
            .with_dimensions(dimensions)
            .with_limit(parse_or(&get, "MEMORY_SEARCH_LIMIT", IndexSettings::default().limit())?)
            .with_score_threshold(score_threshold);
        if let Some(collection) = get("QDRANT_COLLECTION") {
            index = index.with_collection(collection);
        }

        let semantic = match (get("QDRANT_URL"), get("MEMORY_SEMANTIC").as_deref()) {
            (_, Some("off")) => SemanticBackend::Disabled,
            (Some(url), _) => {
                let mut qdrant = QdrantConfig::new(url)
                    .with_settings(index.clone())
                    .with_timeout(timeout);
                if let Some(api_key) = get("QDRANT_API_KEY") {
                    qdrant = qdrant.with_api_key(api_key);
                }
                SemanticBackend::Qdrant(qdrant)
            }
            (None, Some("local")) => SemanticBackend::Local,
            (None, None) => SemanticBackend::Disabled,
            (None, Some(other)) => bail!("MEMORY_SEMANTIC must be `local` or `off`, got `{other}`"),
        };

        let embedder = match get("EMBEDDING_URL") {
            Some(url) => {
                let mut http = HttpEmbedderConfig::new(url)
                    .with_model(get("EMBEDDING_MODEL").unwrap_or_else(|| "all-minilm".to_owned()))
                    .with_dimensions(dimensions)
                    .with_timeout(timeout);
                if let Some(api_key) = get("EMBEDDING_API_KEY") {
                    http = http.with_api_key(api_key);
                }
                EmbedderSettings::Http(http)
            }
            None => EmbedderSettings::Hashing { dimensions },
        };

        let config = Self {
            store,
            scratch,
            index,
            semantic,
            embedder,
        };
        debug!(?config, "loaded memory configuration");
        Ok(config)
    }

    /// Returns the store selection.
    #[must_use]
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Returns where scratch entries live.
    #[must_use]
    pub const fn scratch(&self) -> ScratchMode {
        self.scratch
    }

    /// Returns search defaults and the vector dimension.
    #[must_use]
    pub fn index(&self) -> &IndexSettings {
        &self.index
    }

    /// Returns the semantic index selection.
    #[must_use]
    pub fn semantic(&self) -> &SemanticBackend {
        &self.semantic
    }

    /// Returns the embedder selection.
    #[must_use]
    pub fn embedder(&self) -> &EmbedderSettings {
        &self.embedder
    }

    /// Replaces the store selection.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Replaces the scratch placement.
    #[must_use]
    pub fn with_scratch(mut self, scratch: ScratchMode) -> Self {
        self.scratch = scratch;
        self
    }

    /// Replaces the semantic index selection.
    #[must_use]
    pub fn with_semantic(mut self, semantic: SemanticBackend) -> Self {
        self.semantic = semantic;
        self
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value `{raw}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<RuntimeConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        RuntimeConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = load(&[]).unwrap();
        assert!(config.store().remote().is_none());
        assert!(config.store().data_dir().is_none());
        assert_eq!(config.scratch(), ScratchMode::Store);
        assert_eq!(config.index(), &IndexSettings::default());
        assert!(matches!(config.semantic(), SemanticBackend::Disabled));
        assert!(matches!(
            config.embedder(),
            EmbedderSettings::Hashing { dimensions: 384 }
        ));
    }

    #[test]
    fn reads_store_and_index_settings() {
        let config = load(&[
            ("MEMORY_STORE_URL", "https://data.example.com/endpoint/data/v1"),
            ("MEMORY_DB_NAME", "memory"),
            ("MEMORY_TIMEOUT_SECS", "2"),
            ("MEMORY_DATA_DIR", "/tmp/memory"),
            ("MEMORY_SCRATCH", "process"),
            ("QDRANT_URL", "http://localhost:6333"),
            ("QDRANT_COLLECTION", "episodes"),
            ("MEMORY_SCORE_THRESHOLD", "0.6"),
            ("MEMORY_SEARCH_LIMIT", "3"),
        ])
        .unwrap();

        let remote = config.store().remote().unwrap();
        assert_eq!(remote.database(), "memory");
        assert_eq!(remote.timeout(), Duration::from_secs(2));
        assert!(config.store().data_dir().is_some());
        assert_eq!(config.scratch(), ScratchMode::Process);

        let SemanticBackend::Qdrant(qdrant) = config.semantic() else {
            panic!("expected qdrant");
        };
        assert_eq!(qdrant.url(), "http://localhost:6333");
        assert_eq!(qdrant.settings().collection(), "episodes");
        assert_eq!(qdrant.settings().limit(), 3);
        assert!((qdrant.settings().score_threshold() - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn local_semantic_and_http_embedder() {
        let config = load(&[
            ("MEMORY_SEMANTIC", "local"),
            ("EMBEDDING_URL", "http://localhost:11434/v1"),
            ("EMBEDDING_MODEL", "nomic-embed-text"),
            ("MEMORY_VECTOR_DIM", "768"),
        ])
        .unwrap();
        assert!(matches!(config.semantic(), SemanticBackend::Local));
        let EmbedderSettings::Http(http) = config.embedder() else {
            panic!("expected http embedder");
        };
        assert_eq!(http.model(), "nomic-embed-text");
        assert_eq!(config.index().dimensions(), 768);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[("MEMORY_TIMEOUT_SECS", "soon")]).is_err());
        assert!(load(&[("MEMORY_SCRATCH", "disk")]).is_err());
        assert!(load(&[("MEMORY_VECTOR_DIM", "0")]).is_err());
        assert!(load(&[("MEMORY_SEMANTIC", "remote")]).is_err());
        assert!(load(&[("MEMORY_SCORE_THRESHOLD", "NaN")]).is_err());
    }

    #[test]
    fn blank_values_count_as_absent() {
        let config = load(&[("MEMORY_STORE_URL", "  "), ("QDRANT_URL", "")]).unwrap();
        assert!(config.store().remote().is_none());
        assert!(matches!(config.semantic(), SemanticBackend::Disabled));
    }
}
