//! Assembly of a memory manager from configuration.

use std::sync::Arc;

use agent_config::{EmbedderSettings, RuntimeConfig, SemanticBackend};
use agent_memory::{
    Embedder, EpisodeIndex, HashingEmbedder, HttpEmbedder, LocalEpisodeIndex, MemoryManager,
    QdrantIndex,
};
use agent_store::StoreBackend;
use anyhow::{Context, Result};
use tokio::sync::OnceCell;
use tracing::{info, warn};

static GLOBAL: OnceCell<MemoryRuntime> = OnceCell::const_new();

/// A connected memory manager together with the configuration it came from.
#[derive(Debug, Clone)]
pub struct MemoryRuntime {
    manager: MemoryManager,
    config: RuntimeConfig,
}

impl MemoryRuntime {
    /// Connects the store (falling back when the networked store is down),
    /// then wires the embedder and semantic index selected by `config`.
    ///
    /// An unreachable semantic index is logged, not fatal; its bootstrap is
    /// retried on first use.
    ///
    /// # Errors
    ///
    /// Fails when the embedder or index settings are invalid.
    pub async fn connect(config: RuntimeConfig) -> Result<Self> {
        let store = StoreBackend::connect(config.store()).await;
        let mut builder = MemoryManager::builder(store)
            .with_scratch(config.scratch())
            .with_index_settings(config.index().clone());

        if let Some(index) = build_index(&config)? {
            if let Err(err) = index.ensure_ready().await {
                warn!(error = %err, "semantic index not ready, will retry on first use");
            }
            builder = builder
                .with_index(index)
                .with_embedder(build_embedder(config.embedder())?);
        }

        let manager = builder.build().context("failed to assemble memory manager")?;
        info!(
            store = %manager.store().kind(),
            degraded = manager.store().is_degraded(),
            semantic = manager.is_semantic_enabled(),
            "memory runtime ready"
        );
        Ok(Self { manager, config })
    }

    /// Returns the memory manager.
    #[must_use]
    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }

    /// Returns the configuration the runtime was built from.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

fn build_index(config: &RuntimeConfig) -> Result<Option<Arc<dyn EpisodeIndex>>> {
    Ok(match config.semantic() {
        SemanticBackend::Disabled => None,
        SemanticBackend::Local => Some(Arc::new(LocalEpisodeIndex::with_dimensions(
            config.index().dimensions(),
        ))),
        SemanticBackend::Qdrant(qdrant) => Some(Arc::new(
            QdrantIndex::new(qdrant).context("invalid semantic index settings")?,
        )),
    })
}

fn build_embedder(settings: &EmbedderSettings) -> Result<Arc<dyn Embedder>> {
    Ok(match settings {
        EmbedderSettings::Hashing { dimensions } => Arc::new(HashingEmbedder::new(*dimensions)?),
        EmbedderSettings::Http(http) => {
            Arc::new(HttpEmbedder::new(http).context("invalid embedding service settings")?)
        }
    })
}

/// Returns the process-wide runtime, connecting it from the environment on
/// first call. Concurrent first callers share one connection attempt; a
/// failed attempt is retried by the next caller.
///
/// # Errors
///
/// Fails when the environment holds invalid settings.
pub async fn global() -> Result<&'static MemoryRuntime> {
    GLOBAL
        .get_or_try_init(|| async { MemoryRuntime::connect(RuntimeConfig::from_env()?).await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_memory::{IndexOutcome, ScratchMode};
    use agent_primitives::NewEpisode;
    use agent_store::StoreKind;
    use serde_json::json;

    #[tokio::test]
    async fn connects_with_local_semantic_index() {
        let config = RuntimeConfig::from_lookup(|name| match name {
            "MEMORY_SEMANTIC" => Some("local".to_owned()),
            "MEMORY_SCRATCH" => Some("process".to_owned()),
            _ => None,
        })
        .unwrap();
        let runtime = MemoryRuntime::connect(config).await.unwrap();
        let manager = runtime.manager();
        assert_eq!(manager.store().kind(), StoreKind::Memory);
        assert!(manager.is_semantic_enabled());
        assert_eq!(runtime.config().scratch(), ScratchMode::Process);

        let receipt = manager
            .append_episode(
                NewEpisode::new()
                    .user_id("u1")
                    .query("silver watch")
                    .final_items([json!({"name": "Watch", "price": 120})]),
            )
            .await
            .unwrap();
        assert!(matches!(receipt.index, IndexOutcome::Indexed(_)));

        let matches = manager
            .semantic_search("silver watch", Some("u1"), None, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn defaults_disable_semantic_indexing() {
        let runtime = MemoryRuntime::connect(RuntimeConfig::default()).await.unwrap();
        assert!(!runtime.manager().is_semantic_enabled());
        assert!(!runtime.manager().store().is_degraded());
    }
}
