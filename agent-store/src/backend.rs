//! Store backend abstraction and strategy selection.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::document::{Document, Filter, FindOptions, PutOutcome, sanitize_document};
use crate::file::{DEFAULT_LOG_COLLECTIONS, FileStore};
use crate::memory::InMemoryStore;
use crate::remote::{RemoteConfig, RemoteStore};
use crate::StoreResult;

/// Operations every document store implements.
///
/// Filters are top-level equality matches; an empty filter selects everything.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Checks that the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Returns the documents matching `filter`, ordered and capped by `options`.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>>;

    /// Appends a document, returning its identifier.
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<String>;

    /// Overwrites the fields of the first match with those of `document`;
    /// when nothing matches and `upsert` is set, inserts `filter ∪ document`.
    async fn put(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> StoreResult<PutOutcome>;

    /// Deletes every matching document, returning how many were removed.
    async fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Removes and returns every matching document. A document is returned to
    /// at most one caller even when several drain concurrently.
    async fn take(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;
}

/// Which strategy a [`StoreBackend`] ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Networked document database.
    Remote,
    /// Local JSON files.
    File,
    /// Process memory only.
    Memory,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

/// Strategy selection for [`StoreBackend::connect`].
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    remote: Option<RemoteConfig>,
    data_dir: Option<PathBuf>,
    log_collections: Vec<String>,
}

impl StoreConfig {
    /// Starts from an in-memory-only configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefers the networked store described by `remote`.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Uses JSON files under `dir` when the networked store is absent or down.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Marks a collection as append-only for the file fallback.
    #[must_use]
    pub fn with_log_collection(mut self, collection: impl Into<String>) -> Self {
        self.log_collections.push(collection.into());
        self
    }

    /// Returns the networked store settings, if any.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref()
    }

    /// Returns the fallback directory, if any.
    #[must_use]
    pub fn data_dir(&self) -> Option<&PathBuf> {
        self.data_dir.as_ref()
    }
}

/// Handle every memory tier goes through to reach persistence.
///
/// Reads pass through [`sanitize_document`] so no backend-specific identifier
/// type escapes; failures are logged here and returned typed.
#[derive(Clone)]
pub struct StoreBackend {
    inner: Arc<dyn DocumentStore>,
    kind: StoreKind,
    degraded: bool,
}

impl fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBackend")
            .field("kind", &self.kind)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

impl StoreBackend {
    /// Wraps an existing store.
    #[must_use]
    pub fn new(inner: Arc<dyn DocumentStore>, kind: StoreKind) -> Self {
        Self {
            inner,
            kind,
            degraded: false,
        }
    }

    /// Creates a fresh in-process backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), StoreKind::Memory)
    }

    /// Builds the backend described by `config`.
    ///
    /// The networked store is probed once; when it cannot be reached the
    /// failure is logged and the file fallback (or process memory) is used
    /// instead. Never fails: a degraded backend is still a working backend.
    pub async fn connect(config: &StoreConfig) -> Self {
        let mut degraded = false;
        if let Some(remote) = &config.remote {
            match Self::connect_remote(remote).await {
                Ok(backend) => return backend,
                Err(err) => {
                    warn!(endpoint = remote.endpoint(), error = %err, "networked store unavailable, falling back");
                    degraded = true;
                }
            }
        }

        let mut backend = match &config.data_dir {
            Some(dir) => {
                let logs = DEFAULT_LOG_COLLECTIONS
                    .iter()
                    .map(|name| (*name).to_owned())
                    .chain(config.log_collections.iter().cloned());
                match FileStore::open_with_logs(dir.clone(), logs).await {
                    Ok(store) => {
                        info!(dir = %dir.display(), "using file store");
                        Self::new(Arc::new(store), StoreKind::File)
                    }
                    Err(err) => {
                        warn!(dir = %dir.display(), error = %err, "file store unavailable, using process memory");
                        degraded = true;
                        Self::in_memory()
                    }
                }
            }
            None => {
                info!("using in-process store");
                Self::in_memory()
            }
        };
        backend.degraded = degraded;
        backend
    }

    async fn connect_remote(remote: &RemoteConfig) -> StoreResult<Self> {
        let store = RemoteStore::new(remote)?;
        store.ping().await?;
        info!(endpoint = remote.endpoint(), database = remote.database(), "connected to networked store");
        Ok(Self::new(Arc::new(store), StoreKind::Remote))
    }

    /// Returns the active strategy.
    #[must_use]
    pub const fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Returns `true` when a preferred backend was configured but unreachable.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Checks the backend is reachable.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure.
    pub async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await.inspect_err(|err| log_failure("ping", "", err))
    }

    /// Returns sanitised documents matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure after logging it.
    pub async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let documents = self
            .inner
            .find(collection, filter, options)
            .await
            .inspect_err(|err| log_failure("find", collection, err))?;
        Ok(documents.into_iter().map(sanitize_document).collect())
    }

    /// Returns the first sanitised document matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure after logging it.
    pub async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        let options = FindOptions::default().limit(1);
        Ok(self.find(collection, filter, &options).await?.into_iter().next())
    }

    /// Appends a document.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure after logging it.
    pub async fn insert(&self, collection: &str, document: Document) -> StoreResult<String> {
        self.inner
            .insert(collection, document)
            .await
            .inspect_err(|err| log_failure("insert", collection, err))
    }

    /// Upserts by filter; see [`DocumentStore::put`].
    ///
    /// # Errors
    ///
    /// Propagates the backend failure after logging it.
    pub async fn put(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> StoreResult<PutOutcome> {
        self.inner
            .put(collection, filter, document, upsert)
            .await
            .inspect_err(|err| log_failure("put", collection, err))
    }

    /// Deletes by filter.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure after logging it.
    pub async fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.inner
            .delete(collection, filter)
            .await
            .inspect_err(|err| log_failure("delete", collection, err))
    }

    /// Atomically drains matching documents; see [`DocumentStore::take`].
    ///
    /// # Errors
    ///
    /// Propagates the backend failure after logging it.
    pub async fn take(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let documents = self
            .inner
            .take(collection, filter)
            .await
            .inspect_err(|err| log_failure("take", collection, err))?;
        Ok(documents.into_iter().map(sanitize_document).collect())
    }
}

fn log_failure(operation: &'static str, collection: &str, err: &crate::StoreError) {
    warn!(operation, collection, error = %err, "store operation failed");
}
