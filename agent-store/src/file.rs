//! Local JSON-file document store used as the offline fallback.
//!
//! Each collection lives in its own file under the data directory:
//! `<collection>.json` holds one JSON object mapping document ids to documents,
//! while append-only log collections use `<collection>.jsonl` with one document
//! per line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::DocumentStore;
use crate::collections::Collections;
use crate::document::{Document, Filter, FindOptions, ID_FIELD, PutOutcome};
use crate::{StoreError, StoreResult};

/// Collections persisted as newline-delimited logs unless configured otherwise.
pub const DEFAULT_LOG_COLLECTIONS: &[&str] = &["episodic_log"];

/// File-backed store mirroring every write to disk.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    log_collections: HashSet<String>,
    state: Mutex<Collections>,
}

impl FileStore {
    /// Opens (or creates) a store rooted at `dir`, loading any existing files.
    ///
    /// # Errors
    ///
    /// Propagates I/O and decoding errors encountered while reading the directory.
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_logs(dir, DEFAULT_LOG_COLLECTIONS.iter().copied()).await
    }

    /// Opens a store treating `log_collections` as append-only JSON-lines files.
    ///
    /// # Errors
    ///
    /// Propagates I/O and decoding errors encountered while reading the directory.
    pub async fn open_with_logs<I, S>(dir: impl Into<PathBuf>, log_collections: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut collections = Collections::default();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let (Some(stem), Some(extension)) = (
                path.file_stem().and_then(|stem| stem.to_str()),
                path.extension().and_then(|ext| ext.to_str()),
            ) else {
                continue;
            };
            let documents = match extension {
                "json" => decode_object_file(&fs::read(&path).await?)?,
                "jsonl" => decode_log_file(&fs::read(&path).await?)?,
                _ => continue,
            };
            debug!(collection = stem, documents = documents.len(), "loaded collection file");
            collections.load(stem, documents);
        }

        Ok(Self {
            dir,
            log_collections: log_collections.into_iter().map(Into::into).collect(),
            state: Mutex::new(collections),
        })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_log(&self, collection: &str) -> bool {
        self.log_collections.contains(collection)
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        let extension = if self.is_log(collection) { "jsonl" } else { "json" };
        self.dir.join(format!("{collection}.{extension}"))
    }

    async fn append_line(&self, collection: &str, document: &Document) -> StoreResult<()> {
        let mut line = serde_json::to_vec(document)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(collection))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rewrite(&self, state: &Collections, collection: &str) -> StoreResult<()> {
        let documents = state.documents(collection);
        let bytes = if self.is_log(collection) {
            let mut bytes = Vec::new();
            for document in documents {
                serde_json::to_writer(&mut bytes, document)?;
                bytes.push(b'\n');
            }
            bytes
        } else {
            let mut object = Map::new();
            for document in documents {
                let mut body = document.clone();
                let id = body
                    .remove(ID_FIELD)
                    .and_then(|id| id.as_str().map(str::to_owned))
                    .ok_or_else(|| StoreError::malformed("document without identifier"))?;
                object.insert(id, Value::Object(body));
            }
            serde_json::to_vec_pretty(&object)?
        };

        let target = self.path_for(collection);
        let staging = target.with_extension("tmp");
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, &target).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn ping(&self) -> StoreResult<()> {
        fs::metadata(&self.dir).await?;
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let guard = self.state.lock().await;
        Ok(guard.find(collection, filter, options))
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<String> {
        validate_collection(collection)?;
        let mut guard = self.state.lock().await;
        let before = guard.documents(collection).to_vec();
        let id = guard.insert(collection, document);
        let written = if self.is_log(collection) {
            match guard.documents(collection).last() {
                Some(stored) => self.append_line(collection, stored).await,
                None => Ok(()),
            }
        } else {
            self.rewrite(&guard, collection).await
        };
        restore_on_error(&mut guard, collection, before, written).map(|()| id)
    }

    async fn put(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> StoreResult<PutOutcome> {
        validate_collection(collection)?;
        let mut guard = self.state.lock().await;
        let before = guard.documents(collection).to_vec();
        let outcome = guard.put(collection, filter, document, upsert);
        if !outcome.is_written() {
            return Ok(outcome);
        }
        let written = self.rewrite(&guard, collection).await;
        restore_on_error(&mut guard, collection, before, written).map(|()| outcome)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        validate_collection(collection)?;
        let mut guard = self.state.lock().await;
        let before = guard.documents(collection).to_vec();
        let removed = guard.delete(collection, filter);
        if removed == 0 {
            return Ok(0);
        }
        let written = self.rewrite(&guard, collection).await;
        restore_on_error(&mut guard, collection, before, written).map(|()| removed)
    }

    async fn take(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        validate_collection(collection)?;
        let mut guard = self.state.lock().await;
        let before = guard.documents(collection).to_vec();
        let taken = guard.take(collection, filter);
        if taken.is_empty() {
            return Ok(taken);
        }
        let written = self.rewrite(&guard, collection).await;
        restore_on_error(&mut guard, collection, before, written).map(|()| taken)
    }
}

/// Puts `collection` back to `before` when persisting the change failed, so
/// memory never holds a write the disk rejected.
fn restore_on_error(
    state: &mut Collections,
    collection: &str,
    before: Vec<Document>,
    written: StoreResult<()>,
) -> StoreResult<()> {
    if let Err(err) = written {
        warn!(collection, error = %err, "file write failed, change rolled back");
        state.load(collection, before);
        return Err(err);
    }
    Ok(())
}

fn validate_collection(collection: &str) -> StoreResult<()> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::invalid_config(format!(
            "collection name `{collection}` is not a safe file name"
        )))
    }
}

fn decode_object_file(data: &[u8]) -> StoreResult<Vec<Document>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let object: Map<String, Value> = serde_json::from_slice(data)?;
    object
        .into_iter()
        .map(|(id, body)| match body {
            Value::Object(mut document) => {
                document.insert(ID_FIELD.to_owned(), Value::String(id));
                Ok(document)
            }
            _ => Err(StoreError::malformed(format!("entry `{id}` is not an object"))),
        })
        .collect()
}

fn decode_log_file(data: &[u8]) -> StoreResult<Vec<Document>> {
    data.split(|byte| *byte == b'\n')
        .filter(|chunk| !chunk.iter().all(u8::is_ascii_whitespace))
        .map(|chunk| serde_json::from_slice::<Document>(chunk).map_err(StoreError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::filter;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("file-store-{}", Uuid::new_v4()));
        path
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = temp_dir();
        {
            let store = FileStore::open(&dir).await.unwrap();
            store
                .put(
                    "preferences",
                    &filter([("item_name", "watch")]),
                    doc(json!({"color": "red"})),
                    true,
                )
                .await
                .unwrap();
            for query in ["one", "two"] {
                store
                    .insert("episodic_log", doc(json!({"query": query})))
                    .await
                    .unwrap();
            }
        }

        assert!(dir.join("preferences.json").exists());
        assert!(dir.join("episodic_log.jsonl").exists());

        let reopened = FileStore::open(&dir).await.unwrap();
        let preferences = reopened
            .find("preferences", &Filter::new(), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(preferences.len(), 1);
        assert_eq!(preferences[0]["color"], "red");
        assert_eq!(preferences[0]["item_name"], "watch");

        let log = reopened
            .find("episodic_log", &Filter::new(), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0]["query"], "one");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn clearing_a_log_truncates_the_file() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).await.unwrap();
        store
            .insert("episodic_log", doc(json!({"query": "x"})))
            .await
            .unwrap();
        assert_eq!(store.delete("episodic_log", &Filter::new()).await.unwrap(), 1);

        let reopened = FileStore::open(&dir).await.unwrap();
        assert!(
            reopened
                .find("episodic_log", &Filter::new(), &FindOptions::default())
                .await
                .unwrap()
                .is_empty()
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn rejects_path_like_collection_names() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).await.unwrap();
        let err = store
            .insert("../escape", Document::new())
            .await
            .expect_err("unsafe name");
        assert!(matches!(err, StoreError::InvalidConfig { .. }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn failed_drain_keeps_messages_deliverable() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).await.unwrap();
        store
            .insert("messages", doc(json!({"to_agent": "b", "body": "x"})))
            .await
            .unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
        let inbox = filter([("to_agent", "b")]);
        assert!(matches!(
            store.take("messages", &inbox).await,
            Err(StoreError::Io { .. })
        ));

        std::fs::create_dir_all(&dir).unwrap();
        let drained = store.take("messages", &inbox).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0]["body"], "x");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn failed_write_is_not_visible() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(
            store
                .insert("episodic_log", doc(json!({"query": "lost"})))
                .await
                .is_err()
        );
        assert!(
            store
                .put("shared_data", &filter([("key", "k")]), doc(json!({"value": 1})), true)
                .await
                .is_err()
        );
        for collection in ["episodic_log", "shared_data"] {
            assert!(
                store
                    .find(collection, &Filter::new(), &FindOptions::default())
                    .await
                    .unwrap()
                    .is_empty()
            );
        }

        std::fs::create_dir_all(&dir).unwrap();
        store
            .insert("episodic_log", doc(json!({"query": "retry"})))
            .await
            .unwrap();
        let log = store
            .find("episodic_log", &Filter::new(), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(log.len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}
