//! Pure in-process document store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::StoreResult;
use crate::backend::DocumentStore;
use crate::collections::Collections;
use crate::document::{Document, Filter, FindOptions, PutOutcome};

/// Volatile store holding every collection in process memory.
///
/// Contents vanish with the process; used when no other backend is reachable
/// and for session-scoped scratch state.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Collections>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let guard = self.inner.read().await;
        Ok(guard.find(collection, filter, options))
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<String> {
        let mut guard = self.inner.write().await;
        Ok(guard.insert(collection, document))
    }

    async fn put(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> StoreResult<PutOutcome> {
        let mut guard = self.inner.write().await;
        Ok(guard.put(collection, filter, document, upsert))
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let mut guard = self.inner.write().await;
        Ok(guard.delete(collection, filter))
    }

    async fn take(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let mut guard = self.inner.write().await;
        Ok(guard.take(collection, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::filter;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn insert_find_delete() {
        let store = InMemoryStore::new();
        let Value::Object(document) = json!({"user_id": "u1", "query": "watch"}) else {
            unreachable!()
        };
        let id = store.insert("episodic_log", document).await.unwrap();
        assert!(!id.is_empty());

        let found = store
            .find("episodic_log", &filter([("user_id", "u1")]), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], Value::from(id));

        assert_eq!(store.delete("episodic_log", &Filter::new()).await.unwrap(), 1);
        assert!(
            store
                .find("episodic_log", &Filter::new(), &FindOptions::default())
                .await
                .unwrap()
                .is_empty()
        );
    }
}
