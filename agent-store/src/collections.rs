//! Collection engine shared by the in-process and file-backed stores.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::document::{Document, Filter, FindOptions, ID_FIELD, PutOutcome, matches};

/// Named collections of documents kept in insertion order.
#[derive(Debug, Default)]
pub(crate) struct Collections {
    inner: HashMap<String, Vec<Document>>,
}

impl Collections {
    pub(crate) fn find(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Vec<Document> {
        let mut found: Vec<Document> = self
            .inner
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| matches(document, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        options.apply(&mut found);
        found
    }

    /// Appends `document`, assigning an identifier when it has none.
    pub(crate) fn insert(&mut self, collection: &str, mut document: Document) -> String {
        let id = match document.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id.to_owned(),
            None => {
                let id = Uuid::new_v4().to_string();
                document.insert(ID_FIELD.to_owned(), Value::from(id.clone()));
                id
            }
        };
        self.inner
            .entry(collection.to_owned())
            .or_default()
            .push(document);
        id
    }

    /// Overwrites the fields of the first matching document; inserts
    /// `filter ∪ document` when nothing matches and `upsert` is set.
    pub(crate) fn put(
        &mut self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> PutOutcome {
        let documents = self.inner.entry(collection.to_owned()).or_default();
        if let Some(existing) = documents.iter_mut().find(|candidate| matches(candidate, filter)) {
            for (field, value) in document {
                if field != ID_FIELD {
                    existing.insert(field, value);
                }
            }
            return PutOutcome {
                matched: 1,
                upserted_id: None,
            };
        }

        if !upsert {
            return PutOutcome::default();
        }

        let mut created = filter.clone();
        created.extend(document);
        let id = self.insert(collection, created);
        PutOutcome {
            matched: 0,
            upserted_id: Some(id),
        }
    }

    pub(crate) fn delete(&mut self, collection: &str, filter: &Filter) -> u64 {
        self.take(collection, filter).len() as u64
    }

    /// Removes and returns every matching document.
    pub(crate) fn take(&mut self, collection: &str, filter: &Filter) -> Vec<Document> {
        let Some(documents) = self.inner.get_mut(collection) else {
            return Vec::new();
        };
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(documents)
            .into_iter()
            .partition(|document| matches(document, filter));
        *documents = kept;
        taken
    }

    pub(crate) fn documents(&self, collection: &str) -> &[Document] {
        self.inner.get(collection).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn load(&mut self, collection: &str, documents: Vec<Document>) {
        self.inner.insert(collection.to_owned(), documents);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::filter;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn put_merges_fields_and_keeps_id() {
        let mut collections = Collections::default();
        let key = filter([("key", "k")]);
        let first = collections.put("c", &key, doc(json!({"value": 1, "extra": true})), true);
        let id = first.upserted_id.expect("created");

        let second = collections.put("c", &key, doc(json!({"value": 2, "_id": "forged"})), true);
        assert_eq!(second.matched, 1);

        let found = collections.find("c", &key, &FindOptions::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["value"], 2);
        assert_eq!(found[0]["extra"], true);
        assert_eq!(found[0]["_id"], Value::from(id));
    }

    #[test]
    fn put_without_upsert_is_a_no_op() {
        let mut collections = Collections::default();
        let outcome = collections.put("c", &filter([("key", "k")]), Document::new(), false);
        assert!(!outcome.is_written());
        assert!(collections.documents("c").is_empty());
    }

    #[test]
    fn take_removes_only_matches() {
        let mut collections = Collections::default();
        collections.insert("m", doc(json!({"to": "a"})));
        collections.insert("m", doc(json!({"to": "b"})));
        collections.insert("m", doc(json!({"to": "a"})));

        assert_eq!(collections.take("m", &filter([("to", "a")])).len(), 2);
        assert!(collections.take("m", &filter([("to", "a")])).is_empty());
        assert_eq!(collections.documents("m").len(), 1);
        assert_eq!(collections.delete("m", &Filter::new()), 1);
    }
}
