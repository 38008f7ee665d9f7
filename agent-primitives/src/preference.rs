//! Long-term preference records.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;
use crate::records::to_object;

/// Key of a preference record: an item name, optionally scoped to a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreferenceKey {
    user_id: Option<String>,
    item_name: String,
}

impl PreferenceKey {
    /// Creates a key for single-user deployments.
    #[must_use]
    pub fn item(item_name: impl Into<String>) -> Self {
        Self {
            user_id: None,
            item_name: item_name.into(),
        }
    }

    /// Creates a key scoped to a specific user.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            item_name: item_name.into(),
        }
    }

    /// Returns the item name.
    #[must_use]
    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    /// Returns the owning user, if the key is user scoped.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the equality filter selecting this record in a document store.
    #[must_use]
    pub fn to_filter(&self) -> Map<String, Value> {
        let mut filter = Map::new();
        filter.insert("item_name".to_owned(), Value::from(self.item_name.clone()));
        if let Some(user_id) = &self.user_id {
            filter.insert("user_id".to_owned(), Value::from(user_id.clone()));
        }
        filter
    }
}

impl Display for PreferenceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.user_id {
            Some(user_id) => write!(f, "{user_id}/{}", self.item_name),
            None => f.write_str(&self.item_name),
        }
    }
}

impl From<&str> for PreferenceKey {
    fn from(value: &str) -> Self {
        Self::item(value)
    }
}

impl From<String> for PreferenceKey {
    fn from(value: String) -> Self {
        Self::item(value)
    }
}

/// Attribute set remembered for an item across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    item_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default)]
    timestamp: String,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl PreferenceRecord {
    /// Creates a record for `key` holding `attributes`.
    ///
    /// Reserved keys (`item_name`, `user_id`, `timestamp`, `_id`) are dropped from
    /// the attribute map; they are carried by the record itself.
    #[must_use]
    pub fn new(key: &PreferenceKey, mut attributes: Map<String, Value>, timestamp: String) -> Self {
        for reserved in ["item_name", "user_id", "timestamp", "_id"] {
            attributes.remove(reserved);
        }
        Self {
            item_name: key.item_name.clone(),
            user_id: key.user_id.clone(),
            timestamp,
            attributes,
        }
    }

    /// Returns the key identifying the record.
    #[must_use]
    pub fn key(&self) -> PreferenceKey {
        PreferenceKey {
            user_id: self.user_id.clone(),
            item_name: self.item_name.clone(),
        }
    }

    /// Returns the item name.
    #[must_use]
    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    /// Returns the owning user, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the time of the last write.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Returns the attribute map.
    #[must_use]
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Returns a single attribute.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// Consumes the record, returning its attributes.
    #[must_use]
    pub fn into_attributes(self) -> Map<String, Value> {
        self.attributes
    }

    /// Encodes the record as a flat document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] if serialisation fails.
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        to_object(self, "preferences")
    }

    /// Decodes a record from a stored document, discarding the store identifier.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] when `item_name` is missing or mistyped.
    pub fn from_document(mut document: Map<String, Value>) -> Result<Self> {
        document.remove("_id");
        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_is_flat() {
        let mut attributes = Map::new();
        attributes.insert("color".into(), json!("red"));
        attributes.insert("timestamp".into(), json!("ignored"));
        let record = PreferenceRecord::new(
            &PreferenceKey::for_user("u1", "watch"),
            attributes,
            "2025-01-01T00:00:00Z".into(),
        );

        let document = record.to_document().unwrap();
        assert_eq!(document["item_name"], "watch");
        assert_eq!(document["user_id"], "u1");
        assert_eq!(document["color"], "red");
        assert_eq!(document["timestamp"], "2025-01-01T00:00:00Z");
    }

    #[test]
    fn decoding_drops_store_id() {
        let document = json!({
            "_id": "65f0c0ffee",
            "item_name": "earbuds",
            "budget": 2500,
            "timestamp": "2025-01-01T00:00:00Z",
        });
        let Value::Object(map) = document else {
            unreachable!()
        };
        let record = PreferenceRecord::from_document(map).unwrap();
        assert_eq!(record.key(), PreferenceKey::item("earbuds"));
        assert_eq!(record.get("budget"), Some(&json!(2500)));
        assert!(record.get("_id").is_none());
    }

    #[test]
    fn filter_includes_user_only_when_scoped() {
        assert_eq!(PreferenceKey::item("x").to_filter().len(), 1);
        assert_eq!(PreferenceKey::for_user("u", "x").to_filter().len(), 2);
        assert_eq!(PreferenceKey::for_user("u", "x").to_string(), "u/x");
    }
}
