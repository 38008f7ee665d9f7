//! Episodic log records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::records::to_object;
use crate::time::{normalize_timestamp, now_timestamp};
use crate::{Error, Result};

/// One recorded interaction: the query, its details, and the items it produced.
///
/// Episodes are immutable once appended to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    user_id: String,
    query: String,
    #[serde(default)]
    item_details: String,
    final_items: Vec<Value>,
    timestamp: String,
    #[serde(default)]
    description: String,
}

impl Episode {
    /// Returns the log identifier, present once the episode was read back from a store.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the owning user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the query that started the episode.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns the free-form item details supplied with the query.
    #[must_use]
    pub fn item_details(&self) -> &str {
        &self.item_details
    }

    /// Returns the resulting items.
    #[must_use]
    pub fn final_items(&self) -> &[Value] {
        &self.final_items
    }

    /// Returns the ISO-8601 timestamp.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Attaches the identifier assigned by the log store.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns the episode fields as a JSON object without the log identifier.
    ///
    /// This is the document written to the log and the payload mirrored into the
    /// semantic index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if serialisation fails.
    pub fn to_payload(&self) -> Result<Map<String, Value>> {
        let mut payload = to_object(self, "episode")?;
        payload.remove("_id");
        Ok(payload)
    }

    /// Decodes an episode from a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] when required fields are absent or mistyped.
    pub fn from_document(document: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

/// Unvalidated episode input as supplied by an agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEpisode {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    item_details: Option<String>,
    #[serde(default)]
    final_items: Option<Value>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl NewEpisode {
    /// Starts an empty episode draft.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a draft from a loosely typed JSON object. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] when a known field has the wrong type.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Sets the owning user.
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the query.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Sets the item details.
    #[must_use]
    pub fn item_details(mut self, details: impl Into<String>) -> Self {
        self.item_details = Some(details.into());
        self
    }

    /// Sets the resulting items.
    #[must_use]
    pub fn final_items<I, V>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.final_items = Some(Value::Array(items.into_iter().map(Into::into).collect()));
        self
    }

    /// Sets an explicit timestamp instead of the append time.
    #[must_use]
    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checks required fields and produces an [`Episode`], stamping the current
    /// time when no timestamp was supplied. A supplied timestamp is converted to
    /// UTC with microsecond precision.
    ///
    /// A single item that is not a list is wrapped into a one-element list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingFields`] naming every absent or blank required
    /// field, or [`Error::InvalidField`] for a timestamp that is not ISO-8601.
    pub fn validate(self) -> Result<Episode> {
        let mut missing = Vec::new();
        let user_id = non_blank(self.user_id);
        if user_id.is_none() {
            missing.push("user_id");
        }
        let query = non_blank(self.query);
        if query.is_none() {
            missing.push("query");
        }
        let final_items = match self.final_items {
            None | Some(Value::Null) => {
                missing.push("final_items");
                None
            }
            Some(Value::Array(items)) => Some(items),
            Some(other) => Some(vec![other]),
        };

        let (Some(user_id), Some(query), Some(final_items)) = (user_id, query, final_items) else {
            return Err(Error::MissingFields { fields: missing });
        };
        let timestamp = match non_blank(self.timestamp) {
            Some(raw) => normalize_timestamp(&raw).ok_or_else(|| {
                Error::invalid_field("timestamp", format!("`{raw}` is not an ISO-8601 time"))
            })?,
            None => now_timestamp(),
        };

        Ok(Episode {
            id: None,
            user_id,
            query,
            item_details: self.item_details.unwrap_or_default(),
            final_items,
            timestamp,
            description: self.description.unwrap_or_default(),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|inner| !inner.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validation_lists_every_missing_field() {
        let draft = NewEpisode::from_value(json!({ "query": "x" })).unwrap();
        let err = draft.validate().expect_err("missing fields");
        match err {
            Error::MissingFields { fields } => assert_eq!(fields, ["user_id", "final_items"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_user_is_missing() {
        let err = NewEpisode::new()
            .user_id("  ")
            .query("earbuds")
            .final_items(["a"])
            .validate()
            .expect_err("blank user");
        assert!(matches!(err, Error::MissingFields { fields } if fields == ["user_id"]));
    }

    #[test]
    fn stamps_timestamp_and_wraps_single_item() {
        let episode = NewEpisode::from_value(json!({
            "user_id": "u1",
            "query": "earbuds",
            "final_items": "Noise Air Buds Pro 2",
        }))
        .unwrap()
        .validate()
        .unwrap();

        assert!(!episode.timestamp().is_empty());
        assert_eq!(episode.final_items(), [json!("Noise Air Buds Pro 2")]);
        assert_eq!(episode.item_details(), "");
    }

    #[test]
    fn payload_omits_log_id() {
        let episode = NewEpisode::new()
            .user_id("u1")
            .query("watch")
            .final_items([json!({"title": "W1"})])
            .timestamp("2025-01-01T00:00:00Z")
            .validate()
            .unwrap()
            .with_id("abc");

        let payload = episode.to_payload().unwrap();
        assert!(!payload.contains_key("_id"));
        assert_eq!(payload["timestamp"], "2025-01-01T00:00:00.000000Z");

        let decoded = Episode::from_document(payload).unwrap();
        assert_eq!(decoded.id(), None);
        assert_eq!(decoded.final_items()[0]["title"], "W1");
    }

    #[test]
    fn supplied_timestamp_is_normalized_or_rejected() {
        let draft = || NewEpisode::new().user_id("u1").query("watch").final_items(["w"]);

        let episode = draft().timestamp("2025-01-01T12:00:00+01:00").validate().unwrap();
        assert_eq!(episode.timestamp(), "2025-01-01T11:00:00.000000Z");

        let err = draft().timestamp("yesterday").validate().expect_err("not a time");
        assert!(matches!(err, Error::InvalidField { field: "timestamp", .. }));
    }
}
