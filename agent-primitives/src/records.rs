//! Scratch, mailbox, and blackboard records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Session-scoped scratch value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchEntry {
    /// Scratch key.
    pub key: String,
    /// Stored value.
    pub value: Value,
    /// Time of the last write.
    #[serde(alias = "timestamp")]
    pub updated_at: String,
}

/// Overview of the scratch tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortTermSummary {
    /// Number of scratch entries.
    pub total_items: usize,
    /// Keys currently held.
    pub keys: Vec<String>,
    /// Most recent write time, if any entry exists.
    pub last_updated: Option<String>,
}

/// Point-to-point message between agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    from_agent: String,
    to_agent: String,
    #[serde(alias = "message")]
    body: String,
    timestamp: String,
}

impl Message {
    /// Creates an unsent message stamped with `timestamp`.
    #[must_use]
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        body: impl Into<String>,
        timestamp: String,
    ) -> Self {
        Self {
            id: None,
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            body: body.into(),
            timestamp,
        }
    }

    /// Returns the store identifier of a delivered message.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the sending agent.
    #[must_use]
    pub fn from_agent(&self) -> &str {
        &self.from_agent
    }

    /// Returns the receiving agent.
    #[must_use]
    pub fn to_agent(&self) -> &str {
        &self.to_agent
    }

    /// Returns the message body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the send time.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Encodes the message as a document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] if serialisation fails.
    pub fn to_document(&self) -> Result<Map<String, Value>> {
        to_object(self, "message")
    }

    /// Decodes a message from a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] when fields are missing or mistyped.
    pub fn from_document(document: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

/// Blackboard entry visible to every agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedDatum {
    /// Blackboard key.
    pub key: String,
    /// Shared value.
    pub value: Value,
    /// Time of the last write.
    pub timestamp: String,
}

pub(crate) fn to_object<T: Serialize>(value: &T, what: &'static str) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(crate::Error::invalid_field(
            what,
            "did not serialise to an object",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_accepts_legacy_body_field() {
        let Value::Object(document) = json!({
            "_id": "m1",
            "from_agent": "planner",
            "to_agent": "searcher",
            "message": "look for earbuds",
            "timestamp": "2025-01-01T00:00:00Z",
        }) else {
            unreachable!()
        };

        let message = Message::from_document(document).unwrap();
        assert_eq!(message.id(), Some("m1"));
        assert_eq!(message.body(), "look for earbuds");
    }

    #[test]
    fn unsent_message_has_no_id_field() {
        let message = Message::new("a", "b", "x", "2025-01-01T00:00:00Z".into());
        let document = message.to_document().unwrap();
        assert!(!document.contains_key("_id"));
        assert_eq!(document["body"], "x");
    }
}
