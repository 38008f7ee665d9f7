//! Document model shared by every backend.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Equality filter over top-level fields. An empty filter matches every document.
pub type Filter = Map<String, Value>;

/// Field every backend uses for its document identifier.
pub const ID_FIELD: &str = "_id";

/// Builds a filter from `(field, value)` pairs.
#[must_use]
pub fn filter<I, K, V>(pairs: I) -> Filter
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Returns `true` when every filter field equals the document's field.
#[must_use]
pub fn matches(document: &Document, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

/// Sort direction and field for [`FindOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    /// Field to sort by.
    pub field: String,
    /// `true` for newest/largest first.
    pub descending: bool,
}

/// Optional ordering and cap applied to `find`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    sort: Option<SortOrder>,
    limit: Option<usize>,
}

impl FindOptions {
    /// Sorts results by `field`, largest first.
    #[must_use]
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(SortOrder {
            field: field.into(),
            descending: true,
        });
        self
    }

    /// Sorts results by `field`, smallest first.
    #[must_use]
    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(SortOrder {
            field: field.into(),
            descending: false,
        });
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the requested ordering.
    #[must_use]
    pub fn sort(&self) -> Option<&SortOrder> {
        self.sort.as_ref()
    }

    /// Returns the requested cap.
    #[must_use]
    pub const fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Applies ordering and cap to an in-memory result set.
    pub(crate) fn apply(&self, documents: &mut Vec<Document>) {
        if let Some(order) = &self.sort {
            documents.sort_by(|lhs, rhs| {
                let ordering = compare_fields(lhs.get(&order.field), rhs.get(&order.field));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        if let Some(limit) = self.limit {
            documents.truncate(limit);
        }
    }
}

/// Result of a `put`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    /// Number of existing documents the filter matched.
    pub matched: u64,
    /// Identifier of the inserted document when the put created one.
    pub upserted_id: Option<String>,
}

impl PutOutcome {
    /// Returns `true` when the put changed or created a document.
    #[must_use]
    pub fn is_written(&self) -> bool {
        self.matched > 0 || self.upserted_id.is_some()
    }
}

/// Orders field values the way document databases do for mixed data: absent
/// first, then numbers, then strings, then everything else by its JSON text.
fn compare_fields(lhs: Option<&Value>, rhs: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }

    match (lhs, rhs) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(a), Some(b)) if rank(lhs) == rank(rhs) && rank(lhs) == 3 => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(lhs).cmp(&rank(rhs)),
    }
}

/// Converts backend-specific extended-JSON values into plain JSON.
///
/// Object ids (`{"$oid": ..}`) become their hex string, dates (`{"$date": ..}`)
/// become RFC 3339 strings and wrapped numbers become plain numbers. Applied to
/// every document a backend returns, recursively.
#[must_use]
pub fn sanitize_document(document: Document) -> Document {
    document
        .into_iter()
        .map(|(key, value)| (key, sanitize_value(value)))
        .collect()
}

/// Sanitizes a single value; see [`sanitize_document`].
#[must_use]
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some((key, inner)) = map.iter().next() {
                    if let Some(plain) = unwrap_extended(key, inner) {
                        return plain;
                    }
                }
            }
            Value::Object(sanitize_document(map))
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        other => other,
    }
}

/// Renders an identifier value (plain or extended JSON) as a string.
#[must_use]
pub fn plain_id(value: &Value) -> Option<String> {
    match sanitize_value(value.clone()) {
        Value::String(id) => Some(id),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn unwrap_extended(key: &str, inner: &Value) -> Option<Value> {
    match (key, inner) {
        ("$oid" | "$uuid" | "$symbol", Value::String(text)) => Some(Value::String(text.clone())),
        ("$date", Value::String(text)) => Some(Value::String(text.clone())),
        ("$date", Value::Number(millis)) => millis.as_i64().and_then(millis_to_rfc3339),
        ("$date", Value::Object(wrapped)) => wrapped
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|text| text.parse::<i64>().ok())
            .and_then(millis_to_rfc3339),
        ("$numberLong" | "$numberInt", Value::String(text)) => {
            text.parse::<i64>().ok().map(Value::from)
        }
        ("$numberDouble" | "$numberDecimal", Value::String(text)) => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn millis_to_rfc3339(millis: i64) -> Option<Value> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|date| Value::String(date.to_rfc3339_opts(SecondsFormat::Micros, true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test documents are objects"),
        }
    }

    #[test]
    fn sanitize_flattens_object_ids_and_dates() {
        let raw = doc(json!({
            "_id": {"$oid": "65f0c0ffee00000000000001"},
            "timestamp": {"$date": {"$numberLong": "0"}},
            "nested": [{"ref": {"$oid": "abc"}}],
            "budget": {"$numberInt": "2500"},
            "plain": {"a": 1, "b": 2},
        }));

        let clean = sanitize_document(raw);
        assert_eq!(clean["_id"], "65f0c0ffee00000000000001");
        assert_eq!(clean["timestamp"], "1970-01-01T00:00:00.000000Z");
        assert_eq!(clean["nested"][0]["ref"], "abc");
        assert_eq!(clean["budget"], 2500);
        assert_eq!(clean["plain"], json!({"a": 1, "b": 2}));
    }

    #[test]
    fn single_key_user_objects_survive() {
        let clean = sanitize_value(json!({"color": "red"}));
        assert_eq!(clean, json!({"color": "red"}));
        assert_eq!(plain_id(&json!({"$oid": "x1"})).as_deref(), Some("x1"));
        assert_eq!(plain_id(&json!(7)).as_deref(), Some("7"));
    }

    #[test]
    fn options_sort_and_cap() {
        let mut documents = vec![
            doc(json!({"t": "2025-01-02"})),
            doc(json!({})),
            doc(json!({"t": "2025-01-03"})),
            doc(json!({"t": "2025-01-01"})),
        ];
        FindOptions::default()
            .sort_desc("t")
            .limit(2)
            .apply(&mut documents);
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["t"], "2025-01-03");
        assert_eq!(documents[1]["t"], "2025-01-02");
    }

    #[test]
    fn filter_matching() {
        let document = doc(json!({"to_agent": "b", "body": "x"}));
        assert!(matches(&document, &Filter::new()));
        assert!(matches(&document, &filter([("to_agent", "b")])));
        assert!(!matches(&document, &filter([("to_agent", "a")])));
    }
}
