//! Preference reconciliation and free-text preference parsing.

use agent_primitives::{PreferenceKey, PreferenceRecord};
use serde_json::{Map, Value};
use tracing::debug;

const COLORS: &[&str] = &[
    "black", "white", "red", "blue", "green", "pink", "grey", "gray", "silver", "gold", "brown",
    "yellow", "purple", "orange",
];

/// Reconciles newly supplied preference attributes with the stored record.
///
/// Without an existing record the incoming attributes are kept as they are.
/// Otherwise scalar attributes take the incoming value, attributes that are
/// lists on both sides become their union without duplicates, and attributes
/// only present in the stored record survive. The result always carries `key`
/// and `timestamp`.
#[must_use]
pub fn merge(
    existing: Option<&PreferenceRecord>,
    key: &PreferenceKey,
    incoming: Map<String, Value>,
    timestamp: String,
) -> PreferenceRecord {
    let Some(existing) = existing else {
        return PreferenceRecord::new(key, incoming, timestamp);
    };

    let mut merged = existing.attributes().clone();
    for (attribute, value) in incoming {
        let combined = match (merged.remove(&attribute), value) {
            (Some(Value::Array(previous)), Value::Array(next)) => Value::Array(union(previous, next)),
            (_, value) => value,
        };
        merged.insert(attribute, combined);
    }
    PreferenceRecord::new(key, merged, timestamp)
}

fn union(previous: Vec<Value>, next: Vec<Value>) -> Vec<Value> {
    let mut combined: Vec<Value> = Vec::with_capacity(previous.len() + next.len());
    for value in previous.into_iter().chain(next) {
        if !combined.contains(&value) {
            combined.push(value);
        }
    }
    combined
}

/// Turns a comma separated detail string such as `"red, under 3000, noise
/// cancelling"` into preference attributes.
///
/// The largest number in a part becomes `budget`, a known colour becomes
/// `color`, and recognised or free-form phrases are collected in `features`.
/// The untouched input is kept as `raw_input`.
#[must_use]
pub fn parse_preferences(details: &str) -> Map<String, Value> {
    let mut preferences = Map::new();
    let mut features: Vec<Value> = Vec::new();

    for part in details.split(',').map(str::trim) {
        let lower = part.to_lowercase();
        let has_digit = lower.chars().any(|ch| ch.is_ascii_digit());

        if let Some(budget) = largest_number(&lower) {
            debug!(budget, part, "parsed budget");
            preferences.insert("budget".to_owned(), Value::from(budget));
        }

        let color = COLORS.iter().find(|color| lower.contains(*color));
        if let Some(color) = color {
            debug!(color, part, "parsed color");
            preferences.insert("color".to_owned(), Value::from(*color));
        }

        let feature = if lower.contains("noise") && lower.contains("cancel") {
            Some("noise_cancellation".to_owned())
        } else if lower.contains("wireless") || lower.contains("bluetooth") {
            Some("wireless".to_owned())
        } else if lower.contains("waterproof") || lower.contains("water resistant") {
            Some("waterproof".to_owned())
        } else if lower.chars().count() > 2 && !has_digit && color.is_none() {
            Some(part.to_owned())
        } else {
            None
        };
        if let Some(feature) = feature {
            debug!(feature = %feature, part, "parsed feature");
            features.push(Value::from(feature));
        }
    }

    if !features.is_empty() {
        preferences.insert("features".to_owned(), Value::Array(features));
    }
    preferences.insert("raw_input".to_owned(), Value::from(details));
    preferences
}

fn largest_number(text: &str) -> Option<u64> {
    text.split(|ch: char| !ch.is_ascii_digit())
        .filter_map(|run| run.parse::<u64>().ok())
        .max()
}
