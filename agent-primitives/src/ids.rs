//! Semantic index point identifiers.

use std::fmt;

use uuid::Uuid;

/// Identifier of the vector point mirroring one appended episode.
///
/// Rendered in hyphenated UUID form, which is what vector services accept as
/// a point id.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PointId(Uuid);

impl PointId {
    /// Generates a fresh point id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct_uuids() {
        let first = PointId::random();
        let second = PointId::random();
        assert_ne!(first, second);

        let rendered = first.to_string();
        assert_eq!(rendered.len(), 36);
        assert_eq!(Uuid::parse_str(&rendered).ok().map(PointId), Some(first));
    }
}
