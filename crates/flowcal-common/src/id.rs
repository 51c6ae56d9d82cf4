//! Entity and run identity types.
//!
//! Calibration indexes everything by an entity key. Entities (links, transit
//! stops) are supplied by the surrounding simulation; this crate only gives
//! them a stable, ordered, hashable representation.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Bound satisfied by every type usable as a calibration key.
///
/// Keys must be totally ordered (deterministic iteration and output),
/// hashable (accumulator lookup), and round-trip through a string
/// (persistence).
pub trait EntityKey:
    Clone + Ord + Hash + fmt::Debug + fmt::Display + FromStr + Send + Sync + 'static
{
}

impl<T> EntityKey for T where
    T: Clone + Ord + Hash + fmt::Debug + fmt::Display + FromStr + Send + Sync + 'static
{
}

/// Identifier of a calibratable location (network link or transit stop).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EntityId(s.to_string()))
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

/// Run ID for tracking one calibration run.
///
/// Format: `cal-<date>-<time>-<random>`
/// Example: `cal-20260115-143022-abc123`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new run ID.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        let random: String = uuid::Uuid::new_v4()
            .to_string()
            .chars()
            .take(6)
            .collect();
        RunId(format!("cal-{}-{}", now.format("%Y%m%d-%H%M%S"), random))
    }

    /// Parse an existing run ID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("cal-") && s.len() > 19 {
            Some(RunId(s.to_string()))
        } else {
            None
        }
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let rid = RunId::new();
        assert!(rid.0.starts_with("cal-"));
        assert!(RunId::parse(&rid.0).is_some());
    }

    #[test]
    fn test_run_id_rejects_foreign_prefix() {
        assert!(RunId::parse("sess-20260115-143022-abc123").is_none());
    }

    #[test]
    fn test_entity_id_ordering_and_parse() {
        let a: EntityId = "stop1".parse().unwrap();
        let b = EntityId::new("stop10");
        assert!(a < b);
        assert_eq!(a.to_string(), "stop1");
    }

    #[test]
    fn test_entity_id_serializes_transparent() {
        let json = serde_json::to_string(&EntityId::from("link7")).unwrap();
        assert_eq!(json, "\"link7\"");
    }

    fn assert_key<K: EntityKey>() {}

    #[test]
    fn test_key_bound_covers_common_types() {
        assert_key::<EntityId>();
        assert_key::<String>();
        assert_key::<u64>();
    }
}
