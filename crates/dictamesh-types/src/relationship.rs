use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::CatalogId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::OneToMany => "one_to_many",
            Self::ManyToMany => "many_to_many",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "one_to_one" => Some(Self::OneToOne),
            "one_to_many" => Some(Self::OneToMany),
            "many_to_many" => Some(Self::ManyToMany),
            _ => None,
        }
    }
}

/// The typed half of an edge: what kind of relationship it is and how many
/// objects one subject may hold.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    pub relationship_type: String,
    pub cardinality: Cardinality,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipDirection {
    Outgoing,
    Incoming,
    All,
}

/// A directed, typed edge between two catalog entries with temporal
/// validity. `valid_to = None` marks the current edge; a closed edge keeps
/// its interval forever, it is never deleted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub subject_id: CatalogId,
    pub predicate: Predicate,
    pub object_id: CatalogId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub valid_from: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<i64>,
}

impl Relationship {
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// A closed interval must be non-empty: `valid_to` strictly after
    /// `valid_from`.
    pub fn interval_is_valid(&self) -> bool {
        match self.valid_to {
            None => true,
            Some(valid_to) => valid_to > self.valid_from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(valid_from: i64, valid_to: Option<i64>) -> Relationship {
        Relationship {
            id: 1,
            subject_id: CatalogId::new("ce-order-1"),
            predicate: Predicate {
                relationship_type: "ships_to".into(),
                cardinality: Cardinality::OneToOne,
            },
            object_id: CatalogId::new("ce-address-a"),
            subject_name: None,
            object_name: None,
            metadata: BTreeMap::new(),
            valid_from,
            valid_to,
        }
    }

    #[test]
    fn open_edge_is_current() {
        assert!(edge(100, None).is_current());
        assert!(!edge(100, Some(101)).is_current());
    }

    #[test]
    fn one_millisecond_interval_is_closed_and_valid() {
        let e = edge(100, Some(101));
        assert!(e.interval_is_valid());
        assert!(!e.is_current());
    }

    #[test]
    fn empty_interval_is_invalid() {
        assert!(!edge(100, Some(100)).interval_is_valid());
        assert!(!edge(100, Some(99)).interval_is_valid());
    }
}
