use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::CatalogId;

/// The identity tuple of a registered entity instance.
/// `(source_system, source_entity_id, entity_type)` is unique in the catalog.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub entity_type: String,
    pub domain: String,
    pub source_system: String,
    pub source_entity_id: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    None,
    Bearer,
    Basic,
    ApiKey,
}

impl AuthKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer => "bearer",
            Self::Basic => "basic",
            Self::ApiKey => "api_key",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Self::None),
            "bearer" => Some(Self::Bearer),
            "basic" => Some(Self::Basic),
            "api_key" => Some(Self::ApiKey),
            _ => None,
        }
    }
}

/// How a consumer reaches the current state of the entity at its source.
/// `url_template` carries an `{id}` placeholder.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccessDescriptor {
    pub url_template: String,
    pub method: HttpMethod,
    pub auth: AuthKind,
}

impl AccessDescriptor {
    pub fn url_for(&self, id: &str) -> String {
        self.url_template.replace("{id}", id)
    }
}

/// Service-level expectations declared by the owning adapter.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Sla {
    pub availability_pct: f64,
    pub p99_latency_ms: u64,
    pub freshness_seconds: u64,
}

/// Data classification. PII entries must carry a non-empty class.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Classification {
    pub pii: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Deprecated,
    Archived,
}

impl EntryStatus {
    /// Status transitions are monotonic toward archival.
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        next >= self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "deprecated" => Some(Self::Deprecated),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the metadata catalog: where an entity lives, how to reach
/// it, what it promises, and how it is classified.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub id: CatalogId,
    #[serde(flatten)]
    pub identity: EntityRef,
    pub access: AccessDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    pub sla: Sla,
    pub classification: Classification,
    pub status: EntryStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_seen_at: i64,
}

/// Domain-shape representation produced by an adapter, independent of the
/// source-system payload shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CanonicalEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub version: u64,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub fetched_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(EntryStatus::Active.can_transition_to(EntryStatus::Active));
        assert!(EntryStatus::Active.can_transition_to(EntryStatus::Deprecated));
        assert!(EntryStatus::Active.can_transition_to(EntryStatus::Archived));
        assert!(EntryStatus::Deprecated.can_transition_to(EntryStatus::Archived));
        assert!(!EntryStatus::Archived.can_transition_to(EntryStatus::Active));
        assert!(!EntryStatus::Deprecated.can_transition_to(EntryStatus::Active));
    }

    #[test]
    fn url_template_substitutes_id() {
        let access = AccessDescriptor {
            url_template: "https://api.directus.example/items/customer/{id}".into(),
            method: HttpMethod::Get,
            auth: AuthKind::Bearer,
        };
        assert_eq!(
            access.url_for("c-1"),
            "https://api.directus.example/items/customer/c-1"
        );
    }
}
