use serde::{Deserialize, Serialize};

use crate::ids::CatalogId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    Copy,
    Aggregate,
    Join,
    Enrich,
    Filter,
}

impl TransformationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Aggregate => "aggregate",
            Self::Join => "join",
            Self::Enrich => "enrich",
            Self::Filter => "filter",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "copy" => Some(Self::Copy),
            "aggregate" => Some(Self::Aggregate),
            "join" => Some(Self::Join),
            "enrich" => Some(Self::Enrich),
            "filter" => Some(Self::Filter),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineageDirection {
    Up,
    Down,
    Both,
}

/// A data-flow edge between two catalog entries. At most one active edge
/// exists per (upstream, downstream, kind); deactivated edges are kept as
/// history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LineageEdge {
    pub id: i64,
    pub upstream_id: CatalogId,
    pub downstream_id: CatalogId,
    pub transformation: TransformationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
    pub last_flow_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<u64>,
}

/// What an adapter declares about the flows feeding its entities, before
/// any flow is observed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct LineageDescriptor {
    pub upstream_systems: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
