use dictamesh_types::{CatalogId, LineageDirection, LineageEdge, TransformationKind, time::now_millis};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::error::CatalogError;
use crate::{Catalog, MAX_TRAVERSAL_DEPTH};

#[derive(Serialize, Clone, Debug)]
pub struct LineageNode {
    pub id: CatalogId,
    pub depth: u32,
    /// The flow edge that reached this node; `None` on the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<LineageEdge>,
}

#[derive(Serialize, Clone, Debug)]
pub struct LineageGraph {
    pub root: CatalogId,
    pub direction: LineageDirection,
    pub nodes: Vec<LineageNode>,
    pub truncated: bool,
}

impl Catalog {
    /// Record an observed flow. The first observation creates the edge;
    /// re-observation refreshes `last_flow_at` and the latency average.
    pub fn upsert_lineage_edge(
        &self,
        upstream: &CatalogId,
        downstream: &CatalogId,
        transformation: TransformationKind,
        description: Option<&str>,
        latency_ms: Option<u64>,
    ) -> Result<LineageEdge, CatalogError> {
        if upstream == downstream {
            return Err(CatalogError::InvalidInput(
                "lineage upstream and downstream must differ".into(),
            ));
        }
        self.db.with_tx(|conn| {
            upsert_lineage_edge_in(conn, upstream, downstream, transformation, description, latency_ms)
        })
    }

    /// Flow ceased: the edge deactivates but stays as history.
    pub fn deactivate_lineage_edge(
        &self,
        upstream: &CatalogId,
        downstream: &CatalogId,
        transformation: TransformationKind,
    ) -> Result<(), CatalogError> {
        self.db.with_tx(|conn| {
            let changed = conn.execute(
                "UPDATE dictamesh_lineage SET active = 0
                 WHERE upstream_id = ?1 AND downstream_id = ?2 AND transformation = ?3
                   AND active = 1",
                params![upstream, downstream, transformation.as_str()],
            )?;
            if changed == 0 {
                return Err(CatalogError::NotFound {
                    what: "lineage edge",
                    key: format!(
                        "{}->{} ({})",
                        upstream.as_str(),
                        downstream.as_str(),
                        transformation.as_str()
                    ),
                });
            }
            Ok(())
        })
    }

    /// Bounded recursive flow traversal. Inactive edges only appear when
    /// explicitly requested.
    pub fn get_lineage(
        &self,
        root: &CatalogId,
        depth: u32,
        direction: LineageDirection,
        include_inactive: bool,
    ) -> Result<LineageGraph, CatalogError> {
        let max_depth = depth.min(MAX_TRAVERSAL_DEPTH);
        self.db.with(|conn| {
            crate::entities::get_entity_in(conn, root)?;

            let mut nodes = vec![LineageNode {
                id: root.clone(),
                depth: 0,
                via: None,
            }];
            let mut truncated = false;
            let mut seen: HashSet<CatalogId> = HashSet::from([root.clone()]);
            let mut frontier = VecDeque::from([(root.clone(), 0u32)]);

            while let Some((node, node_depth)) = frontier.pop_front() {
                let edges = match direction {
                    LineageDirection::Up => lineage_edges_into(conn, &node, include_inactive)?,
                    LineageDirection::Down => lineage_edges_from(conn, &node, include_inactive)?,
                    LineageDirection::Both => {
                        let mut edges = lineage_edges_into(conn, &node, include_inactive)?;
                        edges.extend(lineage_edges_from(conn, &node, include_inactive)?);
                        edges
                    }
                };
                for edge in edges {
                    let next = if edge.downstream_id == node {
                        edge.upstream_id.clone()
                    } else {
                        edge.downstream_id.clone()
                    };
                    if !seen.contains(&next) && node_depth == max_depth {
                        truncated = true;
                        continue;
                    }
                    if seen.insert(next.clone()) {
                        nodes.push(LineageNode {
                            id: next.clone(),
                            depth: node_depth + 1,
                            via: Some(edge),
                        });
                        frontier.push_back((next, node_depth + 1));
                    }
                }
            }

            nodes.sort_by(|a, b| {
                a.depth
                    .cmp(&b.depth)
                    .then_with(|| a.id.as_str().cmp(b.id.as_str()))
            });
            Ok(LineageGraph {
                root: root.clone(),
                direction,
                nodes,
                truncated,
            })
        })
    }
}

pub(crate) fn upsert_lineage_edge_in(
    conn: &Connection,
    upstream: &CatalogId,
    downstream: &CatalogId,
    transformation: TransformationKind,
    description: Option<&str>,
    latency_ms: Option<u64>,
) -> Result<LineageEdge, CatalogError> {
    let now = now_millis();
    let existing: Option<(i64, Option<i64>)> = conn
        .query_row(
            "SELECT id, avg_latency_ms FROM dictamesh_lineage
             WHERE upstream_id = ?1 AND downstream_id = ?2 AND transformation = ?3
               AND active = 1",
            params![upstream, downstream, transformation.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let id = match existing {
        Some((id, previous_latency)) => {
            let blended = match (previous_latency, latency_ms) {
                (Some(previous), Some(observed)) => Some((previous + observed as i64) / 2),
                (None, Some(observed)) => Some(observed as i64),
                (previous, None) => previous,
            };
            conn.execute(
                "UPDATE dictamesh_lineage SET last_flow_at = ?1, avg_latency_ms = ?2,
                    description = COALESCE(?3, description)
                 WHERE id = ?4",
                params![now, blended, description, id],
            )?;
            id
        }
        None => {
            conn.execute(
                "INSERT INTO dictamesh_lineage (
                    upstream_id, downstream_id, transformation, description,
                    active, last_flow_at, avg_latency_ms
                 ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
                params![
                    upstream,
                    downstream,
                    transformation.as_str(),
                    description,
                    now,
                    latency_ms.map(|v| v as i64),
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    conn.query_row(
        &format!("{LINEAGE_SELECT} WHERE id = ?1"),
        params![id],
        lineage_from_row,
    )
    .map_err(CatalogError::from)
}

const LINEAGE_SELECT: &str = "SELECT
    id, upstream_id, downstream_id, transformation, description,
    active, last_flow_at, avg_latency_ms
 FROM dictamesh_lineage";

fn lineage_from_row(row: &Row<'_>) -> rusqlite::Result<LineageEdge> {
    let transformation_raw: String = row.get(3)?;
    let transformation = TransformationKind::parse(&transformation_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown transformation {transformation_raw}"),
            )),
        )
    })?;
    Ok(LineageEdge {
        id: row.get(0)?,
        upstream_id: row.get(1)?,
        downstream_id: row.get(2)?,
        transformation,
        description: row.get(4)?,
        active: row.get(5)?,
        last_flow_at: row.get(6)?,
        avg_latency_ms: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
    })
}

fn lineage_edges_from(
    conn: &Connection,
    upstream: &CatalogId,
    include_inactive: bool,
) -> Result<Vec<LineageEdge>, CatalogError> {
    let sql = if include_inactive {
        format!("{LINEAGE_SELECT} WHERE upstream_id = ?1")
    } else {
        format!("{LINEAGE_SELECT} WHERE upstream_id = ?1 AND active = 1")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![upstream], lineage_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn lineage_edges_into(
    conn: &Connection,
    downstream: &CatalogId,
    include_inactive: bool,
) -> Result<Vec<LineageEdge>, CatalogError> {
    let sql = if include_inactive {
        format!("{LINEAGE_SELECT} WHERE downstream_id = ?1")
    } else {
        format!("{LINEAGE_SELECT} WHERE downstream_id = ?1 AND active = 1")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![downstream], lineage_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
