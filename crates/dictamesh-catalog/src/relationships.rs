use dictamesh_types::{
    Cardinality, CatalogId, Predicate, Relationship, RelationshipDirection, time::now_millis,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::error::CatalogError;
use crate::{Catalog, MAX_TRAVERSAL_DEPTH};

#[derive(Clone, Debug)]
pub struct RelationshipUpsert {
    pub subject_id: CatalogId,
    pub predicate: Predicate,
    pub object_id: CatalogId,
    pub subject_name: Option<String>,
    pub object_name: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct UpsertedRelationship {
    pub current: Relationship,
    /// The edge this upsert superseded, already closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<Relationship>,
}

#[derive(Serialize, Clone, Debug)]
pub struct TraversalNode {
    pub id: CatalogId,
    pub depth: u32,
    /// The edge that first reached this node; `None` on the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<Relationship>,
}

#[derive(Serialize, Clone, Debug)]
pub struct Traversal {
    pub root: CatalogId,
    pub nodes: Vec<TraversalNode>,
    /// True when the depth ceiling cut off unexplored current edges.
    pub truncated: bool,
}

impl Catalog {
    /// Temporal upsert in one transaction: the superseded current edge is
    /// closed with `valid_to = now`, the new edge opens at `valid_from =
    /// now`. For a one-to-one predicate the subject's single current edge
    /// closes whatever its object; otherwise only an existing edge to the
    /// same object closes.
    pub fn upsert_relationship(
        &self,
        upsert: &RelationshipUpsert,
    ) -> Result<UpsertedRelationship, CatalogError> {
        if upsert.subject_id == upsert.object_id {
            return Err(CatalogError::InvalidInput(
                "relationship subject and object must differ".into(),
            ));
        }
        self.db.with_tx(|conn| upsert_relationship_in(conn, upsert))
    }

    /// Current edges touching one entry.
    pub fn relationships_for(
        &self,
        id: &CatalogId,
        direction: RelationshipDirection,
    ) -> Result<Vec<Relationship>, CatalogError> {
        self.db.with(|conn| {
            let mut edges = match direction {
                RelationshipDirection::Outgoing => current_edges_from(conn, id, None)?,
                RelationshipDirection::Incoming => current_edges_to(conn, id)?,
                RelationshipDirection::All => {
                    let mut edges = current_edges_from(conn, id, None)?;
                    edges.extend(current_edges_to(conn, id)?);
                    edges
                }
            };
            edges.sort_by(|a, b| {
                a.predicate
                    .relationship_type
                    .cmp(&b.predicate.relationship_type)
                    .then_with(|| a.id.cmp(&b.id))
            });
            Ok(edges)
        })
    }

    /// Depth-bounded subgraph expansion over current edges. Cycle safety
    /// tracks edge ids per path: a node may be reached again through a
    /// different path, but no edge repeats on one path. Results come back
    /// ordered by (depth, relationship_type) for determinism.
    pub fn traverse_relationships(
        &self,
        root: &CatalogId,
        max_depth: u32,
        relationship_type: Option<&str>,
    ) -> Result<Traversal, CatalogError> {
        let max_depth = max_depth.min(MAX_TRAVERSAL_DEPTH);
        self.db.with(|conn| {
            // The root must exist; traversal of an unknown id is a miss,
            // not an empty graph.
            crate::entities::get_entity_in(conn, root)?;

            let mut nodes = vec![TraversalNode {
                id: root.clone(),
                depth: 0,
                via: None,
            }];
            let mut truncated = false;
            let mut seen: HashSet<CatalogId> = HashSet::from([root.clone()]);

            struct PathFrame {
                node: CatalogId,
                depth: u32,
                edges_on_path: HashSet<i64>,
            }

            let mut frontier = VecDeque::from([PathFrame {
                node: root.clone(),
                depth: 0,
                edges_on_path: HashSet::new(),
            }]);

            while let Some(frame) = frontier.pop_front() {
                let mut edges = current_edges_from(conn, &frame.node, relationship_type)?;
                edges.sort_by(|a, b| {
                    a.predicate
                        .relationship_type
                        .cmp(&b.predicate.relationship_type)
                        .then_with(|| a.id.cmp(&b.id))
                });
                for edge in edges {
                    if frame.edges_on_path.contains(&edge.id) {
                        continue;
                    }
                    if frame.depth == max_depth {
                        truncated = true;
                        break;
                    }
                    let next_depth = frame.depth + 1;
                    if seen.insert(edge.object_id.clone()) {
                        nodes.push(TraversalNode {
                            id: edge.object_id.clone(),
                            depth: next_depth,
                            via: Some(edge.clone()),
                        });
                    }
                    let mut edges_on_path = frame.edges_on_path.clone();
                    edges_on_path.insert(edge.id);
                    frontier.push_back(PathFrame {
                        node: edge.object_id.clone(),
                        depth: next_depth,
                        edges_on_path,
                    });
                }
            }

            nodes.sort_by(|a, b| {
                a.depth.cmp(&b.depth).then_with(|| {
                    let ta = a.via.as_ref().map(|e| e.predicate.relationship_type.as_str());
                    let tb = b.via.as_ref().map(|e| e.predicate.relationship_type.as_str());
                    ta.cmp(&tb)
                })
            });
            Ok(Traversal {
                root: root.clone(),
                nodes,
                truncated,
            })
        })
    }
}

pub(crate) fn upsert_relationship_in(
    conn: &Connection,
    upsert: &RelationshipUpsert,
) -> Result<UpsertedRelationship, CatalogError> {
    let now = now_millis();

    let superseded = match upsert.predicate.cardinality {
        Cardinality::OneToOne => conn
            .query_row(
                &format!(
                    "{EDGE_SELECT} WHERE subject_id = ?1 AND relationship_type = ?2 \
                     AND valid_to IS NULL"
                ),
                params![upsert.subject_id, upsert.predicate.relationship_type],
                edge_from_row,
            )
            .optional()?,
        Cardinality::OneToMany | Cardinality::ManyToMany => conn
            .query_row(
                &format!(
                    "{EDGE_SELECT} WHERE subject_id = ?1 AND relationship_type = ?2 \
                     AND object_id = ?3 AND valid_to IS NULL"
                ),
                params![
                    upsert.subject_id,
                    upsert.predicate.relationship_type,
                    upsert.object_id
                ],
                edge_from_row,
            )
            .optional()?,
    };

    // Intervals for one (subject, predicate, object) never overlap:
    // the new edge opens at or after the superseded one closes.
    let valid_from = match &superseded {
        Some(edge) if now <= edge.valid_from => edge.valid_from + 1,
        _ => now,
    };

    let closed = match superseded {
        Some(edge) => {
            conn.execute(
                "UPDATE dictamesh_relationships SET valid_to = ?1 WHERE id = ?2",
                params![valid_from, edge.id],
            )?;
            Some(Relationship {
                valid_to: Some(valid_from),
                ..edge
            })
        }
        None => None,
    };

    let metadata_json = serde_json::to_string(&upsert.metadata)?;
    conn.execute(
        "INSERT INTO dictamesh_relationships (
            subject_id, relationship_type, cardinality, object_id,
            subject_name, object_name, metadata_json, valid_from, valid_to
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
        params![
            upsert.subject_id,
            upsert.predicate.relationship_type,
            upsert.predicate.cardinality.as_str(),
            upsert.object_id,
            upsert.subject_name,
            upsert.object_name,
            metadata_json,
            valid_from,
        ],
    )?;
    let id = conn.last_insert_rowid();

    let current = conn.query_row(
        &format!("{EDGE_SELECT} WHERE id = ?1"),
        params![id],
        edge_from_row,
    )?;
    Ok(UpsertedRelationship { current, closed })
}

const EDGE_SELECT: &str = "SELECT
    id, subject_id, relationship_type, cardinality, object_id,
    subject_name, object_name, metadata_json, valid_from, valid_to
 FROM dictamesh_relationships";

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let cardinality_raw: String = row.get(3)?;
    let cardinality = Cardinality::parse(&cardinality_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown cardinality {cardinality_raw}"),
            )),
        )
    })?;
    let metadata_json: String = row.get(7)?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;

    Ok(Relationship {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        predicate: Predicate {
            relationship_type: row.get(2)?,
            cardinality,
        },
        object_id: row.get(4)?,
        subject_name: row.get(5)?,
        object_name: row.get(6)?,
        metadata,
        valid_from: row.get(8)?,
        valid_to: row.get(9)?,
    })
}

fn current_edges_from(
    conn: &Connection,
    subject: &CatalogId,
    relationship_type: Option<&str>,
) -> Result<Vec<Relationship>, CatalogError> {
    let mut out = Vec::new();
    match relationship_type {
        Some(relationship_type) => {
            let mut stmt = conn.prepare(&format!(
                "{EDGE_SELECT} WHERE subject_id = ?1 AND relationship_type = ?2 \
                 AND valid_to IS NULL"
            ))?;
            let rows = stmt.query_map(params![subject, relationship_type], edge_from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        None => {
            let mut stmt = conn
                .prepare(&format!("{EDGE_SELECT} WHERE subject_id = ?1 AND valid_to IS NULL"))?;
            let rows = stmt.query_map(params![subject], edge_from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
    }
    Ok(out)
}

fn current_edges_to(
    conn: &Connection,
    object: &CatalogId,
) -> Result<Vec<Relationship>, CatalogError> {
    let mut stmt =
        conn.prepare(&format!("{EDGE_SELECT} WHERE object_id = ?1 AND valid_to IS NULL"))?;
    let rows = stmt.query_map(params![object], edge_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
