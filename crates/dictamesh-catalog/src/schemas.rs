use dictamesh_types::{SchemaDef, SchemaFormat, time::now_millis};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use crate::Catalog;
use crate::error::CatalogError;

/// Per-format compatibility comparator. `check` returns the first
/// violation found when `candidate` does not read data written under
/// `latest`.
pub trait CompatChecker: Send + Sync {
    fn check(&self, latest: &SchemaDef, candidate: &SchemaDef) -> Result<(), String>;
}

/// Field-level superset-or-equal over JSON Schema documents: no removed
/// properties, no dropped required fields, no narrowed types.
pub struct JsonSchemaCompat;

/// Fallback comparator: anything other than a byte-identical definition
/// is treated as incompatible until a real comparator is plugged in.
pub struct StructuralCompat;

impl CompatChecker for JsonSchemaCompat {
    fn check(&self, latest: &SchemaDef, candidate: &SchemaDef) -> Result<(), String> {
        let old: Value = serde_json::from_str(&latest.definition)
            .map_err(|e| format!("latest definition is not valid JSON: {e}"))?;
        let new: Value = serde_json::from_str(&candidate.definition)
            .map_err(|e| format!("candidate definition is not valid JSON: {e}"))?;

        let old_properties = properties_of(&old);
        let new_properties = properties_of(&new);
        for (field, old_spec) in &old_properties {
            let Some(new_spec) = new_properties.get(field) else {
                return Err(format!("field {field} was removed"));
            };
            let old_type = type_of(old_spec);
            let new_type = type_of(new_spec);
            if !type_widens(old_type, new_type) {
                return Err(format!(
                    "field {field} narrowed from {old_type} to {new_type}"
                ));
            }
        }

        for required in required_of(&old) {
            if !required_of(&new).contains(&required) {
                return Err(format!("required field {required} is no longer required"));
            }
        }
        Ok(())
    }
}

impl CompatChecker for StructuralCompat {
    fn check(&self, latest: &SchemaDef, candidate: &SchemaDef) -> Result<(), String> {
        if latest.definition == candidate.definition {
            Ok(())
        } else {
            Err(format!(
                "no comparator for {}; definitions must match exactly",
                candidate.format.as_str()
            ))
        }
    }
}

fn checker_for(format: SchemaFormat) -> &'static dyn CompatChecker {
    match format {
        SchemaFormat::JsonSchema => &JsonSchemaCompat,
        SchemaFormat::Avro | SchemaFormat::Protobuf | SchemaFormat::Graphql => &StructuralCompat,
    }
}

fn properties_of(schema: &Value) -> serde_json::Map<String, Value> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn required_of(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn type_of(spec: &Value) -> &str {
    spec.get("type").and_then(Value::as_str).unwrap_or("any")
}

fn type_widens(old: &str, new: &str) -> bool {
    old == new || new == "any" || (old == "integer" && new == "number")
}

impl Catalog {
    /// Versioned insert. Versions are monotonic per entity type; when the
    /// latest version is marked backward-compatible and the candidate
    /// claims the same, the candidate must pass the format's comparator.
    /// Declaring `backward_compatible = false` is the explicit opt-out.
    pub fn register_schema(&self, candidate: &SchemaDef) -> Result<SchemaDef, CatalogError> {
        if candidate.entity_type.is_empty() {
            return Err(CatalogError::InvalidInput("entity_type is required".into()));
        }
        self.db.with_tx(|conn| {
            let latest = conn
                .query_row(
                    &format!(
                        "{SCHEMA_SELECT} WHERE entity_type = ?1 ORDER BY version DESC LIMIT 1"
                    ),
                    params![candidate.entity_type],
                    schema_from_row,
                )
                .optional()?;

            if let Some(latest) = &latest {
                if candidate.version <= latest.version {
                    return Err(CatalogError::Conflict(format!(
                        "schema {} v{} is not newer than v{}",
                        candidate.entity_type, candidate.version, latest.version
                    )));
                }
                if latest.backward_compatible && candidate.backward_compatible {
                    checker_for(candidate.format)
                        .check(latest, candidate)
                        .map_err(|detail| CatalogError::IncompatibleSchema {
                            entity_type: candidate.entity_type.clone(),
                            version: candidate.version,
                            detail,
                        })?;
                }
            }

            let now = now_millis();
            conn.execute(
                "INSERT INTO dictamesh_schemas (
                    entity_type, version, format, definition,
                    backward_compatible, forward_compatible, registered_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    candidate.entity_type,
                    candidate.version,
                    candidate.format.as_str(),
                    candidate.definition,
                    candidate.backward_compatible,
                    candidate.forward_compatible,
                    now,
                ],
            )?;

            // Superseded version deprecates; retirement is a separate,
            // later step once no live consumer remains.
            if let Some(latest) = &latest {
                if latest.deprecated_at.is_none() {
                    conn.execute(
                        "UPDATE dictamesh_schemas SET deprecated_at = ?1
                         WHERE entity_type = ?2 AND version = ?3",
                        params![now, latest.entity_type, latest.version],
                    )?;
                }
            }

            conn.query_row(
                &format!("{SCHEMA_SELECT} WHERE entity_type = ?1 AND version = ?2"),
                params![candidate.entity_type, candidate.version],
                schema_from_row,
            )
            .map_err(CatalogError::from)
        })
    }

    pub fn get_schema(&self, entity_type: &str, version: u32) -> Result<SchemaDef, CatalogError> {
        self.db.with(|conn| {
            conn.query_row(
                &format!("{SCHEMA_SELECT} WHERE entity_type = ?1 AND version = ?2"),
                params![entity_type, version],
                schema_from_row,
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound {
                what: "schema",
                key: format!("{entity_type}/v{version}"),
            })
        })
    }

    pub fn latest_schema(&self, entity_type: &str) -> Result<SchemaDef, CatalogError> {
        self.db.with(|conn| {
            conn.query_row(
                &format!("{SCHEMA_SELECT} WHERE entity_type = ?1 ORDER BY version DESC LIMIT 1"),
                params![entity_type],
                schema_from_row,
            )
            .optional()?
            .ok_or_else(|| CatalogError::NotFound {
                what: "schema",
                key: entity_type.to_string(),
            })
        })
    }

    /// The full version timeline, oldest first.
    pub fn list_schemas(&self, entity_type: &str) -> Result<Vec<SchemaDef>, CatalogError> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SCHEMA_SELECT} WHERE entity_type = ?1 ORDER BY version"
            ))?;
            let rows = stmt.query_map(params![entity_type], schema_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Retirement requires a prior deprecation.
    pub fn retire_schema(&self, entity_type: &str, version: u32) -> Result<(), CatalogError> {
        self.db.with_tx(|conn| {
            let schema = conn
                .query_row(
                    &format!("{SCHEMA_SELECT} WHERE entity_type = ?1 AND version = ?2"),
                    params![entity_type, version],
                    schema_from_row,
                )
                .optional()?
                .ok_or_else(|| CatalogError::NotFound {
                    what: "schema",
                    key: format!("{entity_type}/v{version}"),
                })?;
            if schema.deprecated_at.is_none() {
                return Err(CatalogError::Conflict(format!(
                    "schema {entity_type} v{version} must be deprecated before retirement"
                )));
            }
            conn.execute(
                "UPDATE dictamesh_schemas SET retired_at = ?1
                 WHERE entity_type = ?2 AND version = ?3",
                params![now_millis(), entity_type, version],
            )?;
            Ok(())
        })
    }
}

const SCHEMA_SELECT: &str = "SELECT
    entity_type, version, format, definition,
    backward_compatible, forward_compatible,
    registered_at, deprecated_at, retired_at
 FROM dictamesh_schemas";

fn schema_from_row(row: &Row<'_>) -> rusqlite::Result<SchemaDef> {
    let format_raw: String = row.get(2)?;
    let format = SchemaFormat::parse(&format_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown schema format {format_raw}"),
            )),
        )
    })?;
    Ok(SchemaDef {
        entity_type: row.get(0)?,
        version: row.get(1)?,
        format,
        definition: row.get(3)?,
        backward_compatible: row.get(4)?,
        forward_compatible: row.get(5)?,
        registered_at: row.get(6)?,
        deprecated_at: row.get(7)?,
        retired_at: row.get(8)?,
    })
}
