use crate::query::Selection;
use crate::schema::{ComposedSchema, FieldKind};

/// Multiplier applied to the nested cost of every collection level.
const COLLECTION_MULTIPLIER: u32 = 10;

/// Static cost model: one point per field, with nested work under a
/// collection multiplied, since each collection level fans the nested
/// selection out across its elements.
pub fn query_cost(selection: &Selection, schema: &ComposedSchema) -> u32 {
    let root_is_collection = selection.field == "entities";
    let type_name = match selection.field.as_str() {
        "entity" | "entities" => selection
            .arguments
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name => name.to_string(),
    };
    let nested = children_cost(selection, &type_name, schema);
    if root_is_collection {
        1 + nested * COLLECTION_MULTIPLIER
    } else {
        1 + nested
    }
}

fn children_cost(selection: &Selection, type_name: &str, schema: &ComposedSchema) -> u32 {
    let Some(composed) = schema.type_named(type_name) else {
        return selection.children.len() as u32;
    };
    let mut cost = 0u32;
    for child in &selection.children {
        match composed.fields.get(&child.field).map(|f| &f.kind) {
            Some(FieldKind::Reference { target, many, .. }) => {
                let nested = 1 + children_cost(child, target, schema);
                cost = cost.saturating_add(if *many {
                    nested.saturating_mul(COLLECTION_MULTIPLIER)
                } else {
                    nested
                });
            }
            _ => cost = cost.saturating_add(1),
        }
    }
    cost
}
