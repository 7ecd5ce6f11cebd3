use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::GatewayError;
use crate::schema::{ComposedSchema, FieldKind};

/// One node of the selection tree: a field, its arguments, and the
/// nested selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub field: String,
    pub arguments: BTreeMap<String, Value>,
    pub children: Vec<Selection>,
}

/// A structured query: operation name, variables, and a single root
/// selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub operation_name: Option<String>,
    pub selection: Selection,
}

impl Query {
    /// Parse the wire shape:
    /// `{operation_name?, variables?, query: {field, arguments?, select?}}`
    /// where `select` entries are either nested objects or bare field
    /// names. `$name` argument values substitute from `variables`.
    pub fn parse(body: &Value) -> Result<Self, GatewayError> {
        let object = body
            .as_object()
            .ok_or_else(|| GatewayError::Validation("request body must be an object".into()))?;
        let operation_name = object
            .get("operation_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let variables: BTreeMap<String, Value> = object
            .get("variables")
            .and_then(Value::as_object)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let root = object
            .get("query")
            .ok_or_else(|| GatewayError::Validation("missing query".into()))?;
        let selection = parse_selection(root, &variables)?;
        Ok(Self {
            operation_name,
            selection,
        })
    }

    /// Validate the selection tree against the composed schema. Unknown
    /// fields fail the whole request; partial tolerance starts only at
    /// execution.
    pub fn validate(&self, schema: &ComposedSchema) -> Result<(), GatewayError> {
        let root_type = match self.selection.field.as_str() {
            "entity" | "entities" => {
                let entity_type = self
                    .selection
                    .arguments
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::Validation(format!(
                            "{} requires a type argument",
                            self.selection.field
                        ))
                    })?;
                entity_type.to_string()
            }
            name => name.to_string(),
        };
        let composed = schema
            .type_named(&root_type)
            .ok_or_else(|| GatewayError::UnknownType(root_type.clone()))?;
        validate_children(&self.selection, &root_type, composed.key_field.as_str(), schema)
    }
}

fn parse_selection(
    node: &Value,
    variables: &BTreeMap<String, Value>,
) -> Result<Selection, GatewayError> {
    if let Some(name) = node.as_str() {
        return Ok(Selection {
            field: name.to_string(),
            arguments: BTreeMap::new(),
            children: Vec::new(),
        });
    }
    let object = node
        .as_object()
        .ok_or_else(|| GatewayError::Validation("selection must be an object or string".into()))?;
    let field = object
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Validation("selection needs a field name".into()))?
        .to_string();

    let mut arguments = BTreeMap::new();
    if let Some(args) = object.get("arguments") {
        let args = args
            .as_object()
            .ok_or_else(|| GatewayError::Validation("arguments must be an object".into()))?;
        for (name, value) in args {
            arguments.insert(name.clone(), substitute(value, variables)?);
        }
    }

    let mut children = Vec::new();
    if let Some(select) = object.get("select") {
        let select = select
            .as_array()
            .ok_or_else(|| GatewayError::Validation("select must be an array".into()))?;
        for child in select {
            children.push(parse_selection(child, variables)?);
        }
    }

    Ok(Selection {
        field,
        arguments,
        children,
    })
}

fn substitute(value: &Value, variables: &BTreeMap<String, Value>) -> Result<Value, GatewayError> {
    match value.as_str() {
        Some(raw) if raw.starts_with('$') => {
            let name = &raw[1..];
            variables.get(name).cloned().ok_or_else(|| {
                GatewayError::Validation(format!("undefined variable ${name}"))
            })
        }
        _ => Ok(value.clone()),
    }
}

fn validate_children(
    selection: &Selection,
    type_name: &str,
    key_field: &str,
    schema: &ComposedSchema,
) -> Result<(), GatewayError> {
    let composed = schema
        .type_named(type_name)
        .ok_or_else(|| GatewayError::UnknownType(type_name.to_string()))?;
    for child in &selection.children {
        if child.field == key_field {
            if !child.children.is_empty() {
                return Err(GatewayError::Validation(format!(
                    "key field {}.{} cannot have a sub-selection",
                    type_name, child.field
                )));
            }
            continue;
        }
        let Some(field) = composed.fields.get(&child.field) else {
            return Err(GatewayError::Validation(format!(
                "unknown field {}.{}",
                type_name, child.field
            )));
        };
        match &field.kind {
            FieldKind::Scalar => {
                if !child.children.is_empty() {
                    return Err(GatewayError::Validation(format!(
                        "scalar field {}.{} cannot have a sub-selection",
                        type_name, child.field
                    )));
                }
            }
            FieldKind::Reference { target, .. } => {
                let target_key = schema
                    .type_named(target)
                    .map(|t| t.key_field.clone())
                    .ok_or_else(|| GatewayError::UnknownType(target.clone()))?;
                validate_children(child, target, &target_key, schema)?;
            }
        }
    }
    Ok(())
}
