use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::GatewayError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldKind {
    Scalar,
    /// A cross-type reference resolved through the catalog's current
    /// relationship edges of `relationship_type`.
    Reference {
        target: String,
        many: bool,
        relationship_type: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
        }
    }

    pub fn reference(
        name: impl Into<String>,
        target: impl Into<String>,
        many: bool,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reference {
                target: target.into(),
                many,
                relationship_type: relationship_type.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub key_field: String,
    pub fields: Vec<FieldDef>,
}

/// One domain's contribution to the composed schema.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SchemaFragment {
    pub domain: String,
    pub types: Vec<TypeDef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedField {
    pub kind: FieldKind,
    pub owner_domain: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedType {
    pub name: String,
    pub key_field: String,
    /// Domain that first declared the type; by-id resolution routes to
    /// the adapter owning the entity type, not to this.
    pub owner_domain: String,
    pub fields: BTreeMap<String, ComposedField>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposedSchema {
    pub types: BTreeMap<String, ComposedType>,
}

impl ComposedSchema {
    /// Merge fragments: type definitions join on shared names, fields
    /// must not collide across domains, key fields must agree.
    pub fn compose(fragments: &[SchemaFragment]) -> Result<Self, GatewayError> {
        let mut types: BTreeMap<String, ComposedType> = BTreeMap::new();
        for fragment in fragments {
            for type_def in &fragment.types {
                let composed =
                    types
                        .entry(type_def.name.clone())
                        .or_insert_with(|| ComposedType {
                            name: type_def.name.clone(),
                            key_field: type_def.key_field.clone(),
                            owner_domain: fragment.domain.clone(),
                            fields: BTreeMap::new(),
                        });
                if composed.key_field != type_def.key_field {
                    return Err(GatewayError::Composition(format!(
                        "type {} keyed by {} in {}, by {} elsewhere",
                        type_def.name, type_def.key_field, fragment.domain, composed.key_field
                    )));
                }
                for field in &type_def.fields {
                    if field.name == composed.key_field {
                        // Every fragment may restate the shared key.
                        composed.fields.insert(
                            field.name.clone(),
                            ComposedField {
                                kind: FieldKind::Scalar,
                                owner_domain: composed.owner_domain.clone(),
                            },
                        );
                        continue;
                    }
                    if let Some(existing) = composed.fields.get(&field.name) {
                        if existing.owner_domain != fragment.domain {
                            return Err(GatewayError::Composition(format!(
                                "field {}.{} declared by both {} and {}",
                                type_def.name, field.name, existing.owner_domain, fragment.domain
                            )));
                        }
                    }
                    composed.fields.insert(
                        field.name.clone(),
                        ComposedField {
                            kind: field.kind.clone(),
                            owner_domain: fragment.domain.clone(),
                        },
                    );
                }
            }
        }

        // References must point at composed types.
        for composed in types.values() {
            for (field_name, field) in &composed.fields {
                if let FieldKind::Reference { target, .. } = &field.kind {
                    if !types.contains_key(target) {
                        return Err(GatewayError::Composition(format!(
                            "{}.{field_name} references unknown type {target}",
                            composed.name
                        )));
                    }
                }
            }
        }
        Ok(Self { types })
    }

    pub fn type_named(&self, name: &str) -> Option<&ComposedType> {
        self.types.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers_fragment() -> SchemaFragment {
        SchemaFragment {
            domain: "customers".into(),
            types: vec![TypeDef {
                name: "customer".into(),
                key_field: "id".into(),
                fields: vec![FieldDef::scalar("id"), FieldDef::scalar("name")],
            }],
        }
    }

    fn billing_fragment() -> SchemaFragment {
        SchemaFragment {
            domain: "billing".into(),
            types: vec![
                TypeDef {
                    name: "invoice".into(),
                    key_field: "id".into(),
                    fields: vec![
                        FieldDef::scalar("id"),
                        FieldDef::scalar("total"),
                        FieldDef::reference("customer", "customer", false, "billed_to"),
                    ],
                },
                // Extends customer with a billing-owned field.
                TypeDef {
                    name: "customer".into(),
                    key_field: "id".into(),
                    fields: vec![
                        FieldDef::scalar("id"),
                        FieldDef::reference("invoices", "invoice", true, "billed_to"),
                    ],
                },
            ],
        }
    }

    #[test]
    fn fragments_merge_on_shared_keys() {
        let composed =
            ComposedSchema::compose(&[customers_fragment(), billing_fragment()]).expect("compose");
        let customer = composed.type_named("customer").expect("customer type");
        assert_eq!(customer.fields.len(), 3, "id, name, invoices");
        assert_eq!(
            customer.fields.get("name").expect("name").owner_domain,
            "customers"
        );
        assert_eq!(
            customer
                .fields
                .get("invoices")
                .expect("invoices")
                .owner_domain,
            "billing"
        );
    }

    #[test]
    fn conflicting_field_ownership_is_rejected() {
        let mut other = billing_fragment();
        other.types[1].fields.push(FieldDef::scalar("name"));
        let err = ComposedSchema::compose(&[customers_fragment(), other])
            .expect_err("name is owned by customers");
        assert!(matches!(err, GatewayError::Composition(_)));
    }

    #[test]
    fn key_field_disagreement_is_rejected() {
        let mut other = billing_fragment();
        other.types[1].key_field = "uuid".into();
        let err = ComposedSchema::compose(&[customers_fragment(), other])
            .expect_err("keys must agree");
        assert!(matches!(err, GatewayError::Composition(_)));
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let fragment = SchemaFragment {
            domain: "billing".into(),
            types: vec![TypeDef {
                name: "invoice".into(),
                key_field: "id".into(),
                fields: vec![FieldDef::reference("customer", "customer", false, "billed_to")],
            }],
        };
        let err = ComposedSchema::compose(&[fragment]).expect_err("customer type is missing");
        assert!(matches!(err, GatewayError::Composition(_)));
    }
}
