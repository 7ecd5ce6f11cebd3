use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaFormat {
    Avro,
    JsonSchema,
    Protobuf,
    Graphql,
}

impl SchemaFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avro => "avro",
            Self::JsonSchema => "json-schema",
            Self::Protobuf => "protobuf",
            Self::Graphql => "graphql",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "avro" => Some(Self::Avro),
            "json-schema" => Some(Self::JsonSchema),
            "protobuf" => Some(Self::Protobuf),
            "graphql" => Some(Self::Graphql),
            _ => None,
        }
    }
}

/// One version on an entity type's schema timeline. Versions are monotonic;
/// a deprecated version precedes a retired one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SchemaDef {
    pub entity_type: String,
    pub version: u32,
    pub format: SchemaFormat,
    pub definition: String,
    pub backward_compatible: bool,
    pub forward_compatible: bool,
    pub registered_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<i64>,
}
