//! The JSON-Schema subset the translators understand.
//!
//! Schemas are deserialized loosely and then narrowed into the closed
//! [`SchemaKind`] model. Keywords outside the subset are logged and dropped.

mod registry;

pub use registry::{
    sanitize_enum_value, sanitize_field_name, sanitize_type_name, wrap, FieldType, Mode,
    RegistryOutput, ScalarReplacement, TypeRegistry, Wrapper,
};

use crate::error::UnsupportedConstruct;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Annotation keywords that carry no typing information.
const IGNORED_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "id",
    "default",
    "example",
    "examples",
    "deprecated",
    "readOnly",
    "writeOnly",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
    "xml",
    "externalDocs",
    "discriminator",
    "definitions",
    "$defs",
    "const",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl PrimitiveType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(PrimitiveType::String),
            "integer" => Some(PrimitiveType::Integer),
            "number" => Some(PrimitiveType::Number),
            "boolean" => Some(PrimitiveType::Boolean),
            "null" => Some(PrimitiveType::Null),
            _ => None,
        }
    }

    /// The GraphQL scalar a value of this type maps to.
    pub fn scalar(&self) -> &'static str {
        match self {
            PrimitiveType::String | PrimitiveType::Null => "String",
            PrimitiveType::Integer => "Int",
            PrimitiveType::Number => "Float",
            PrimitiveType::Boolean => "Boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub properties: IndexMap<String, JsonSchema>,
    pub required: Vec<String>,
    /// `additionalProperties` was `true` or a schema
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Ref(String),
    Primitive {
        ty: PrimitiveType,
        format: Option<String>,
        enum_values: Vec<Value>,
    },
    Object(ObjectSchema),
    Array(Option<Box<JsonSchema>>),
    OneOf(Vec<JsonSchema>),
    AllOf(Vec<JsonSchema>),
    /// No usable type information
    Any,
}

/// A narrowed JSON schema.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawSchema")]
pub struct JsonSchema {
    pub title: Option<String>,
    pub description: Option<String>,
    pub nullable: bool,
    pub kind: SchemaKind,
}

impl JsonSchema {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            title: None,
            description: None,
            nullable: false,
            kind,
        }
    }

    pub fn primitive(ty: PrimitiveType) -> Self {
        Self::new(SchemaKind::Primitive {
            ty,
            format: None,
            enum_values: Vec::new(),
        })
    }

    /// Narrow an arbitrary JSON value. Anything that is not a schema object
    /// becomes [`SchemaKind::Any`].
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value::<RawSchema>(value.clone()) {
            Ok(raw) => raw.into(),
            Err(e) => {
                UnsupportedConstruct::UnmappableSchema {
                    reason: e.to_string(),
                }
                .warn("json schema");
                Self::new(SchemaKind::Any)
            }
        }
    }

    /// A `$ref` with no other constraints.
    pub fn reference(&self) -> Option<&str> {
        match &self.kind {
            SchemaKind::Ref(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, SchemaKind::Array(_))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TypeSpec {
    Single(String),
    Multiple(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<RawSchema>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    #[serde(rename = "$ref")]
    reference: Option<String>,
    #[serde(rename = "type")]
    ty: Option<TypeSpec>,
    title: Option<String>,
    description: Option<String>,
    format: Option<String>,
    #[serde(rename = "enum")]
    enum_values: Option<Vec<Value>>,
    properties: Option<IndexMap<String, RawSchema>>,
    #[serde(default)]
    required: RequiredSpec,
    items: Option<Box<RawSchema>>,
    additional_properties: Option<AdditionalProperties>,
    one_of: Option<Vec<RawSchema>>,
    any_of: Option<Vec<RawSchema>>,
    all_of: Option<Vec<RawSchema>>,
    #[serde(default)]
    nullable: bool,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// `required` is a list in JSON Schema but a boolean on Swagger 2 parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum RequiredSpec {
    #[default]
    None,
    Flag(bool),
    Fields(Vec<String>),
}

impl From<RawSchema> for JsonSchema {
    fn from(raw: RawSchema) -> Self {
        for keyword in raw.extra.keys() {
            if !IGNORED_KEYWORDS.contains(&keyword.as_str()) && !keyword.starts_with("x-") {
                UnsupportedConstruct::UnknownSchemaKeyword {
                    keyword: keyword.clone(),
                }
                .warn(raw.title.as_deref().unwrap_or("json schema"));
            }
        }

        let (types, mut nullable) = match &raw.ty {
            None => (Vec::new(), false),
            Some(TypeSpec::Single(ty)) => (vec![ty.clone()], false),
            Some(TypeSpec::Multiple(types)) => {
                let nullable = types.iter().any(|t| t == "null");
                let types = types.iter().filter(|t| *t != "null").cloned().collect();
                (types, nullable)
            }
        };
        nullable |= raw.nullable;

        let kind = narrow(raw.clone(), types.first().map(String::as_str));
        JsonSchema {
            title: raw.title,
            description: raw.description,
            nullable,
            kind,
        }
    }
}

fn narrow(raw: RawSchema, ty: Option<&str>) -> SchemaKind {
    if let Some(reference) = raw.reference {
        return SchemaKind::Ref(reference);
    }
    if let Some(branches) = raw.one_of.or(raw.any_of) {
        return SchemaKind::OneOf(branches.into_iter().map(JsonSchema::from).collect());
    }
    if let Some(parts) = raw.all_of {
        return SchemaKind::AllOf(parts.into_iter().map(JsonSchema::from).collect());
    }

    let open = match &raw.additional_properties {
        Some(AdditionalProperties::Allowed(allowed)) => *allowed,
        Some(AdditionalProperties::Schema(_)) => true,
        None => false,
    };
    let required = match raw.required {
        RequiredSpec::Fields(fields) => fields,
        _ => Vec::new(),
    };

    match ty {
        Some("object") => SchemaKind::Object(ObjectSchema {
            properties: convert_properties(raw.properties),
            required,
            open,
        }),
        Some("array") => SchemaKind::Array(raw.items.map(|items| Box::new((*items).into()))),
        Some(other) => match PrimitiveType::parse(other) {
            Some(ty) => SchemaKind::Primitive {
                ty,
                format: raw.format,
                enum_values: raw.enum_values.unwrap_or_default(),
            },
            None => {
                UnsupportedConstruct::UnmappableSchema {
                    reason: format!("unknown type `{other}`"),
                }
                .warn("json schema");
                SchemaKind::Any
            }
        },
        None if raw.properties.is_some() => SchemaKind::Object(ObjectSchema {
            properties: convert_properties(raw.properties),
            required,
            open,
        }),
        None if raw.items.is_some() => {
            SchemaKind::Array(raw.items.map(|items| Box::new((*items).into())))
        }
        None => match raw.enum_values {
            Some(values) if values.iter().all(Value::is_string) => SchemaKind::Primitive {
                ty: PrimitiveType::String,
                format: raw.format,
                enum_values: values,
            },
            _ => SchemaKind::Any,
        },
    }
}

fn convert_properties(properties: Option<IndexMap<String, RawSchema>>) -> IndexMap<String, JsonSchema> {
    properties
        .unwrap_or_default()
        .into_iter()
        .map(|(name, schema)| (name, schema.into()))
        .collect()
}
