//! GraphQL Federation support
//!
//! Reads Apollo Federation annotations (`@key`, `@extends`, `@external`) off an
//! SDL document and names the federation-only artifacts that never reach the
//! merged schema.

use crate::error::UnsupportedConstruct;
use crate::sdl::ast::{
    ConstDirective, DocumentOperations, FieldDefinition, Selection, ServiceDocument,
    TypeDefinition, TypeSystemDefinition,
};
use crate::sdl::{self, ConstValue, Positioned};
use std::collections::HashMap;

/// Directives that only mean something to a federation router.
pub const FEDERATION_DIRECTIVES: &[&str] = &[
    "key",
    "extends",
    "external",
    "requires",
    "provides",
    "shareable",
    "link",
    "inaccessible",
    "override",
    "tag",
    "composeDirective",
    "interfaceObject",
];

/// Synthetic types a subgraph exposes for its router.
pub const FEDERATION_TYPES: &[&str] = &["_Service", "_Any", "_Entity", "_FieldSet"];

/// Root fields a subgraph exposes for its router.
pub const FEDERATION_ROOT_FIELDS: &[&str] = &["_service", "_entities"];

/// Federation configuration extracted from an SDL document
#[derive(Clone, Debug, Default)]
pub struct FederationConfig {
    /// Map of entity type names to their key fields
    pub entities: HashMap<String, EntityConfig>,
}

/// Configuration for a federated entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityConfig {
    /// Key field sets for this entity (e.g., ["id"], ["email"], or ["orgId", "userId"])
    pub keys: Vec<Vec<String>>,
    /// Whether this entity extends an entity from another service
    pub extend: bool,
    /// Whether this service can resolve this entity
    pub resolvable: bool,
    /// The GraphQL type name for this entity
    pub type_name: String,
}

impl EntityConfig {
    /// Every field named by any of the entity's keys, in first-seen order.
    pub fn key_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        for field in self.keys.iter().flatten() {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }
}

impl FederationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `@key`-annotated object or interface in the document.
    ///
    /// A type declared several times (base plus `extend`) accumulates the keys
    /// of every declaration.
    pub fn from_document(document: &ServiceDocument) -> Self {
        let mut config = Self::new();
        for definition in &document.definitions {
            let TypeSystemDefinition::Type(ty) = definition else {
                continue;
            };
            let Some(entity) = entity_config(&ty.node) else {
                continue;
            };
            match config.entities.get_mut(&entity.type_name) {
                Some(existing) => {
                    for key in entity.keys {
                        if !existing.keys.contains(&key) {
                            existing.keys.push(key);
                        }
                    }
                    existing.extend |= entity.extend;
                    existing.resolvable |= entity.resolvable;
                }
                None => {
                    config.entities.insert(entity.type_name.clone(), entity);
                }
            }
        }
        config
    }

    /// Check if federation is enabled (i.e., if there are any entities)
    pub fn is_enabled(&self) -> bool {
        !self.entities.is_empty()
    }

    pub fn entity(&self, type_name: &str) -> Option<&EntityConfig> {
        self.entities.get(type_name)
    }
}

/// Entity configuration of a single type definition, if it carries `@key`.
///
/// Returns `None` for types without a usable key. Malformed selections are
/// logged and contribute no key fields.
pub fn entity_config(definition: &TypeDefinition) -> Option<EntityConfig> {
    let type_name = sdl::type_definition_name(definition);
    let mut keys = Vec::new();
    let mut resolvable = false;

    for directive in definition
        .directives
        .iter()
        .filter(|d| d.node.name.node.as_str() == "key")
    {
        match key_selection(&directive.node) {
            Some(fields) if !fields.is_empty() => {
                if !keys.contains(&fields) {
                    keys.push(fields);
                }
                resolvable |= !matches!(
                    sdl::directive_argument(&directive.node, "resolvable"),
                    Some(ConstValue::Boolean(false))
                );
            }
            _ => UnsupportedConstruct::MalformedKeySelection {
                type_name: type_name.to_string(),
            }
            .warn(type_name),
        }
    }

    if keys.is_empty() {
        return None;
    }

    Some(EntityConfig {
        keys,
        extend: is_extension(definition),
        resolvable,
        type_name: type_name.to_string(),
    })
}

/// Top-level field names of a `@key(fields: "...")` selection.
fn key_selection(directive: &ConstDirective) -> Option<Vec<String>> {
    match sdl::directive_argument(directive, "fields")? {
        ConstValue::String(selection) => parse_selection(selection),
        _ => None,
    }
}

/// Parse a bare selection set such as `"upc sku { id }"` into its top-level
/// field names.
pub fn parse_selection(selection: &str) -> Option<Vec<String>> {
    let document = async_graphql::parser::parse_query(format!("{{ {selection} }}")).ok()?;
    let DocumentOperations::Single(operation) = document.operations else {
        return None;
    };

    let mut fields = Vec::new();
    for item in &operation.node.selection_set.node.items {
        match &item.node {
            Selection::Field(field) => {
                let name = field.node.name.node.to_string();
                if !fields.contains(&name) {
                    fields.push(name);
                }
            }
            _ => return None,
        }
    }
    Some(fields)
}

/// Declared with `extend type` or annotated `@extends`.
pub fn is_extension(definition: &TypeDefinition) -> bool {
    definition.extend || sdl::has_directive(&definition.directives, "extends")
}

pub fn is_external(field: &FieldDefinition) -> bool {
    sdl::has_directive(&field.directives, "external")
}

pub fn is_federation_directive(name: &str) -> bool {
    FEDERATION_DIRECTIVES.contains(&name)
}

pub fn is_federation_type(name: &str) -> bool {
    FEDERATION_TYPES.contains(&name)
}

/// Drop federation directive usages from a directive list.
pub fn strip_directives(directives: &mut Vec<Positioned<ConstDirective>>) {
    directives.retain(|d| !is_federation_directive(d.node.name.node.as_str()));
}
