//! Merging of translated APIs into the single API the engine serves.
//!
//! Data sources, field configurations and rename tables are concatenated in
//! input order. The schemas are folded together structurally with a fixed
//! base schema of gateway directives, federation artifacts are stripped and
//! every non-root object type gets a `_join: Query!` back-reference.

use crate::error::{Error, Result};
use crate::federation::{self, FEDERATION_ROOT_FIELDS};
use crate::jsonschema::sanitize_enum_value;
use crate::sdl::ast::{
    DirectiveDefinition, FieldDefinition, InputValueDefinition, SchemaDefinition, ServiceDocument,
    TypeDefinition, TypeKind, TypeSystemDefinition,
};
use crate::sdl::{self, Name, Positioned, RootTypeNames};
use crate::types::{
    push_unique, remove_type_field, Api, DataSource, DataSourceCustom, StaticCustom, TypeField,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Roles used when the configuration names none.
pub const DEFAULT_ROLES: &[&str] = &["admin", "user"];

/// Claims every identity provider integration can supply.
pub const BUILT_IN_CLAIMS: &[&str] = &[
    "USERID",
    "EMAIL",
    "EMAIL_VERIFIED",
    "NAME",
    "NICKNAME",
    "LOCATION",
    "PROVIDER",
];

/// Id of the synthetic data source that resolves `_join` fields.
pub const JOIN_DATA_SOURCE_ID: &str = "join";

pub const JOIN_FIELD: &str = "_join";

/// Gateway directives every merged schema carries.
pub const BASE_SCHEMA: &str = r#"
directive @fromClaim(name: GatewayClaim) on VARIABLE_DEFINITION

directive @rbac(requireMatchAll: [GatewayRole], requireMatchAny: [GatewayRole], denyMatchAll: [GatewayRole], denyMatchAny: [GatewayRole]) on QUERY | MUTATION | SUBSCRIPTION

directive @export(as: String!) on FIELD

directive @transform(get: String) on FIELD

directive @injectCurrentDateTime(format: GatewayDateTimeFormat = ISO8601, customFormat: String) on VARIABLE_DEFINITION

directive @injectGeneratedUUID on VARIABLE_DEFINITION

directive @injectEnvironmentVariable(name: String!) on VARIABLE_DEFINITION

directive @internal on VARIABLE_DEFINITION

enum GatewayDateTimeFormat {
  ISO8601
  RFC3339
  RFC822
  RFC850
  RFC1123
  UNIX_DATE
  DATE_ONLY
  TIME_ONLY
  UNIX_SECONDS
  UNIX_MILLIS
}
"#;

/// Build the `GatewayRole`/`GatewayClaim` enums from the configured names.
pub fn roles_and_claims_schema(roles: &[String], custom_claims: &[String]) -> String {
    let roles: Vec<String> = if roles.is_empty() {
        DEFAULT_ROLES.iter().map(|r| r.to_string()).collect()
    } else {
        roles.to_vec()
    };
    let mut role_values = Vec::new();
    for role in &roles {
        if let Some(value) = sanitize_enum_value(&Value::String(role.clone())) {
            push_unique(&mut role_values, value);
        }
    }

    let mut claim_values: Vec<String> = BUILT_IN_CLAIMS.iter().map(|c| c.to_string()).collect();
    for claim in custom_claims {
        if let Some(value) = sanitize_enum_value(&Value::String(claim.to_uppercase())) {
            push_unique(&mut claim_values, value);
        }
    }

    let document = ServiceDocument {
        definitions: vec![
            sdl::enum_type("GatewayRole", &role_values),
            sdl::enum_type("GatewayClaim", &claim_values),
        ],
    };
    sdl::print_document(&document)
}

/// Merge `apis` in order into one engine-ready [`Api`].
///
/// The first API wins path mappings on field metadata conflicts; later
/// APIs only add what is missing.
pub fn merge_apis(apis: &[Api], roles: &[String], custom_claims: &[String]) -> Result<Api> {
    let mut merged = Api::default();
    for api in apis {
        merged.data_sources.extend(api.data_sources.iter().cloned());
        merged.fields.extend(api.fields.clone());
        for ty in &api.types {
            if !merged.types.contains(ty) {
                merged.types.push(ty.clone());
            }
        }
        for name in &api.interpolate_variable_definition_as_json {
            merged.add_interpolate_as_json(name.as_str());
        }
        for scalar in &api.custom_json_scalars {
            merged.add_custom_json_scalar(scalar.as_str());
        }
    }

    let mut builder = SchemaBuilder::default();
    for api in apis {
        let document = sdl::parse(&api.schema).map_err(|e| match api.namespace.as_str() {
            "" => e,
            namespace => e.for_upstream(namespace),
        })?;
        builder.add_document(document)?;
    }
    builder.add_document(sdl::parse(BASE_SCHEMA)?)?;
    builder.add_document(sdl::parse(&roles_and_claims_schema(roles, custom_claims))?)?;

    let mut document = builder.finish();
    strip_artifacts(&mut document);

    let roots = RootTypeNames::from_document(&document);
    let has_query = document.definitions.iter().any(|definition| {
        matches!(definition, TypeSystemDefinition::Type(ty) if ty.node.name.node.as_str() == roots.query)
    });
    if !has_query {
        return Err(Error::Schema(format!(
            "merged schema has no `{}` type",
            roots.query
        )));
    }

    assign_root_owners(&mut merged.data_sources, &roots);

    let joined = inject_join_fields(&mut document, &roots);
    if !joined.is_empty() {
        let mut join = DataSource::new(
            JOIN_DATA_SOURCE_ID,
            DataSourceCustom::Static(StaticCustom {
                data: "{}".to_string(),
            }),
        );
        join.root_nodes = joined
            .into_iter()
            .map(|type_name| TypeField {
                type_name,
                field_names: vec![JOIN_FIELD.to_string()],
            })
            .collect();
        merged.data_sources.push(join);
    }

    merged.schema = sdl::print_document(&document);
    info!(
        apis = apis.len(),
        data_sources = merged.data_sources.len(),
        "merged APIs"
    );
    Ok(merged)
}

/// Structural merge state, keyed by definition name in first-seen order.
#[derive(Default)]
struct SchemaBuilder {
    schema: Option<SchemaDefinition>,
    types: IndexMap<String, TypeDefinition>,
    directives: IndexMap<String, DirectiveDefinition>,
}

impl SchemaBuilder {
    fn add_document(&mut self, document: ServiceDocument) -> Result<()> {
        for definition in document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema) => self.add_schema(schema.node)?,
                TypeSystemDefinition::Type(ty) => self.add_type(ty.node)?,
                TypeSystemDefinition::Directive(directive) => self.add_directive(directive.node)?,
            }
        }
        Ok(())
    }

    fn add_schema(&mut self, incoming: SchemaDefinition) -> Result<()> {
        let Some(existing) = self.schema.as_mut() else {
            self.schema = Some(SchemaDefinition {
                extend: false,
                ..incoming
            });
            return Ok(());
        };
        let operations = [
            ("query", &mut existing.query, incoming.query),
            ("mutation", &mut existing.mutation, incoming.mutation),
            ("subscription", &mut existing.subscription, incoming.subscription),
        ];
        for (operation, current, new) in operations {
            let Some(new) = new else {
                continue;
            };
            if let Some(existing) = current.as_ref() {
                if existing.node != new.node {
                    return Err(Error::SchemaCollision {
                        type_name: new.node.to_string(),
                        reason: format!("{operation} root is already `{}`", existing.node),
                    });
                }
            } else {
                *current = Some(new);
            }
        }
        Ok(())
    }

    fn add_type(&mut self, incoming: TypeDefinition) -> Result<()> {
        let name = incoming.name.node.to_string();
        let Some(existing) = self.types.get_mut(&name) else {
            self.types.insert(
                name,
                TypeDefinition {
                    extend: false,
                    ..incoming
                },
            );
            return Ok(());
        };
        debug!(type_name = %name, "merging type definitions");

        if existing.description.is_none() {
            existing.description = incoming.description;
        }
        for directive in incoming.directives {
            let seen = existing
                .directives
                .iter()
                .any(|d| d.node.name.node == directive.node.name.node);
            if !seen || directive.node.name.node.as_str() == "key" {
                existing.directives.push(directive);
            }
        }

        match (&mut existing.kind, incoming.kind) {
            (TypeKind::Scalar, TypeKind::Scalar) => {}
            (TypeKind::Object(a), TypeKind::Object(b)) => {
                merge_names(&mut a.implements, b.implements);
                merge_fields(&name, &mut a.fields, b.fields)?;
            }
            (TypeKind::Interface(a), TypeKind::Interface(b)) => {
                merge_names(&mut a.implements, b.implements);
                merge_fields(&name, &mut a.fields, b.fields)?;
            }
            (TypeKind::Union(a), TypeKind::Union(b)) => merge_names(&mut a.members, b.members),
            (TypeKind::Enum(a), TypeKind::Enum(b)) => {
                for value in b.values {
                    if !a.values.iter().any(|v| v.node.value.node == value.node.value.node) {
                        a.values.push(value);
                    }
                }
            }
            (TypeKind::InputObject(a), TypeKind::InputObject(b)) => {
                merge_input_values(&name, &mut a.fields, b.fields)?;
            }
            (current, other) => {
                return Err(Error::SchemaCollision {
                    type_name: name,
                    reason: format!(
                        "defined both as {} and as {}",
                        kind_name(current),
                        kind_name(&other)
                    ),
                });
            }
        }
        Ok(())
    }

    fn add_directive(&mut self, incoming: DirectiveDefinition) -> Result<()> {
        let name = incoming.name.node.to_string();
        let Some(existing) = self.directives.get(&name) else {
            self.directives.insert(name, incoming);
            return Ok(());
        };
        if federation::is_federation_directive(&name) {
            return Ok(());
        }
        let compatible = existing.arguments.len() == incoming.arguments.len()
            && existing
                .arguments
                .iter()
                .zip(&incoming.arguments)
                .all(|(a, b)| same_input_value(&a.node, &b.node));
        if !compatible {
            return Err(Error::SchemaCollision {
                type_name: format!("@{name}"),
                reason: "directive is declared twice with different arguments".to_string(),
            });
        }
        Ok(())
    }

    fn finish(self) -> ServiceDocument {
        let mut definitions = Vec::new();
        if let Some(schema) = self.schema {
            definitions.push(TypeSystemDefinition::Schema(sdl::positioned(schema)));
        }
        definitions.extend(
            self.types
                .into_values()
                .map(|ty| TypeSystemDefinition::Type(sdl::positioned(ty))),
        );
        definitions.extend(
            self.directives
                .into_values()
                .map(|d| TypeSystemDefinition::Directive(sdl::positioned(d))),
        );
        ServiceDocument { definitions }
    }
}

fn kind_name(kind: &TypeKind) -> &'static str {
    match kind {
        TypeKind::Scalar => "scalar",
        TypeKind::Object(_) => "object",
        TypeKind::Interface(_) => "interface",
        TypeKind::Union(_) => "union",
        TypeKind::Enum(_) => "enum",
        TypeKind::InputObject(_) => "input object",
    }
}

fn merge_names(existing: &mut Vec<Positioned<Name>>, incoming: Vec<Positioned<Name>>) {
    for name in incoming {
        if !existing.iter().any(|n| n.node == name.node) {
            existing.push(name);
        }
    }
}

fn merge_fields(
    type_name: &str,
    existing: &mut Vec<Positioned<FieldDefinition>>,
    incoming: Vec<Positioned<FieldDefinition>>,
) -> Result<()> {
    for field in incoming {
        let Some(current) = existing
            .iter_mut()
            .find(|f| f.node.name.node == field.node.name.node)
        else {
            existing.push(field);
            continue;
        };
        if !sdl::same_shape(&current.node.ty.node, &field.node.ty.node) {
            return Err(Error::SchemaCollision {
                type_name: type_name.to_string(),
                reason: format!(
                    "field `{}` is both `{}` and `{}`",
                    field.node.name.node,
                    sdl::print_type(&current.node.ty.node),
                    sdl::print_type(&field.node.ty.node)
                ),
            });
        }
        // an owned field replaces a federation stub of itself
        if federation::is_external(&current.node) && !federation::is_external(&field.node) {
            let arguments = std::mem::take(&mut current.node.arguments);
            *current = field;
            merge_input_values(type_name, &mut current.node.arguments, arguments)?;
        } else {
            merge_input_values(type_name, &mut current.node.arguments, field.node.arguments)?;
        }
    }
    Ok(())
}

fn merge_input_values(
    type_name: &str,
    existing: &mut Vec<Positioned<InputValueDefinition>>,
    incoming: Vec<Positioned<InputValueDefinition>>,
) -> Result<()> {
    for value in incoming {
        let Some(current) = existing
            .iter()
            .find(|v| v.node.name.node == value.node.name.node)
        else {
            existing.push(value);
            continue;
        };
        if !sdl::same_shape(&current.node.ty.node, &value.node.ty.node) {
            return Err(Error::SchemaCollision {
                type_name: type_name.to_string(),
                reason: format!(
                    "input value `{}` is both `{}` and `{}`",
                    value.node.name.node,
                    sdl::print_type(&current.node.ty.node),
                    sdl::print_type(&value.node.ty.node)
                ),
            });
        }
    }
    Ok(())
}

fn same_input_value(a: &InputValueDefinition, b: &InputValueDefinition) -> bool {
    a.name.node == b.name.node && a.ty.node == b.ty.node
}

/// Remove introspection types and everything only a federation router needs.
fn strip_artifacts(document: &mut ServiceDocument) {
    document.definitions.retain_mut(|definition| match definition {
        TypeSystemDefinition::Schema(schema) => {
            federation::strip_directives(&mut schema.node.directives);
            true
        }
        TypeSystemDefinition::Directive(directive) => {
            !federation::is_federation_directive(directive.node.name.node.as_str())
        }
        TypeSystemDefinition::Type(ty) => {
            let ty = &mut ty.node;
            let name = ty.name.node.as_str();
            if name.starts_with("__") || name == "Entity" || federation::is_federation_type(name) {
                debug!(type_name = name, "dropping federation artifact");
                return false;
            }
            federation::strip_directives(&mut ty.directives);
            if let Some(fields) = sdl::field_definitions_mut(&mut ty.kind) {
                fields.retain(|f| {
                    let name = f.node.name.node.as_str();
                    !name.starts_with("__") && !FEDERATION_ROOT_FIELDS.contains(&name)
                });
                for field in fields.iter_mut() {
                    federation::strip_directives(&mut field.node.directives);
                }
            }
            true
        }
    });
}

/// Add `_join: Query!` to every non-root object type lacking it.
///
/// Returns the names of the types that received the field.
/// Give every root operation field a single owning data source.
///
/// The first data source to claim a field keeps it; later claims are dropped
/// with a warning. Entity fields on other types may be served by several
/// data sources and are left alone.
fn assign_root_owners(data_sources: &mut [DataSource], roots: &RootTypeNames) {
    let mut owners: HashMap<(String, String), String> = HashMap::new();
    for data_source in data_sources.iter_mut() {
        let mut duplicates = Vec::new();
        for node in data_source.root_nodes.iter().filter(|n| roots.contains(&n.type_name)) {
            for field_name in &node.field_names {
                let key = (node.type_name.clone(), field_name.clone());
                match owners.get(&key) {
                    Some(owner) => duplicates.push((key.0, key.1, owner.clone())),
                    None => {
                        owners.insert(key, data_source.id.clone());
                    }
                }
            }
        }
        for (type_name, field_name, owner) in duplicates {
            warn!(
                type_name = %type_name,
                field_name = %field_name,
                owner = %owner,
                data_source = %data_source.id,
                "root field already owned by another data source, add a namespace to keep both"
            );
            remove_type_field(&mut data_source.root_nodes, &type_name, &field_name);
        }
    }
}

fn inject_join_fields(document: &mut ServiceDocument, roots: &RootTypeNames) -> Vec<String> {
    let mut joined = Vec::new();
    for definition in &mut document.definitions {
        let TypeSystemDefinition::Type(ty) = definition else {
            continue;
        };
        let ty = &mut ty.node;
        if roots.contains(ty.name.node.as_str()) {
            continue;
        }
        let TypeKind::Object(object) = &mut ty.kind else {
            continue;
        };
        if object.fields.iter().any(|f| f.node.name.node.as_str() == JOIN_FIELD) {
            continue;
        }
        object.fields.push(sdl::field(
            JOIN_FIELD,
            sdl::non_null(sdl::named(&roots.query)),
            Vec::new(),
        ));
        joined.push(ty.name.node.to_string());
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::namespace_api;
    use crate::types::{contains_type_field, DataSourceKind, FieldConfiguration};
    use pretty_assertions::assert_eq;

    fn api(schema: &str) -> Api {
        Api::new(schema)
    }

    #[test]
    fn base_schema_is_always_present() {
        let merged = merge_apis(&[api("type Query { hello: String }")], &[], &[]).unwrap();
        for expected in [
            "directive @fromClaim(name: GatewayClaim) on VARIABLE_DEFINITION",
            "directive @injectGeneratedUUID on VARIABLE_DEFINITION",
            "enum GatewayRole {\n  admin\n  user\n}",
            "USERID\n  EMAIL\n  EMAIL_VERIFIED",
            "enum GatewayDateTimeFormat {",
        ] {
            assert!(merged.schema.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn configured_roles_and_claims() {
        let schema = roles_and_claims_schema(
            &["editor".to_string(), "viewer".to_string()],
            &["tenant-id".to_string()],
        );
        assert!(schema.contains("enum GatewayRole {\n  editor\n  viewer\n}"));
        assert!(schema.contains("  PROVIDER\n  TENANT_ID\n}"));
    }

    #[test]
    fn object_types_get_join_fields() {
        let merged = merge_apis(
            &[api("type Query { user: User } type User { id: ID! } interface Node { id: ID! }")],
            &[],
            &[],
        )
        .unwrap();
        assert!(merged
            .schema
            .starts_with("type Query {\n  user: User\n}\n\ntype User {\n  id: ID!\n  _join: Query!\n}\n\ninterface Node {\n  id: ID!\n}\n"));

        let join = merged.data_sources.last().unwrap();
        assert_eq!(join.id, JOIN_DATA_SOURCE_ID);
        assert_eq!(join.kind(), DataSourceKind::Static);
        assert!(contains_type_field(&join.root_nodes, "User", "_join"));
        assert!(!contains_type_field(&join.root_nodes, "Node", "_join"));
        assert!(!contains_type_field(&join.root_nodes, "Query", "_join"));
    }

    #[test]
    fn incompatible_types_collide() {
        let a = api("type Query { a: Foo } type Foo { id: ID! }");
        let b = api("type Query { b: Foo } type Foo { id: [ID!] }");
        let err = merge_apis(&[a.clone(), b.clone()], &[], &[]).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_COLLISION");
        assert!(err.to_string().contains("`Foo`"));
        assert!(err.to_string().contains("namespace"));

        let a = namespace_api(&a, "a", &[]).unwrap();
        let b = namespace_api(&b, "b", &[]).unwrap();
        let merged = merge_apis(&[a, b], &[], &[]).unwrap();
        assert!(merged.schema.contains("type a_Foo {"));
        assert!(merged.schema.contains("type b_Foo {"));
        assert!(merged.schema.contains("type Query {\n  a_a: a_Foo\n  b_b: b_Foo\n}"));
    }

    #[test]
    fn kind_mismatch_collides() {
        let err = merge_apis(
            &[
                api("type Query { a: Int } type Foo { id: ID }"),
                api("type Query { b: Int } input Foo { id: ID }"),
            ],
            &[],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::SchemaCollision { ref type_name, .. } if type_name == "Foo"));
    }

    #[test]
    fn enums_and_unions_are_unioned() {
        let merged = merge_apis(
            &[
                api("type Query { a: R } enum E { A } type X { x: Int } union R = X"),
                api("type Query { b: E } enum E { B } type Y { y: Int } union R = Y"),
            ],
            &[],
            &[],
        )
        .unwrap();
        assert!(merged.schema.contains("enum E {\n  A\n  B\n}"));
        assert!(merged.schema.contains("union R = X | Y"));
    }

    #[test]
    fn federation_artifacts_are_stripped() {
        let merged = merge_apis(
            &[api(r#"
                scalar _Any
                union Entity = Product
                type _Service { sdl: String }
                directive @key(fields: String!) on OBJECT
                type Query { _service: _Service! _entities(representations: [_Any!]!): [Entity]! top: Product }
                type Product @key(fields: "upc") { upc: String! }
            "#)],
            &[],
            &[],
        )
        .unwrap();
        assert!(!merged.schema.contains("_Any"));
        assert!(!merged.schema.contains("Entity"));
        assert!(!merged.schema.contains("@key"));
        assert!(!merged.schema.contains("_service"));
        assert!(merged.schema.contains("type Product {\n  upc: String!\n  _join: Query!\n}"));
    }

    #[test]
    fn missing_query_is_an_error() {
        let err = merge_apis(&[api("type Foo { id: ID }")], &[], &[]).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_ERROR");
    }

    #[test]
    fn root_fields_keep_their_first_owner() {
        let source = |id: &str| {
            let mut data_source = DataSource::new(
                id,
                DataSourceCustom::Static(StaticCustom {
                    data: "{}".to_string(),
                }),
            );
            data_source.root_nodes = vec![
                TypeField {
                    type_name: "Query".into(),
                    field_names: vec!["hello".into(), format!("only_{id}")],
                },
                TypeField {
                    type_name: "Product".into(),
                    field_names: vec!["name".into()],
                },
            ];
            data_source
        };
        let mut a = api("type Query { hello: String, only_a: Int } type Product { name: String }");
        a.data_sources.push(source("a"));
        let mut b = api("type Query { hello: String, only_b: Int } type Product { name: String }");
        b.data_sources.push(source("b"));

        let merged = merge_apis(&[a, b], &[], &[]).unwrap();
        let owners: Vec<&str> = merged
            .data_sources
            .iter()
            .filter(|ds| contains_type_field(&ds.root_nodes, "Query", "hello"))
            .map(|ds| ds.id.as_str())
            .collect();
        assert_eq!(owners, vec!["a"]);

        let b = &merged.data_sources[1];
        assert!(contains_type_field(&b.root_nodes, "Query", "only_b"));
        assert!(contains_type_field(&b.root_nodes, "Product", "name"));
        assert!(contains_type_field(&merged.data_sources[0].root_nodes, "Product", "name"));
    }

    #[test]
    fn first_api_wins_field_mappings() {
        let mut a = api("type Query { a: Int }");
        let mut first = FieldConfiguration::new("Query", "a");
        first.path = vec!["first".into()];
        first.requires_fields = vec!["x".into()];
        a.fields.merge(first);

        let mut b = api("type Query { a: Int }");
        let mut second = FieldConfiguration::new("Query", "a");
        second.path = vec!["second".into()];
        second.requires_fields = vec!["y".into()];
        second.unescape_response_json = true;
        b.fields.merge(second);

        let merged = merge_apis(&[a, b], &[], &[]).unwrap();
        let field = merged.fields.get("Query", "a").unwrap();
        assert_eq!(field.path, vec!["first"]);
        assert_eq!(field.requires_fields, vec!["x", "y"]);
        assert!(field.unescape_response_json);
    }
}
