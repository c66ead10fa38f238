//! Root/child field classification.
//!
//! Walks a GraphQL SDL document and decides, per `(type, field)`, whether the
//! engine can fetch the field directly from the owning data source (a root
//! node) or only through a parent selection (a child node). Along the way it
//! records argument wiring, entity key requirements and JSON unescape hints.

use crate::federation::{self, FederationConfig};
use crate::sdl::ast::{FieldDefinition, ServiceDocument, TypeDefinition, TypeKind, TypeSystemDefinition};
use crate::sdl::{self, RootTypeNames};
use crate::types::{
    add_type_field, contains_type_field, remove_type_field, ArgumentConfiguration,
    FieldConfigurations, TypeField,
};
use tracing::debug;

/// Scalars that always carry JSON-encoded payloads.
pub const JSON_SCALARS: &[&str] = &["JSON", "JSONObject"];

/// Output of [`classify`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub root_nodes: Vec<TypeField>,
    pub child_nodes: Vec<TypeField>,
    pub fields: FieldConfigurations,
}

impl Classification {
    fn add_root(&mut self, type_name: &str, field_name: &str) {
        remove_type_field(&mut self.child_nodes, type_name, field_name);
        add_type_field(&mut self.root_nodes, type_name, field_name);
    }

    fn add_child(&mut self, type_name: &str, field_name: &str) {
        if !contains_type_field(&self.root_nodes, type_name, field_name) {
            add_type_field(&mut self.child_nodes, type_name, field_name);
        }
    }

    pub fn is_root(&self, type_name: &str, field_name: &str) -> bool {
        contains_type_field(&self.root_nodes, type_name, field_name)
    }

    pub fn is_child(&self, type_name: &str, field_name: &str) -> bool {
        contains_type_field(&self.child_nodes, type_name, field_name)
    }
}

/// What the traversal knows about the enclosing type.
#[derive(Debug, Clone)]
struct TypeContext<'a> {
    type_name: &'a str,
    is_root: bool,
    is_extension: bool,
    /// Key fields when the type is a federation entity
    entity_keys: Option<Vec<String>>,
}

impl<'a> TypeContext<'a> {
    fn enter(
        definition: &'a TypeDefinition,
        roots: &RootTypeNames,
        federation: &FederationConfig,
    ) -> Self {
        let type_name = sdl::type_definition_name(definition);
        Self {
            type_name,
            is_root: roots.contains(type_name),
            is_extension: federation::is_extension(definition),
            entity_keys: federation.entity(type_name).map(|e| e.key_fields()),
        }
    }
}

/// What the traversal knows about the current field.
#[derive(Debug, Clone)]
struct FieldContext<'a> {
    parent: &'a TypeContext<'a>,
    field_name: &'a str,
    external: bool,
    is_key: bool,
}

impl<'a> FieldContext<'a> {
    fn enter(parent: &'a TypeContext<'a>, field: &'a FieldDefinition) -> Self {
        let field_name = field.name.node.as_str();
        let is_key = parent
            .entity_keys
            .as_ref()
            .is_some_and(|keys| keys.iter().any(|k| k == field_name));
        Self {
            parent,
            field_name,
            external: federation::is_external(field),
            is_key,
        }
    }
}

/// Classify every field of `document`.
///
/// When `service_document` is given (the subgraph's own `_service { sdl }`),
/// it is walked first so that federation annotations it carries decide
/// ownership before the plain document fills in the rest.
pub fn classify(
    document: &ServiceDocument,
    service_document: Option<&ServiceDocument>,
    custom_json_scalars: &[String],
) -> Classification {
    let mut classification = Classification::default();
    if let Some(service) = service_document {
        visit_document(service, custom_json_scalars, &mut classification);
    }
    visit_document(document, custom_json_scalars, &mut classification);
    classification
}

/// Parse `sdl` and classify it.
pub fn classify_sdl(
    sdl: &str,
    service_sdl: Option<&str>,
    custom_json_scalars: &[String],
) -> crate::Result<Classification> {
    let document = sdl::parse(sdl)?;
    let service = service_sdl.map(sdl::parse).transpose()?;
    Ok(classify(&document, service.as_ref(), custom_json_scalars))
}

fn visit_document(
    document: &ServiceDocument,
    custom_json_scalars: &[String],
    out: &mut Classification,
) {
    let roots = RootTypeNames::from_document(document);
    let federation = FederationConfig::from_document(document);

    for definition in &document.definitions {
        let TypeSystemDefinition::Type(ty) = definition else {
            continue;
        };
        if !matches!(ty.node.kind, TypeKind::Object(_) | TypeKind::Interface(_)) {
            continue;
        }
        let context = TypeContext::enter(&ty.node, &roots, &federation);
        for field in sdl::field_definitions(&ty.node.kind).into_iter().flatten() {
            let field_context = FieldContext::enter(&context, &field.node);
            visit_field(&field_context, &field.node, custom_json_scalars, out);
        }
    }
}

fn visit_field(
    context: &FieldContext<'_>,
    field: &FieldDefinition,
    custom_json_scalars: &[String],
    out: &mut Classification,
) {
    let type_name = context.parent.type_name;
    let field_name = context.field_name;

    match (&context.parent.entity_keys, context.parent.is_root) {
        (_, true) => out.add_root(type_name, field_name),
        (Some(keys), false) if !context.external => {
            out.add_root(type_name, field_name);
            if context.parent.is_extension && !context.is_key {
                out.fields
                    .entry(type_name, field_name)
                    .add_requires_fields(keys.iter().cloned());
            }
        }
        (Some(_), false) if context.is_key => out.add_child(type_name, field_name),
        (None, false) if !context.external => out.add_child(type_name, field_name),
        (Some(keys), false) => {
            out.fields
                .entry(type_name, field_name)
                .add_requires_fields(keys.iter().cloned());
        }
        (None, false) => {}
    }
    debug!(
        type_name,
        field_name,
        root = out.is_root(type_name, field_name),
        "classified field"
    );

    for argument in &field.arguments {
        out.fields
            .entry(type_name, field_name)
            .set_argument(ArgumentConfiguration::field_argument(
                argument.node.name.node.as_str(),
            ));
    }

    let named = sdl::named_type(&field.ty.node);
    if is_json_scalar(named, custom_json_scalars) {
        out.fields.entry(type_name, field_name).unescape_response_json = true;
    }
}

pub fn is_json_scalar(type_name: &str, custom_json_scalars: &[String]) -> bool {
    JSON_SCALARS.contains(&type_name) || custom_json_scalars.iter().any(|s| s == type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArgumentSource;

    fn classify_str(sdl: &str) -> Classification {
        classify_sdl(sdl, None, &[]).unwrap()
    }

    #[test]
    fn root_operation_fields_are_roots() {
        let result = classify_str(
            r#"
            type Query { me: User, user(id: ID!, verbose: Boolean): User }
            type Mutation { logout: Boolean }
            type User { id: ID!, name: String }
            "#,
        );
        assert!(result.is_root("Query", "me"));
        assert!(result.is_root("Mutation", "logout"));
        assert!(result.is_child("User", "id"));
        assert!(result.is_child("User", "name"));

        let user = result.fields.get("Query", "user").unwrap();
        let names: Vec<_> = user.arguments_configuration.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["id", "verbose"]);
        assert!(user
            .arguments_configuration
            .iter()
            .all(|a| a.source_type == ArgumentSource::FieldArgument));
    }

    #[test]
    fn custom_schema_roots() {
        let result = classify_str(
            "schema { query: RootQuery } type RootQuery { a: Int } type Query { b: Int }",
        );
        assert!(result.is_root("RootQuery", "a"));
        assert!(result.is_child("Query", "b"));
    }

    #[test]
    fn entity_extension_fields_require_keys() {
        let result = classify_str(
            r#"
            extend type Product @key(fields: "upc") {
              upc: String! @external
              weight: Int @external
              inStock: Boolean
              shippingEstimate: Int
            }
            "#,
        );
        assert!(result.is_child("Product", "upc"));
        assert!(result.is_root("Product", "inStock"));
        assert!(result.is_root("Product", "shippingEstimate"));
        assert!(!result.is_root("Product", "weight"));
        assert!(!result.is_child("Product", "weight"));

        let estimate = result.fields.get("Product", "shippingEstimate").unwrap();
        assert_eq!(estimate.requires_fields, vec!["upc"]);
        let weight = result.fields.get("Product", "weight").unwrap();
        assert_eq!(weight.requires_fields, vec!["upc"]);
    }

    #[test]
    fn originating_entity_fields_are_roots_without_requirements() {
        let result = classify_str(
            r#"
            type Query { topProducts: [Product] }
            type Product @key(fields: "upc") { upc: String!, name: String }
            "#,
        );
        assert!(result.is_root("Product", "upc"));
        assert!(result.is_root("Product", "name"));
        assert!(result.fields.get("Product", "name").is_none());
    }

    #[test]
    fn roots_and_children_are_disjoint() {
        let service = sdl::parse(r#"type User @key(fields: "id") { id: ID!, name: String }"#).unwrap();
        let document = sdl::parse("type Query { me: User } type User { id: ID!, name: String }").unwrap();
        let result = classify(&document, Some(&service), &[]);
        for root in &result.root_nodes {
            for field in &root.field_names {
                assert!(!result.is_child(&root.type_name, field), "{}.{field}", root.type_name);
            }
        }
        assert!(result.is_root("User", "name"));
    }

    #[test]
    fn json_fields_are_unescaped() {
        let result = classify_sdl(
            "scalar JSON scalar Blob type Query { raw: [JSON!], blob: Blob, plain: String }",
            None,
            &["Blob".to_string()],
        )
        .unwrap();
        assert!(result.fields.get("Query", "raw").unwrap().unescape_response_json);
        assert!(result.fields.get("Query", "blob").unwrap().unescape_response_json);
        assert!(result.fields.get("Query", "plain").is_none());
    }
}
