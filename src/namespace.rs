//! Namespacing of an API's schema and routing metadata.
//!
//! Every type and custom directive an API defines is prefixed with
//! `<namespace>_`, and so is every field of the root operation types. Names
//! in a small well-known set are shared across APIs and never renamed. The
//! routing metadata is rewritten in lock-step, and a rename table lets the
//! engine translate namespaced names back for the upstream.

use crate::error::Result;
use crate::federation::{self, FEDERATION_ROOT_FIELDS};
use crate::sdl::ast::{ConstDirective, InputValueDefinition, ServiceDocument, TypeKind, TypeSystemDefinition};
use crate::sdl::{self, Name, Positioned, RootTypeNames};
use crate::types::{Api, DirectiveConfiguration, TypeConfiguration, TypeField};
use std::collections::HashSet;
use tracing::debug;

/// Synthetic and shared type names that keep their name in every namespace.
pub const WELL_KNOWN_TYPES: &[&str] = &["JSON", "JSONObject", "UnspecifiedHttpResponse"];

pub fn is_well_known_type(name: &str, roots: &RootTypeNames) -> bool {
    name.starts_with("__")
        || sdl::BUILT_IN_SCALARS.contains(&name)
        || WELL_KNOWN_TYPES.contains(&name)
        || federation::is_federation_type(name)
        || roots.contains(name)
}

/// Rename decisions for one document.
struct Renamer<'a> {
    namespace: &'a str,
    roots: RootTypeNames,
    types: HashSet<String>,
    directives: HashSet<String>,
    skip: &'a [String],
}

impl<'a> Renamer<'a> {
    fn new(document: &ServiceDocument, namespace: &'a str, skip: &'a [String]) -> Self {
        let roots = RootTypeNames::from_document(document);
        let mut types = HashSet::new();
        let mut directives = HashSet::new();
        for definition in &document.definitions {
            match definition {
                TypeSystemDefinition::Type(ty) => {
                    let name = ty.node.name.node.as_str();
                    if !is_well_known_type(name, &roots) {
                        types.insert(name.to_string());
                    }
                }
                TypeSystemDefinition::Directive(directive) => {
                    let name = directive.node.name.node.as_str();
                    if !sdl::BUILT_IN_DIRECTIVES.contains(&name)
                        && !federation::is_federation_directive(name)
                    {
                        directives.insert(name.to_string());
                    }
                }
                TypeSystemDefinition::Schema(_) => {}
            }
        }
        Self {
            namespace,
            roots,
            types,
            directives,
            skip,
        }
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}_{name}", self.namespace)
    }

    fn type_name(&self, name: &str) -> Option<String> {
        self.types.contains(name).then(|| self.prefixed(name))
    }

    fn type_name_or_same(&self, name: &str) -> String {
        self.type_name(name).unwrap_or_else(|| name.to_string())
    }

    fn directive_name(&self, name: &str) -> Option<String> {
        self.directives.contains(name).then(|| self.prefixed(name))
    }

    fn root_field(&self, type_name: &str, field_name: &str) -> Option<String> {
        let renamed = self.roots.contains(type_name)
            && !field_name.starts_with("__")
            && !FEDERATION_ROOT_FIELDS.contains(&field_name)
            && !self.skip.iter().any(|s| s == field_name);
        renamed.then(|| self.prefixed(field_name))
    }

    fn rename_document(&self, document: &mut ServiceDocument) {
        for definition in &mut document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema) => {
                    self.rename_directives(&mut schema.node.directives);
                }
                TypeSystemDefinition::Directive(directive) => {
                    let directive = &mut directive.node;
                    if let Some(renamed) = self.directive_name(directive.name.node.as_str()) {
                        directive.name.node = Name::new(renamed);
                    }
                    self.rename_input_values(&mut directive.arguments);
                }
                TypeSystemDefinition::Type(ty) => {
                    let ty = &mut ty.node;
                    let original = ty.name.node.to_string();
                    if let Some(renamed) = self.type_name(&original) {
                        debug!(from = %original, to = %renamed, "namespacing type");
                        ty.name.node = Name::new(renamed);
                    }
                    self.rename_directives(&mut ty.directives);
                    self.rename_kind(&original, &mut ty.kind);
                }
            }
        }
    }

    fn rename_kind(&self, type_name: &str, kind: &mut TypeKind) {
        let rename = |name: &str| self.type_name(name);
        match kind {
            TypeKind::Scalar => {}
            TypeKind::Object(object) => {
                self.rename_names(&mut object.implements);
            }
            TypeKind::Interface(interface) => {
                self.rename_names(&mut interface.implements);
            }
            TypeKind::Union(union) => self.rename_names(&mut union.members),
            TypeKind::Enum(enumeration) => {
                for value in &mut enumeration.values {
                    self.rename_directives(&mut value.node.directives);
                }
            }
            TypeKind::InputObject(input) => self.rename_input_values(&mut input.fields),
        }

        if let Some(fields) = sdl::field_definitions_mut(kind) {
            for field in fields {
                let field = &mut field.node;
                if let Some(renamed) = self.root_field(type_name, field.name.node.as_str()) {
                    field.name.node = Name::new(renamed);
                }
                sdl::rename_named_type(&mut field.ty.node, &rename);
                self.rename_input_values(&mut field.arguments);
                self.rename_directives(&mut field.directives);
            }
        }
    }

    fn rename_names(&self, names: &mut [Positioned<Name>]) {
        for name in names {
            if let Some(renamed) = self.type_name(name.node.as_str()) {
                name.node = Name::new(renamed);
            }
        }
    }

    fn rename_input_values(&self, values: &mut [Positioned<InputValueDefinition>]) {
        let rename = |name: &str| self.type_name(name);
        for value in values {
            sdl::rename_named_type(&mut value.node.ty.node, &rename);
            self.rename_directives(&mut value.node.directives);
        }
    }

    fn rename_directives(&self, directives: &mut [Positioned<ConstDirective>]) {
        for directive in directives {
            if let Some(renamed) = self.directive_name(directive.node.name.node.as_str()) {
                directive.node.name.node = Name::new(renamed);
            }
        }
    }

    fn rename_type_fields(&self, nodes: &mut [TypeField]) {
        for node in nodes {
            let original = node.type_name.clone();
            for field_name in &mut node.field_names {
                if let Some(renamed) = self.root_field(&original, field_name) {
                    *field_name = renamed;
                }
            }
            node.type_name = self.type_name_or_same(&original);
        }
    }
}

/// Namespace an SDL document. An empty namespace only canonicalizes.
pub fn namespace_sdl(sdl: &str, namespace: &str, skip: &[String]) -> Result<String> {
    let mut document = sdl::parse(sdl)?;
    if !namespace.is_empty() {
        Renamer::new(&document, namespace, skip).rename_document(&mut document);
    }
    Ok(sdl::print_document(&document))
}

/// Namespace an API's schema together with all of its routing metadata.
pub fn namespace_api(api: &Api, namespace: &str, skip: &[String]) -> Result<Api> {
    let mut document = sdl::parse(&api.schema)?;
    if namespace.is_empty() {
        return Ok(Api {
            schema: sdl::print_document(&document),
            ..api.clone()
        });
    }

    let renamer = Renamer::new(&document, namespace, skip);
    renamer.rename_document(&mut document);

    let mut data_sources = api.data_sources.clone();
    for data_source in &mut data_sources {
        renamer.rename_type_fields(&mut data_source.root_nodes);
        renamer.rename_type_fields(&mut data_source.child_nodes);
        data_source
            .custom
            .rename_types(&|name: &str| renamer.type_name_or_same(name));
        data_source.custom.rename_root_fields(&|type_name: &str, field_name: &str| {
            renamer
                .root_field(type_name, field_name)
                .unwrap_or_else(|| field_name.to_string())
        });
        for directive in &renamer.directives {
            let configuration = DirectiveConfiguration {
                directive_name: renamer.prefixed(directive),
                rename_to: directive.clone(),
            };
            if !data_source.directives.contains(&configuration) {
                data_source.directives.push(configuration);
            }
        }
        data_source.directives.sort_by(|a, b| a.directive_name.cmp(&b.directive_name));
    }

    let mut fields = api.fields.clone();
    for data_source in &api.data_sources {
        for node in &data_source.root_nodes {
            for field_name in &node.field_names {
                if renamer.root_field(&node.type_name, field_name).is_some() {
                    fields.entry(&node.type_name, field_name);
                }
            }
        }
    }
    let fields = fields
        .into_iter()
        .map(|mut field| {
            if let Some(renamed) = renamer.root_field(&field.type_name, &field.field_name) {
                if !field.disable_default_field_mapping && field.path.is_empty() {
                    field.path = vec![field.field_name.clone()];
                }
                field.field_name = renamed;
            }
            field.type_name = renamer.type_name_or_same(&field.type_name);
            field
        })
        .collect();

    let mut types: Vec<TypeConfiguration> = api
        .types
        .iter()
        .map(|ty| TypeConfiguration {
            type_name: renamer.type_name_or_same(&ty.type_name),
            rename_to: ty.rename_to.clone(),
        })
        .collect();
    for definition in &document.definitions {
        if let TypeSystemDefinition::Type(ty) = definition {
            let name = ty.node.name.node.as_str();
            if let Some(original) = name.strip_prefix(&format!("{namespace}_")) {
                if renamer.types.contains(original) && !types.iter().any(|t| t.type_name == name) {
                    types.push(TypeConfiguration {
                        type_name: name.to_string(),
                        rename_to: original.to_string(),
                    });
                }
            }
        }
    }

    Ok(Api {
        schema: sdl::print_document(&document),
        namespace: namespace.to_string(),
        data_sources,
        fields,
        types,
        interpolate_variable_definition_as_json: api
            .interpolate_variable_definition_as_json
            .iter()
            .map(|name| renamer.type_name_or_same(name))
            .collect(),
        custom_json_scalars: api
            .custom_json_scalars
            .iter()
            .map(|name| renamer.type_name_or_same(name))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        contains_type_field, DataSource, DataSourceCustom, FieldConfiguration, FieldConfigurations,
        GrpcCustom, GrpcMethodBinding, StatusCodeTypeMapping, RestCustom,
    };
    use pretty_assertions::assert_eq;

    const SDL: &str = r#"
        type Query { me: User, internal: Boolean, search(filter: Filter): [Search!]! }
        type User implements Node @custom { id: ID!, role: Role, meta: JSON }
        interface Node { id: ID! }
        enum Role { ADMIN }
        union Search = User
        input Filter { role: Role = ADMIN }
        scalar JSON
        directive @custom on OBJECT
    "#;

    #[test]
    fn renames_definitions_and_references() {
        let namespaced = namespace_sdl(SDL, "accounts", &["internal".to_string()]).unwrap();
        assert_eq!(
            namespaced,
            "type Query {\n  accounts_me: accounts_User\n  internal: Boolean\n  \
             accounts_search(filter: accounts_Filter): [accounts_Search!]!\n}\n\n\
             type accounts_User implements accounts_Node @accounts_custom {\n  id: ID!\n  role: accounts_Role\n  meta: JSON\n}\n\n\
             interface accounts_Node {\n  id: ID!\n}\n\n\
             enum accounts_Role {\n  ADMIN\n}\n\n\
             union accounts_Search = accounts_User\n\n\
             input accounts_Filter {\n  role: accounts_Role = ADMIN\n}\n\n\
             scalar JSON\n\n\
             directive @accounts_custom on OBJECT\n"
        );
    }

    #[test]
    fn empty_namespace_only_canonicalizes() {
        assert_eq!(
            namespace_sdl(SDL, "", &[]).unwrap(),
            sdl::canonicalize(SDL).unwrap()
        );
    }

    #[test]
    fn custom_root_types_keep_their_names() {
        let namespaced = namespace_sdl(
            "schema { query: Root } type Root { a: Int } type Query { b: Int }",
            "ns",
            &[],
        )
        .unwrap();
        assert!(namespaced.contains("type Root {\n  ns_a: Int\n}"));
        assert!(namespaced.contains("type ns_Query {\n  b: Int\n}"));
    }

    fn sample_api() -> Api {
        let mut graphql = DataSource::new(
            "accounts",
            DataSourceCustom::Rest(RestCustom {
                status_code_type_mappings: vec![StatusCodeTypeMapping {
                    status_code: 200,
                    type_name: "User".into(),
                    inject_status_code_into_body: false,
                }],
                ..Default::default()
            }),
        );
        graphql.root_nodes.push(TypeField {
            type_name: "Query".into(),
            field_names: vec!["me".into(), "internal".into()],
        });
        graphql.child_nodes.push(TypeField {
            type_name: "User".into(),
            field_names: vec!["id".into(), "role".into()],
        });

        let mut grpc = DataSource::new(
            "accounts-grpc",
            DataSourceCustom::Grpc(GrpcCustom {
                endpoint: "http://accounts:50051".into(),
                protoset: String::new(),
                bindings: vec![GrpcMethodBinding {
                    type_name: "Query".into(),
                    field_name: "search".into(),
                    path: "/accounts.Accounts/Search".into(),
                    server_streaming: false,
                }],
            }),
        );
        grpc.root_nodes.push(TypeField {
            type_name: "Query".into(),
            field_names: vec!["search".into()],
        });

        let mut search = FieldConfiguration::new("Query", "search");
        search.disable_default_field_mapping = true;
        let mut fields: FieldConfigurations = vec![search].into_iter().collect();
        fields.entry("User", "meta").unescape_response_json = true;

        Api {
            schema: SDL.to_string(),
            data_sources: vec![graphql, grpc],
            fields,
            interpolate_variable_definition_as_json: vec!["Filter".into()],
            custom_json_scalars: vec!["JSON".into()],
            ..Default::default()
        }
    }

    #[test]
    fn routing_metadata_follows_the_schema() {
        let api = namespace_api(&sample_api(), "accounts", &["internal".to_string()]).unwrap();
        assert_eq!(api.namespace, "accounts");

        let accounts = &api.data_sources[0];
        assert!(contains_type_field(&accounts.root_nodes, "Query", "accounts_me"));
        assert!(contains_type_field(&accounts.root_nodes, "Query", "internal"));
        assert!(contains_type_field(&accounts.child_nodes, "accounts_User", "role"));
        let DataSourceCustom::Rest(rest) = &accounts.custom else {
            panic!("expected REST payload");
        };
        assert_eq!(rest.status_code_type_mappings[0].type_name, "accounts_User");
        assert_eq!(
            accounts.directives,
            vec![DirectiveConfiguration {
                directive_name: "accounts_custom".into(),
                rename_to: "custom".into(),
            }]
        );

        let DataSourceCustom::Grpc(grpc) = &api.data_sources[1].custom else {
            panic!("expected gRPC payload");
        };
        assert_eq!(grpc.bindings[0].field_name, "accounts_search");

        let me = api.fields.get("Query", "accounts_me").unwrap();
        assert_eq!(me.path, vec!["me"]);
        let search = api.fields.get("Query", "accounts_search").unwrap();
        assert!(search.path.is_empty());
        assert!(api.fields.get("Query", "internal").is_none());
        assert!(api.fields.get("accounts_User", "meta").unwrap().unescape_response_json);

        let renames: Vec<_> = api
            .types
            .iter()
            .map(|t| (t.type_name.as_str(), t.rename_to.as_str()))
            .collect();
        assert_eq!(
            renames,
            vec![
                ("accounts_User", "User"),
                ("accounts_Node", "Node"),
                ("accounts_Role", "Role"),
                ("accounts_Search", "Search"),
                ("accounts_Filter", "Filter"),
            ]
        );
        assert_eq!(api.interpolate_variable_definition_as_json, vec!["accounts_Filter"]);
        assert_eq!(api.custom_json_scalars, vec!["JSON"]);
    }

    #[test]
    fn empty_namespace_keeps_metadata() {
        let original = sample_api();
        let api = namespace_api(&original, "", &[]).unwrap();
        assert_eq!(api.data_sources, original.data_sources);
        assert_eq!(api.fields, original.fields);
        assert_eq!(api.schema, sdl::canonicalize(SDL).unwrap());
    }
}
