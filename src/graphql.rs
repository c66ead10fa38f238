//! Native GraphQL upstreams.
//!
//! An upstream schema arrives as SDL (a local file or a federation
//! `_service { sdl }` fetch) or as a standard introspection result, which is
//! converted to SDL first. Either way it is cleaned of introspection and
//! federation artifacts, classified and bound to a single GraphQL data source.

use crate::classifier;
use crate::error::{Error, Result};
use crate::federation::{self, FEDERATION_ROOT_FIELDS};
use crate::sdl::ast::{ServiceDocument, TypeSystemDefinition};
use crate::sdl::{self, RootTypeNames};
use crate::types::{
    Api, DataSource, DataSourceCustom, FetchConfiguration, GraphqlCustom,
    GraphqlFederationConfiguration, GraphqlSubscriptionConfiguration, HttpMethod,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info};

/// Fetches a federation subgraph's own SDL.
pub const SERVICE_SDL_QUERY: &str = "query ServiceSdl { _service { sdl } }";

/// The standard introspection query.
pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    types { ...FullType }
    directives {
      name
      description
      locations
      isRepeatable
      args { ...InputValue }
    }
  }
}

fragment FullType on __Type {
  kind
  name
  description
  fields(includeDeprecated: true) {
    name
    description
    args { ...InputValue }
    type { ...TypeRef }
    isDeprecated
    deprecationReason
  }
  inputFields { ...InputValue }
  interfaces { ...TypeRef }
  enumValues(includeDeprecated: true) {
    name
    description
    isDeprecated
    deprecationReason
  }
  possibleTypes { ...TypeRef }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType { kind name ofType { kind name } }
          }
        }
      }
    }
  }
}
"#;

/// How a GraphQL upstream is reached and bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphqlOptions {
    pub url: String,
    pub headers: BTreeMap<String, Vec<String>>,
    /// Defaults to `url`
    pub subscription_url: Option<String>,
    pub subscription_use_sse: bool,
    /// The upstream is a federation subgraph
    pub federation: bool,
    /// SDL appended to the upstream schema
    pub schema_extension: Option<String>,
    pub custom_json_scalars: Vec<String>,
}

/// Drop introspection types and federation artifacts, then append `schema_extension`.
pub fn clean_sdl(sdl: &str, schema_extension: Option<&str>) -> Result<String> {
    let mut document = sdl::parse(sdl)?;
    strip_artifacts(&mut document);

    if let Some(extension) = schema_extension.filter(|e| !e.trim().is_empty()) {
        let extension = sdl::parse(extension)?;
        document.definitions.extend(extension.definitions);
    }
    Ok(sdl::print_document(&document))
}

fn strip_artifacts(document: &mut ServiceDocument) {
    document.definitions.retain_mut(|definition| {
        let TypeSystemDefinition::Type(ty) = definition else {
            return true;
        };
        let name = ty.node.name.node.as_str();
        if name.starts_with("__") || federation::is_federation_type(name) {
            debug!(type_name = name, "dropping upstream artifact");
            return false;
        }
        if let Some(fields) = sdl::field_definitions_mut(&mut ty.node.kind) {
            let before = fields.len();
            fields.retain(|f| !FEDERATION_ROOT_FIELDS.contains(&f.node.name.node.as_str()));
            if before > 0 && fields.is_empty() {
                return false;
            }
        }
        true
    });
}

/// Build the [`Api`] for a GraphQL upstream from its SDL.
///
/// `service_sdl` is the subgraph's own federation SDL when the upstream
/// is federated; its annotations decide entity field ownership.
pub fn api_from_sdl(
    id: &str,
    sdl: &str,
    service_sdl: Option<&str>,
    options: &GraphqlOptions,
) -> Result<Api> {
    if options.url.is_empty() {
        return Err(Error::translation(id, "GraphQL upstream has no URL"));
    }
    let schema = clean_sdl(sdl, options.schema_extension.as_deref()).map_err(|e| e.for_upstream(id))?;
    let document = sdl::parse(&schema)?;
    let service = service_sdl
        .map(sdl::parse)
        .transpose()
        .map_err(|e| e.for_upstream(id))?;
    let classification = classifier::classify(&document, service.as_ref(), &options.custom_json_scalars);

    let roots = RootTypeNames::from_document(&document);
    let has_subscriptions = classification
        .root_nodes
        .iter()
        .any(|tf| tf.type_name == roots.subscription);

    let custom = GraphqlCustom {
        fetch: FetchConfiguration {
            url: options.url.clone(),
            base_url: options.url.clone(),
            method: HttpMethod::Post,
            header: options.headers.clone(),
            ..Default::default()
        },
        subscription: GraphqlSubscriptionConfiguration {
            enabled: has_subscriptions,
            url: options
                .subscription_url
                .clone()
                .unwrap_or_else(|| options.url.clone()),
            use_sse: options.subscription_use_sse,
        },
        federation: GraphqlFederationConfiguration {
            enabled: options.federation,
            service_sdl: service_sdl.unwrap_or_default().to_string(),
        },
        upstream_schema: schema.clone(),
    };

    let mut data_source = DataSource::new(id, DataSourceCustom::Graphql(custom));
    data_source.root_nodes = classification.root_nodes;
    data_source.child_nodes = classification.child_nodes;

    info!(
        upstream = id,
        root_types = data_source.root_nodes.len(),
        federation = options.federation,
        "built GraphQL upstream"
    );

    Ok(Api {
        schema,
        data_sources: vec![data_source],
        fields: classification.fields,
        custom_json_scalars: options.custom_json_scalars.clone(),
        ..Default::default()
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    query_type: Option<NamedRef>,
    mutation_type: Option<NamedRef>,
    subscription_type: Option<NamedRef>,
    types: Vec<FullType>,
    #[serde(default)]
    directives: Vec<DirectiveType>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum IntrospectionKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullType {
    kind: IntrospectionKind,
    name: String,
    description: Option<String>,
    fields: Option<Vec<IntrospectionField>>,
    input_fields: Option<Vec<IntrospectionInputValue>>,
    interfaces: Option<Vec<TypeRef>>,
    enum_values: Option<Vec<IntrospectionEnumValue>>,
    possible_types: Option<Vec<TypeRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeRef {
    kind: IntrospectionKind,
    name: Option<String>,
    of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    fn render(&self) -> Option<String> {
        match self.kind {
            IntrospectionKind::NonNull => Some(format!("{}!", self.of_type.as_ref()?.render()?)),
            IntrospectionKind::List => Some(format!("[{}]", self.of_type.as_ref()?.render()?)),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionField {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<IntrospectionInputValue>,
    #[serde(rename = "type")]
    ty: TypeRef,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionInputValue {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: TypeRef,
    default_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionEnumValue {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectiveType {
    name: String,
    description: Option<String>,
    #[serde(default)]
    locations: Vec<String>,
    #[serde(default)]
    args: Vec<IntrospectionInputValue>,
    #[serde(default)]
    is_repeatable: bool,
}

/// Convert an introspection query result into canonical SDL.
///
/// Accepts either the full response (`{"data": {"__schema": ..}}`) or the
/// bare `__schema` payload.
pub fn introspection_to_sdl(response: &Value) -> Result<String> {
    let schema = response
        .pointer("/data/__schema")
        .or_else(|| response.get("__schema"))
        .ok_or_else(|| Error::Schema("introspection response has no `__schema`".into()))?;
    let schema: IntrospectionSchema = serde_json::from_value(schema.clone())?;

    let mut out = String::new();
    let query = schema.query_type.as_ref().map(|t| t.name.as_str());
    let mutation = schema.mutation_type.as_ref().map(|t| t.name.as_str());
    let subscription = schema.subscription_type.as_ref().map(|t| t.name.as_str());
    let default_roots = query.map_or(true, |n| n == "Query")
        && mutation.map_or(true, |n| n == "Mutation")
        && subscription.map_or(true, |n| n == "Subscription");
    if !default_roots {
        out.push_str("schema {\n");
        for (operation, name) in [("query", query), ("mutation", mutation), ("subscription", subscription)] {
            if let Some(name) = name {
                let _ = writeln!(out, "  {operation}: {name}");
            }
        }
        out.push_str("}\n\n");
    }

    for directive in &schema.directives {
        if sdl::BUILT_IN_DIRECTIVES.contains(&directive.name.as_str()) {
            continue;
        }
        write_description(&mut out, directive.description.as_deref(), "");
        let _ = write!(out, "directive @{}", directive.name);
        write_arguments(&mut out, &directive.args);
        if directive.is_repeatable {
            out.push_str(" repeatable");
        }
        let _ = writeln!(out, " on {}\n", directive.locations.join(" | "));
    }

    for ty in &schema.types {
        if ty.name.starts_with("__") || sdl::BUILT_IN_SCALARS.contains(&ty.name.as_str()) {
            continue;
        }
        write_type(&mut out, ty);
    }

    sdl::canonicalize(&out)
}

fn write_type(out: &mut String, ty: &FullType) {
    write_description(out, ty.description.as_deref(), "");
    match ty.kind {
        IntrospectionKind::Scalar => {
            let _ = writeln!(out, "scalar {}\n", ty.name);
        }
        IntrospectionKind::Object | IntrospectionKind::Interface => {
            let keyword = if ty.kind == IntrospectionKind::Object { "type" } else { "interface" };
            let _ = write!(out, "{keyword} {}", ty.name);
            let interfaces: Vec<String> = ty
                .interfaces
                .iter()
                .flatten()
                .filter_map(|i| i.name.clone())
                .collect();
            if !interfaces.is_empty() {
                let _ = write!(out, " implements {}", interfaces.join(" & "));
            }
            out.push_str(" {\n");
            for field in ty.fields.iter().flatten() {
                let Some(field_type) = field.ty.render() else {
                    continue;
                };
                write_description(out, field.description.as_deref(), "  ");
                let _ = write!(out, "  {}", field.name);
                write_arguments(out, &field.args);
                let _ = write!(out, ": {field_type}");
                write_deprecation(out, field.is_deprecated, field.deprecation_reason.as_deref());
                out.push('\n');
            }
            out.push_str("}\n\n");
        }
        IntrospectionKind::Union => {
            let members: Vec<String> = ty
                .possible_types
                .iter()
                .flatten()
                .filter_map(|t| t.name.clone())
                .collect();
            let _ = writeln!(out, "union {} = {}\n", ty.name, members.join(" | "));
        }
        IntrospectionKind::Enum => {
            let _ = writeln!(out, "enum {} {{", ty.name);
            for value in ty.enum_values.iter().flatten() {
                write_description(out, value.description.as_deref(), "  ");
                let _ = write!(out, "  {}", value.name);
                write_deprecation(out, value.is_deprecated, value.deprecation_reason.as_deref());
                out.push('\n');
            }
            out.push_str("}\n\n");
        }
        IntrospectionKind::InputObject => {
            let _ = writeln!(out, "input {} {{", ty.name);
            for field in ty.input_fields.iter().flatten() {
                write_description(out, field.description.as_deref(), "  ");
                out.push_str("  ");
                write_input_value(out, field);
                out.push('\n');
            }
            out.push_str("}\n\n");
        }
        IntrospectionKind::List | IntrospectionKind::NonNull => {}
    }
}

fn write_arguments(out: &mut String, args: &[IntrospectionInputValue]) {
    if args.is_empty() {
        return;
    }
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if let Some(description) = arg.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = write!(out, "{} ", quote(description));
        }
        write_input_value(out, arg);
    }
    out.push(')');
}

fn write_input_value(out: &mut String, value: &IntrospectionInputValue) {
    let ty = value.ty.render().unwrap_or_else(|| "String".to_string());
    let _ = write!(out, "{}: {ty}", value.name);
    if let Some(default) = &value.default_value {
        let _ = write!(out, " = {default}");
    }
}

fn write_description(out: &mut String, description: Option<&str>, indent: &str) {
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "{indent}{}", quote(description));
    }
}

fn write_deprecation(out: &mut String, deprecated: bool, reason: Option<&str>) {
    if !deprecated {
        return;
    }
    match reason {
        Some(reason) => {
            let _ = write!(out, " @deprecated(reason: {})", quote(reason));
        }
        None => out.push_str(" @deprecated"),
    }
}

/// GraphQL string literal; JSON escapes are a subset of GraphQL's.
fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataSourceKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn cleanup_drops_federation_artifacts() {
        let cleaned = clean_sdl(
            r#"
            scalar _Any
            union _Entity = Product
            type _Service { sdl: String }
            type Query {
              _service: _Service!
              _entities(representations: [_Any!]!): [_Entity]!
              topProducts(first: Int = 5): [Product]
            }
            type Product @key(fields: "upc") { upc: String! name: String }
            "#,
            Some("extend type Product { rating: Int }"),
        )
        .unwrap();
        assert_eq!(
            cleaned,
            "type Query {\n  topProducts(first: Int = 5): [Product]\n}\n\n\
             type Product @key(fields: \"upc\") {\n  upc: String!\n  name: String\n}\n\n\
             extend type Product {\n  rating: Int\n}\n"
        );
    }

    #[test]
    fn introspection_results_become_sdl() {
        let response = json!({ "data": { "__schema": {
            "queryType": { "name": "Query" },
            "mutationType": null,
            "subscriptionType": null,
            "directives": [
                { "name": "include", "locations": ["FIELD"], "args": [] }
            ],
            "types": [
                { "kind": "OBJECT", "name": "Query", "description": null,
                  "fields": [
                    { "name": "user", "description": "Look up a user",
                      "args": [
                        { "name": "id", "description": null, "defaultValue": null,
                          "type": { "kind": "NON_NULL", "name": null, "ofType": { "kind": "SCALAR", "name": "ID", "ofType": null } } }
                      ],
                      "type": { "kind": "OBJECT", "name": "User", "ofType": null },
                      "isDeprecated": false, "deprecationReason": null }
                  ],
                  "interfaces": [], "inputFields": null, "enumValues": null, "possibleTypes": null },
                { "kind": "OBJECT", "name": "User", "description": null,
                  "fields": [
                    { "name": "role", "description": null, "args": [],
                      "type": { "kind": "ENUM", "name": "Role", "ofType": null },
                      "isDeprecated": true, "deprecationReason": "use roles" }
                  ],
                  "interfaces": [], "inputFields": null, "enumValues": null, "possibleTypes": null },
                { "kind": "ENUM", "name": "Role", "description": null, "fields": null,
                  "enumValues": [
                    { "name": "ADMIN", "description": null, "isDeprecated": false, "deprecationReason": null }
                  ],
                  "interfaces": null, "inputFields": null, "possibleTypes": null },
                { "kind": "SCALAR", "name": "String", "description": null },
                { "kind": "OBJECT", "name": "__Schema", "description": null, "fields": [] }
            ]
        } } });

        let sdl = introspection_to_sdl(&response).unwrap();
        assert_eq!(
            sdl,
            "type Query {\n  \"Look up a user\"\n  user(id: ID!): User\n}\n\n\
             type User {\n  role: Role @deprecated(reason: \"use roles\")\n}\n\n\
             enum Role {\n  ADMIN\n}\n"
        );
    }

    #[test]
    fn missing_schema_is_an_error() {
        let err = introspection_to_sdl(&json!({ "data": null })).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_ERROR");
    }

    #[test]
    fn builds_a_single_graphql_data_source() {
        let options = GraphqlOptions {
            url: "http://accounts:4001/graphql".into(),
            federation: true,
            ..Default::default()
        };
        let service_sdl = r#"
            extend type Query { me: User }
            type User @key(fields: "id") { id: ID! name: String }
        "#;
        let api = api_from_sdl("accounts", service_sdl, Some(service_sdl), &options).unwrap();

        assert_eq!(api.data_sources.len(), 1);
        let data_source = &api.data_sources[0];
        assert_eq!(data_source.kind(), DataSourceKind::Graphql);
        assert_eq!(data_source.id, "accounts");
        assert!(crate::types::contains_type_field(&data_source.root_nodes, "Query", "me"));
        assert!(crate::types::contains_type_field(&data_source.root_nodes, "User", "name"));

        let DataSourceCustom::Graphql(custom) = &data_source.custom else {
            panic!("expected GraphQL payload");
        };
        assert_eq!(custom.fetch.method, HttpMethod::Post);
        assert!(custom.federation.enabled);
        assert!(!custom.subscription.enabled);
        assert_eq!(custom.upstream_schema, api.schema);
    }

    #[test]
    fn missing_url_is_fatal() {
        let err = api_from_sdl("x", "type Query { a: Int }", None, &GraphqlOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "TRANSLATION_ERROR");
    }
}
