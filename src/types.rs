//! Type definitions for the compiler's data model
//!
//! These records are produced by the translators, rewritten by the namespacer
//! and folded together by the merger. They serialize with the same camelCase
//! field names the execution engine expects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The unit of translator output and merger input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Api {
    /// GraphQL SDL
    pub schema: String,

    /// Namespace applied to this API, empty when none
    #[serde(default)]
    pub namespace: String,

    pub data_sources: Vec<DataSource>,

    #[serde(default)]
    pub fields: FieldConfigurations,

    #[serde(default)]
    pub types: Vec<TypeConfiguration>,

    /// Type names whose variables are interpolated as raw JSON
    #[serde(default)]
    pub interpolate_variable_definition_as_json: Vec<String>,

    /// Scalars that carry opaque JSON
    #[serde(default)]
    pub custom_json_scalars: Vec<String>,
}

impl Api {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Default::default()
        }
    }

    /// Record a type whose variables must be passed through as JSON.
    pub fn add_interpolate_as_json(&mut self, type_name: impl Into<String>) {
        push_unique(&mut self.interpolate_variable_definition_as_json, type_name.into());
    }

    pub fn add_custom_json_scalar(&mut self, scalar: impl Into<String>) {
        push_unique(&mut self.custom_json_scalars, scalar.into());
    }

    /// All `(typeName, fieldName)` pairs bound as root nodes by any data source.
    pub fn root_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data_sources
            .iter()
            .flat_map(|ds| ds.root_nodes.iter())
            .flat_map(|tf| {
                tf.field_names
                    .iter()
                    .map(move |f| (tf.type_name.as_str(), f.as_str()))
            })
    }
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// A type name plus an ordered set of field names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeField {
    pub type_name: String,
    pub field_names: Vec<String>,
}

impl TypeField {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_names: Vec::new(),
        }
    }
}

/// Add `type_name.field_name` to a root/child node list, keeping field names unique.
pub fn add_type_field(list: &mut Vec<TypeField>, type_name: &str, field_name: &str) {
    match list.iter_mut().find(|tf| tf.type_name == type_name) {
        Some(entry) => push_unique(&mut entry.field_names, field_name.to_string()),
        None => list.push(TypeField {
            type_name: type_name.to_string(),
            field_names: vec![field_name.to_string()],
        }),
    }
}

/// Remove `type_name.field_name` from a node list, dropping emptied entries.
pub fn remove_type_field(list: &mut Vec<TypeField>, type_name: &str, field_name: &str) {
    for entry in list.iter_mut().filter(|tf| tf.type_name == type_name) {
        entry.field_names.retain(|f| f != field_name);
    }
    list.retain(|tf| !tf.field_names.is_empty());
}

pub fn contains_type_field(list: &[TypeField], type_name: &str, field_name: &str) -> bool {
    list.iter()
        .any(|tf| tf.type_name == type_name && tf.field_names.iter().any(|f| f == field_name))
}

/// Where an argument's value comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArgumentSource {
    ObjectField,
    #[default]
    FieldArgument,
}

/// How an argument is rendered into the upstream request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentRenderConfiguration {
    #[default]
    #[serde(rename = "RENDER_ARGUMENT_DEFAULT")]
    Default,
    #[serde(rename = "RENDER_ARGUMENT_AS_GRAPHQL_VALUE")]
    AsGraphqlValue,
    #[serde(rename = "RENDER_ARGUMENT_AS_ARRAY_CSV")]
    AsArrayCsv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentConfiguration {
    pub name: String,
    pub source_type: ArgumentSource,
    #[serde(default)]
    pub source_path: Vec<String>,
    #[serde(default)]
    pub render_configuration: ArgumentRenderConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_type_to: Option<String>,
}

impl ArgumentConfiguration {
    /// A client-supplied argument rendered with the default strategy.
    pub fn field_argument(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: ArgumentSource::FieldArgument,
            source_path: Vec::new(),
            render_configuration: ArgumentRenderConfiguration::Default,
            rename_type_to: None,
        }
    }

    pub fn with_render(mut self, render: ArgumentRenderConfiguration) -> Self {
        self.render_configuration = render;
        self
    }
}

/// Per-field engine metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfiguration {
    pub type_name: String,
    pub field_name: String,
    #[serde(default)]
    pub disable_default_field_mapping: bool,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub arguments_configuration: Vec<ArgumentConfiguration>,
    #[serde(default)]
    pub requires_fields: Vec<String>,
    #[serde(default)]
    pub unescape_response_json: bool,
}

impl FieldConfiguration {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
            ..Default::default()
        }
    }

    /// Insert an argument configuration, replacing one with the same name.
    pub fn set_argument(&mut self, argument: ArgumentConfiguration) {
        match self
            .arguments_configuration
            .iter_mut()
            .find(|a| a.name == argument.name)
        {
            Some(existing) => *existing = argument,
            None => self.arguments_configuration.push(argument),
        }
    }

    pub fn add_requires_fields<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            push_unique(&mut self.requires_fields, field.into());
        }
    }
}

/// Field configurations keyed by `(typeName, fieldName)`, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldConfigurations(Vec<FieldConfiguration>);

impl FieldConfigurations {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&FieldConfiguration> {
        self.0
            .iter()
            .find(|f| f.type_name == type_name && f.field_name == field_name)
    }

    /// Fetch the entry for a field, creating an empty one if needed.
    pub fn entry(&mut self, type_name: &str, field_name: &str) -> &mut FieldConfiguration {
        let index = match self
            .0
            .iter()
            .position(|f| f.type_name == type_name && f.field_name == field_name)
        {
            Some(index) => index,
            None => {
                self.0.push(FieldConfiguration::new(type_name, field_name));
                self.0.len() - 1
            }
        };
        &mut self.0[index]
    }

    /// Fold `incoming` into the set.
    ///
    /// An existing entry keeps its mapping; `requiresFields` are unioned, new
    /// arguments are appended by name, and the JSON flag is sticky.
    pub fn merge(&mut self, incoming: FieldConfiguration) {
        let Some(existing) = self
            .0
            .iter_mut()
            .find(|f| f.type_name == incoming.type_name && f.field_name == incoming.field_name)
        else {
            self.0.push(incoming);
            return;
        };

        existing.add_requires_fields(incoming.requires_fields);
        for argument in incoming.arguments_configuration {
            if !existing
                .arguments_configuration
                .iter()
                .any(|a| a.name == argument.name)
            {
                existing.arguments_configuration.push(argument);
            }
        }
        existing.unescape_response_json |= incoming.unescape_response_json;
        if existing.path.is_empty() && !existing.disable_default_field_mapping {
            existing.path = incoming.path;
            existing.disable_default_field_mapping = incoming.disable_default_field_mapping;
        }
    }

    pub fn extend(&mut self, other: FieldConfigurations) {
        for field in other {
            self.merge(field);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldConfiguration> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for FieldConfigurations {
    type Item = FieldConfiguration;
    type IntoIter = std::vec::IntoIter<FieldConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FieldConfigurations {
    type Item = &'a FieldConfiguration;
    type IntoIter = std::slice::Iter<'a, FieldConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<FieldConfiguration> for FieldConfigurations {
    fn from_iter<T: IntoIterator<Item = FieldConfiguration>>(iter: T) -> Self {
        let mut fields = FieldConfigurations::new();
        for field in iter {
            fields.merge(field);
        }
        fields
    }
}

/// Namespaced type name and the name clients should see.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeConfiguration {
    pub type_name: String,
    pub rename_to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveConfiguration {
    pub directive_name: String,
    pub rename_to: String,
}

/// Kind of a data source, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceKind {
    Static,
    Rest,
    Graphql,
    Postgresql,
    Mysql,
    Sqlserver,
    Mongodb,
    Sqlite,
    Cockroachdb,
    Grpc,
    Natskv,
    Soap,
}

/// Databases reachable through the external introspection tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgresql,
    Mysql,
    Sqlserver,
    Mongodb,
    Sqlite,
    Cockroachdb,
}

impl From<DatabaseKind> for DataSourceKind {
    fn from(kind: DatabaseKind) -> Self {
        match kind {
            DatabaseKind::Postgresql => DataSourceKind::Postgresql,
            DatabaseKind::Mysql => DataSourceKind::Mysql,
            DatabaseKind::Sqlserver => DataSourceKind::Sqlserver,
            DatabaseKind::Mongodb => DataSourceKind::Mongodb,
            DatabaseKind::Sqlite => DataSourceKind::Sqlite,
            DatabaseKind::Cockroachdb => DataSourceKind::Cockroachdb,
        }
    }
}

/// One fetch strategy bound to a set of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    pub root_nodes: Vec<TypeField>,
    pub child_nodes: Vec<TypeField>,
    pub custom: DataSourceCustom,
    #[serde(default)]
    pub directives: Vec<DirectiveConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_seconds: Option<u64>,
}

impl DataSource {
    pub fn new(id: impl Into<String>, custom: DataSourceCustom) -> Self {
        Self {
            id: id.into(),
            root_nodes: Vec::new(),
            child_nodes: Vec::new(),
            custom,
            directives: Vec::new(),
            request_timeout_seconds: None,
        }
    }

    pub fn kind(&self) -> DataSourceKind {
        self.custom.kind()
    }
}

/// Kind-specific payload of a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DataSourceCustom {
    Static(StaticCustom),
    Rest(RestCustom),
    Graphql(GraphqlCustom),
    Database(DatabaseCustom),
    Grpc(GrpcCustom),
    NatsKv(NatsKvCustom),
}

impl DataSourceCustom {
    pub fn kind(&self) -> DataSourceKind {
        match self {
            DataSourceCustom::Static(_) => DataSourceKind::Static,
            DataSourceCustom::Rest(_) => DataSourceKind::Rest,
            DataSourceCustom::Graphql(_) => DataSourceKind::Graphql,
            DataSourceCustom::Database(db) => db.database.into(),
            DataSourceCustom::Grpc(_) => DataSourceKind::Grpc,
            DataSourceCustom::NatsKv(_) => DataSourceKind::Natskv,
        }
    }

    /// Rewrite every type name embedded in the payload.
    pub fn rename_types(&mut self, rename: &dyn Fn(&str) -> String) {
        match self {
            DataSourceCustom::Static(_) => {}
            DataSourceCustom::Rest(rest) => {
                for mapping in &mut rest.status_code_type_mappings {
                    mapping.type_name = rename(&mapping.type_name);
                }
                if let Some(default_type) = rest.default_type_name.as_mut() {
                    *default_type = rename(default_type);
                }
            }
            DataSourceCustom::Graphql(_) => {}
            DataSourceCustom::Database(db) => {
                for field in &mut db.json_type_fields {
                    field.type_name = rename(&field.type_name);
                }
                for variable in &mut db.json_input_variables {
                    *variable = rename(variable);
                }
            }
            DataSourceCustom::Grpc(grpc) => {
                for binding in &mut grpc.bindings {
                    binding.type_name = rename(&binding.type_name);
                }
            }
            DataSourceCustom::NatsKv(_) => {}
        }
    }

    /// Rewrite root field names embedded in the payload.
    pub fn rename_root_fields(&mut self, rename: &dyn Fn(&str, &str) -> String) {
        if let DataSourceCustom::Grpc(grpc) = self {
            for binding in &mut grpc.bindings {
                binding.field_name = rename(&binding.type_name, &binding.field_name);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl HttpMethod {
    pub fn parse(verb: &str) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "post" => Some(HttpMethod::Post),
            "put" => Some(HttpMethod::Put),
            "delete" => Some(HttpMethod::Delete),
            "patch" => Some(HttpMethod::Patch),
            "options" => Some(HttpMethod::Options),
            "head" => Some(HttpMethod::Head),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: String,
}

/// Templated HTTP request shared by REST and GraphQL sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchConfiguration {
    pub url: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub path: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub header: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub query: Vec<QueryParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub url_encode_body: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCodeTypeMapping {
    pub status_code: u16,
    pub type_name: String,
    pub inject_status_code_into_body: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestSubscriptionConfiguration {
    pub enabled: bool,
    pub polling_interval_millis: u64,
    pub skip_publish_same_response: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestCustom {
    pub fetch: FetchConfiguration,
    #[serde(default)]
    pub subscription: RestSubscriptionConfiguration,
    #[serde(default)]
    pub status_code_type_mappings: Vec<StatusCodeTypeMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_type_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlSubscriptionConfiguration {
    pub enabled: bool,
    pub url: String,
    pub use_sse: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlFederationConfiguration {
    pub enabled: bool,
    pub service_sdl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlCustom {
    pub fetch: FetchConfiguration,
    #[serde(default)]
    pub subscription: GraphqlSubscriptionConfiguration,
    #[serde(default)]
    pub federation: GraphqlFederationConfiguration,
    pub upstream_schema: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCustom {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleTypeField {
    pub type_name: String,
    pub field_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCustom {
    pub database: DatabaseKind,
    pub database_url: String,
    pub schema: String,
    pub graphql_schema: String,
    #[serde(default)]
    pub json_type_fields: Vec<SingleTypeField>,
    #[serde(default)]
    pub json_input_variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcMethodBinding {
    pub type_name: String,
    pub field_name: String,
    /// Full gRPC path, `/package.Service/Method`
    pub path: String,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcCustom {
    pub endpoint: String,
    /// Base64-encoded `FileDescriptorSet`
    pub protoset: String,
    #[serde(default)]
    pub bindings: Vec<GrpcMethodBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NatsKvOperation {
    Get,
    History,
    Keys,
    Put,
    Create,
    Delete,
    Watch,
    WatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsKvCustom {
    pub server_url: String,
    #[serde(default)]
    pub token: String,
    pub bucket_name: String,
    pub history: u32,
    pub operation: NatsKvOperation,
    /// JSON schema of the stored value
    pub schema: String,
}
