//! Engine configuration protocol
//!
//! The hand-off artifact consumed by the execution engine. Field names and
//! enum values follow the engine's wire schema, so every record here
//! serializes as camelCase JSON.

use crate::error::Result;
use crate::types::{
    Api, DataSource, DataSourceCustom, DataSourceKind, DatabaseCustom, DirectiveConfiguration,
    FieldConfiguration, GraphqlCustom, GrpcCustom, NatsKvCustom, RestCustom, StaticCustom,
    TypeConfiguration, TypeField,
};
use serde::{Deserialize, Serialize};

/// Flush interval handed to the engine for streamed responses, in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: i64 = 500;

/// One published API: where it is served and how the engine resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfiguration {
    pub hosts: Vec<String>,
    pub path_prefix: String,
    pub engine_configuration: EngineConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfiguration {
    pub default_flush_interval: i64,
    pub datasource_configurations: Vec<DataSourceConfiguration>,
    pub field_configurations: Vec<FieldConfiguration>,
    pub graphql_schema: String,
    pub type_configurations: Vec<TypeConfiguration>,
    #[serde(default)]
    pub interpolate_variable_definition_as_json: Vec<String>,
    #[serde(default)]
    pub custom_json_scalars: Vec<String>,
}

/// A data source as the engine sees it: exactly one `custom*` payload is set,
/// matching `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfiguration {
    pub id: String,
    pub kind: DataSourceKind,
    pub root_nodes: Vec<TypeField>,
    pub child_nodes: Vec<TypeField>,
    pub override_field_path_from_alias: bool,
    #[serde(default)]
    pub directives: Vec<DirectiveConfiguration>,
    pub request_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_static: Option<StaticCustom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_rest: Option<RestCustom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_graphql: Option<GraphqlCustom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_database: Option<DatabaseCustom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_grpc: Option<GrpcCustom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_nats_kv: Option<NatsKvCustom>,
}

impl DataSourceConfiguration {
    fn new(data_source: &DataSource, default_timeout_seconds: u64) -> Self {
        let mut configuration = Self {
            id: data_source.id.clone(),
            kind: data_source.kind(),
            root_nodes: data_source.root_nodes.clone(),
            child_nodes: data_source.child_nodes.clone(),
            override_field_path_from_alias: true,
            directives: data_source.directives.clone(),
            request_timeout_seconds: data_source
                .request_timeout_seconds
                .unwrap_or(default_timeout_seconds),
            custom_static: None,
            custom_rest: None,
            custom_graphql: None,
            custom_database: None,
            custom_grpc: None,
            custom_nats_kv: None,
        };
        match &data_source.custom {
            DataSourceCustom::Static(custom) => configuration.custom_static = Some(custom.clone()),
            DataSourceCustom::Rest(custom) => configuration.custom_rest = Some(custom.clone()),
            DataSourceCustom::Graphql(custom) => {
                configuration.custom_graphql = Some(custom.clone())
            }
            DataSourceCustom::Database(custom) => {
                configuration.custom_database = Some(custom.clone())
            }
            DataSourceCustom::Grpc(custom) => configuration.custom_grpc = Some(custom.clone()),
            DataSourceCustom::NatsKv(custom) => {
                configuration.custom_nats_kv = Some(custom.clone())
            }
        }
        configuration
    }
}

impl EngineConfiguration {
    /// Project a merged [`Api`] onto the engine protocol.
    pub fn from_api(api: &Api, default_timeout_seconds: u64) -> Self {
        Self {
            default_flush_interval: DEFAULT_FLUSH_INTERVAL_MS,
            datasource_configurations: api
                .data_sources
                .iter()
                .map(|ds| DataSourceConfiguration::new(ds, default_timeout_seconds))
                .collect(),
            field_configurations: api.fields.iter().cloned().collect(),
            graphql_schema: api.schema.clone(),
            type_configurations: api.types.clone(),
            interpolate_variable_definition_as_json: api
                .interpolate_variable_definition_as_json
                .clone(),
            custom_json_scalars: api.custom_json_scalars.clone(),
        }
    }
}

impl ApiConfiguration {
    pub fn new(
        api: &Api,
        hosts: Vec<String>,
        path_prefix: impl Into<String>,
        default_timeout_seconds: u64,
    ) -> Self {
        Self {
            hosts,
            path_prefix: path_prefix.into(),
            engine_configuration: EngineConfiguration::from_api(api, default_timeout_seconds),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
