//! Key-value store upstreams.
//!
//! A bucket is exposed through a fixed set of operations over entries whose
//! value shape is given as a JSON schema. Every operation gets its own data
//! source so the engine can route it independently.

use crate::classifier;
use crate::error::{Error, Result};
use crate::jsonschema::{JsonSchema, Mode, TypeRegistry, Wrapper};
use crate::sdl::ast::{self, FieldDefinition, ServiceDocument};
use crate::sdl::{self, Positioned};
use crate::types::{
    Api, DataSource, DataSourceCustom, FieldConfigurations, NatsKvCustom, NatsKvOperation,
    TypeField,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const ENTRY_TYPE: &str = "KeyValueEntry";

fn default_history() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvOptions {
    pub server_url: String,
    #[serde(default)]
    pub token: String,
    pub bucket: String,
    /// Revisions kept per key
    #[serde(default = "default_history")]
    pub history: u32,
    /// JSON schema of the stored value
    pub schema: Value,
}

struct OperationSpec {
    operation: NatsKvOperation,
    root: &'static str,
    field_name: &'static str,
    with_key: bool,
    with_value: bool,
    ty: ast::Type,
}

impl OperationSpec {
    fn new(operation: NatsKvOperation, root: &'static str, field_name: &'static str, ty: ast::Type) -> Self {
        Self {
            operation,
            root,
            field_name,
            with_key: false,
            with_value: false,
            ty,
        }
    }

    fn keyed(mut self) -> Self {
        self.with_key = true;
        self
    }

    fn valued(mut self) -> Self {
        self.with_value = true;
        self
    }
}

pub fn translate(id: &str, options: &KvOptions) -> Result<Api> {
    if options.bucket.is_empty() {
        return Err(Error::translation(id, "key-value upstream has no bucket name"));
    }
    if options.server_url.is_empty() {
        return Err(Error::translation(id, "key-value upstream has no server URL"));
    }

    let value_schema = JsonSchema::from_value(&options.schema);
    let components = IndexMap::new();
    let mut registry = TypeRegistry::new(&components, &[]);
    let value_type = registry.field_type(&value_schema, "Value", Mode::Output, vec![Wrapper::NonNull]);
    let input_type = registry.field_type(&value_schema, "Value", Mode::Input, vec![Wrapper::NonNull]);
    let output = registry.finish();

    let entry = || sdl::named(ENTRY_TYPE);
    let string_list = sdl::non_null(sdl::list(sdl::non_null(sdl::named("String"))));
    let operations = [
        OperationSpec::new(NatsKvOperation::Get, "Query", "get", entry()).keyed(),
        OperationSpec::new(
            NatsKvOperation::History,
            "Query",
            "history",
            sdl::non_null(sdl::list(sdl::non_null(entry()))),
        )
        .keyed(),
        OperationSpec::new(NatsKvOperation::Keys, "Query", "keys", string_list),
        OperationSpec::new(NatsKvOperation::Put, "Mutation", "put", entry()).keyed().valued(),
        OperationSpec::new(NatsKvOperation::Create, "Mutation", "create", entry()).keyed().valued(),
        OperationSpec::new(
            NatsKvOperation::Delete,
            "Mutation",
            "delete",
            sdl::non_null(sdl::named("Boolean")),
        )
        .keyed(),
        OperationSpec::new(NatsKvOperation::Watch, "Subscription", "watch", entry()).keyed(),
        OperationSpec::new(NatsKvOperation::WatchAll, "Subscription", "watchAll", entry()),
    ];

    let schema_text = serde_json::to_string(&options.schema)?;
    let mut roots: IndexMap<&str, Vec<Positioned<FieldDefinition>>> = IndexMap::new();
    let mut data_sources = Vec::new();
    let mut fields = FieldConfigurations::new();

    for spec in operations {
        let mut arguments = Vec::new();
        if spec.with_key {
            arguments.push(sdl::input_value("key", sdl::non_null(sdl::named("String"))));
        }
        if spec.with_value {
            arguments.push(sdl::input_value("value", input_type.ty.clone()));
        }
        roots
            .entry(spec.root)
            .or_default()
            .push(sdl::field(spec.field_name, spec.ty, arguments));
        fields
            .entry(spec.root, spec.field_name)
            .disable_default_field_mapping = true;

        let custom = NatsKvCustom {
            server_url: options.server_url.clone(),
            token: options.token.clone(),
            bucket_name: options.bucket.clone(),
            history: options.history,
            operation: spec.operation,
            schema: schema_text.clone(),
        };
        let mut data_source = DataSource::new(
            format!("{id}-{}", spec.field_name),
            DataSourceCustom::NatsKv(custom),
        );
        data_source.root_nodes.push(TypeField {
            type_name: spec.root.to_string(),
            field_names: vec![spec.field_name.to_string()],
        });
        data_sources.push(data_source);
    }

    let mut definitions: Vec<_> = roots
        .into_iter()
        .map(|(root, root_fields)| sdl::object_type(root, root_fields))
        .collect();
    definitions.push(sdl::object_type(
        ENTRY_TYPE,
        vec![
            sdl::field("key", sdl::non_null(sdl::named("String")), Vec::new()),
            sdl::field("value", value_type.ty.clone(), Vec::new()),
            sdl::field("revision", sdl::non_null(sdl::named("Int")), Vec::new()),
            sdl::field("created", sdl::non_null(sdl::named("String")), Vec::new()),
        ],
    ));
    if value_type.json {
        fields.entry(ENTRY_TYPE, "value").unescape_response_json = true;
    }
    definitions.extend(output.definitions);

    let document = ServiceDocument { definitions };
    let schema = sdl::print_document(&document);
    let classification = classifier::classify(&document, None, &output.custom_json_scalars);
    for data_source in &mut data_sources {
        data_source.child_nodes = classification.child_nodes.clone();
    }
    fields.extend(output.fields);
    fields.extend(classification.fields);

    info!(upstream = id, bucket = %options.bucket, "translated key-value bucket");

    Ok(Api {
        schema,
        data_sources,
        fields,
        custom_json_scalars: output.custom_json_scalars,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{contains_type_field, DataSourceKind};
    use serde_json::json;

    fn options(schema: Value) -> KvOptions {
        KvOptions {
            server_url: "nats://localhost:4222".into(),
            token: String::new(),
            bucket: "profiles".into(),
            history: 5,
            schema,
        }
    }

    #[test]
    fn synthesizes_bucket_operations() {
        let api = translate(
            "profiles",
            &options(json!({
                "type": "object",
                "required": ["name"],
                "properties": { "name": { "type": "string" }, "age": { "type": "integer" } }
            })),
        )
        .unwrap();

        assert!(api.schema.starts_with(
            "type Query {\n  get(key: String!): KeyValueEntry\n  history(key: String!): [KeyValueEntry!]!\n  keys: [String!]!\n}\n\n\
             type Mutation {\n  put(key: String!, value: ValueInput!): KeyValueEntry\n  \
             create(key: String!, value: ValueInput!): KeyValueEntry\n  delete(key: String!): Boolean!\n}\n\n\
             type Subscription {\n  watch(key: String!): KeyValueEntry\n  watchAll: KeyValueEntry\n}\n"
        ), "{}", api.schema);
        assert!(api.schema.contains("type KeyValueEntry {\n  key: String!\n  value: Value!\n  revision: Int!\n  created: String!\n}"));
        assert!(api.schema.contains("type Value {\n  name: String!\n  age: Int\n}"));
        assert!(api.schema.contains("input ValueInput {\n  name: String!\n  age: Int\n}"));

        assert_eq!(api.data_sources.len(), 8);
        let operations: Vec<_> = api
            .data_sources
            .iter()
            .map(|ds| match &ds.custom {
                DataSourceCustom::NatsKv(custom) => custom.operation,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        assert_eq!(operations[0], NatsKvOperation::Get);
        assert_eq!(operations[7], NatsKvOperation::WatchAll);
        assert!(api.data_sources.iter().all(|ds| ds.kind() == DataSourceKind::Natskv));
        assert!(contains_type_field(&api.data_sources[3].root_nodes, "Mutation", "put"));
        assert!(contains_type_field(&api.data_sources[0].child_nodes, "KeyValueEntry", "value"));
    }

    #[test]
    fn free_form_values_are_json() {
        let api = translate("profiles", &options(json!({}))).unwrap();
        assert!(api.schema.contains("  value: JSON!\n"));
        assert!(api.schema.contains("put(key: String!, value: JSON!): KeyValueEntry"));
        assert!(api.fields.get(ENTRY_TYPE, "value").unwrap().unescape_response_json);
    }

    #[test]
    fn bucket_is_required() {
        let mut options = options(json!({}));
        options.bucket.clear();
        assert_eq!(translate("kv", &options).unwrap_err().code(), "TRANSLATION_ERROR");
    }
}
