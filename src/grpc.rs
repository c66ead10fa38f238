//! gRPC upstreams described by a protobuf `FileDescriptorSet`.
//!
//! Unary methods become `Query` fields and server-streaming methods become
//! `Subscription` fields, both named `<Service>_<Method>`. Message and enum
//! types are named after their full protobuf name with `.` replaced by `_`.

use crate::classifier;
use crate::error::{Error, Result, UnsupportedConstruct};
use crate::sdl::ast::{self, ServiceDocument, TypeSystemDefinition};
use crate::sdl::{self, Positioned};
use crate::types::{
    Api, ArgumentConfiguration, DataSource, DataSourceCustom, FieldConfigurations,
    GrpcCustom, GrpcMethodBinding,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use indexmap::IndexMap;
use prost_reflect::{DescriptorPool, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

const JSON_SCALAR: &str = "JSON";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcOptions {
    /// Address the engine dials, e.g. `http://catalog:50051`
    pub endpoint: String,
    /// Restrict translation to these fully-qualified service names
    pub services: Option<Vec<String>>,
}

/// Memoizes GraphQL definitions by protobuf type.
#[derive(Default)]
struct TypeRegistry {
    definitions: IndexMap<String, TypeSystemDefinition>,
    pending: HashSet<String>,
    fields: FieldConfigurations,
    uses_json: bool,
}

impl TypeRegistry {
    fn type_name_for_message(desc: &MessageDescriptor) -> String {
        desc.full_name().replace('.', "_")
    }

    fn type_name_for_enum(desc: &EnumDescriptor) -> String {
        desc.full_name().replace('.', "_")
    }

    fn is_known(&self, name: &str) -> bool {
        self.definitions.contains_key(name) || self.pending.contains(name)
    }

    fn ensure_enum(&mut self, desc: &EnumDescriptor) -> String {
        let name = Self::type_name_for_enum(desc);
        if !self.definitions.contains_key(&name) {
            let values: Vec<String> = desc.values().map(|v| v.name().to_string()).collect();
            self.definitions
                .insert(name.clone(), sdl::enum_type(&name, &values));
        }
        name
    }

    fn ensure_input_object(&mut self, message: &MessageDescriptor) -> String {
        let name = format!("{}Input", Self::type_name_for_message(message));
        if self.is_known(&name) {
            return name;
        }
        self.pending.insert(name.clone());
        debug!(type_name = %name, "defining input type");

        let fields = message
            .fields()
            .map(|field| {
                let ty = self.type_for_field(&name, &field, true);
                sdl::input_value(field.name(), ty)
            })
            .collect();

        self.pending.remove(&name);
        self.definitions
            .insert(name.clone(), sdl::input_object_type(&name, fields));
        name
    }

    fn ensure_object(&mut self, message: &MessageDescriptor) -> String {
        let name = Self::type_name_for_message(message);
        if self.is_known(&name) {
            return name;
        }
        self.pending.insert(name.clone());
        debug!(type_name = %name, "defining object type");

        let fields = message
            .fields()
            .map(|field| {
                let ty = self.type_for_field(&name, &field, false);
                sdl::field(field.name(), ty, Vec::new())
            })
            .collect();

        self.pending.remove(&name);
        self.definitions
            .insert(name.clone(), sdl::object_type(&name, fields));
        name
    }

    /// Object type for a method's response; messages without fields are opaque JSON.
    fn output_type(&mut self, message: &MessageDescriptor) -> String {
        if message.fields().len() == 0 {
            self.uses_json = true;
            JSON_SCALAR.to_string()
        } else {
            self.ensure_object(message)
        }
    }

    fn type_for_field(&mut self, parent: &str, field: &FieldDescriptor, is_input: bool) -> ast::Type {
        if field.is_map() {
            self.uses_json = true;
            if !is_input {
                self.fields
                    .entry(parent, field.name())
                    .unescape_response_json = true;
            }
            return sdl::named(JSON_SCALAR);
        }

        let base = match field.kind() {
            Kind::Bool => "Boolean".to_string(),
            Kind::String | Kind::Bytes => "String".to_string(),
            Kind::Float | Kind::Double => "Float".to_string(),
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 | Kind::Uint32 | Kind::Fixed32 => {
                "Int".to_string()
            }
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 | Kind::Uint64 | Kind::Fixed64 => {
                "String".to_string()
            }
            Kind::Enum(en) => self.ensure_enum(&en),
            Kind::Message(msg) if msg.fields().len() == 0 => {
                self.uses_json = true;
                JSON_SCALAR.to_string()
            }
            Kind::Message(msg) => {
                if is_input {
                    self.ensure_input_object(&msg)
                } else {
                    self.ensure_object(&msg)
                }
            }
        };

        if field.is_list() {
            sdl::list(sdl::non_null(sdl::named(&base)))
        } else {
            sdl::named(&base)
        }
    }
}

/// Translate an encoded `FileDescriptorSet` into an [`Api`] with one gRPC data source.
pub fn translate(id: &str, descriptor_set: &[u8], options: &GrpcOptions) -> Result<Api> {
    let pool = DescriptorPool::decode(descriptor_set).map_err(|e| Error::translation(id, e))?;
    if options.endpoint.is_empty() {
        return Err(Error::translation(id, "gRPC upstream has no endpoint"));
    }

    let mut registry = TypeRegistry::default();
    let mut query: Vec<Positioned<ast::FieldDefinition>> = Vec::new();
    let mut subscription: Vec<Positioned<ast::FieldDefinition>> = Vec::new();
    let mut bindings = Vec::new();

    for service in pool.services() {
        if let Some(allowlist) = options.services.as_ref() {
            if !allowlist.iter().any(|s| s == service.full_name()) {
                continue;
            }
        }

        for method in service.methods() {
            if method.is_client_streaming() {
                UnsupportedConstruct::StreamingMethod {
                    method: method.full_name().to_string(),
                }
                .warn(id);
                continue;
            }

            let root = if method.is_server_streaming() { "Subscription" } else { "Query" };
            let field_name = format!("{}_{}", service.name(), method.name());

            let input = method.input();
            let mut arguments = Vec::new();
            if input.fields().len() > 0 {
                let input_type = registry.ensure_input_object(&input);
                arguments.push(sdl::input_value("input", sdl::non_null(sdl::named(&input_type))));
                registry
                    .fields
                    .entry(root, &field_name)
                    .set_argument(ArgumentConfiguration::field_argument("input"));
            }
            let output_type = registry.output_type(&method.output());
            registry
                .fields
                .entry(root, &field_name)
                .disable_default_field_mapping = true;
            if output_type == JSON_SCALAR {
                registry
                    .fields
                    .entry(root, &field_name)
                    .unescape_response_json = true;
            }

            let definition = sdl::field(&field_name, sdl::named(&output_type), arguments);
            if method.is_server_streaming() {
                subscription.push(definition);
            } else {
                query.push(definition);
            }
            bindings.push(GrpcMethodBinding {
                type_name: root.to_string(),
                field_name,
                path: format!("/{}/{}", service.full_name(), method.name()),
                server_streaming: method.is_server_streaming(),
            });
        }
    }

    if bindings.is_empty() {
        return Err(Error::translation(
            id,
            "descriptor set defines no callable methods",
        ));
    }

    let mut definitions = Vec::new();
    if !query.is_empty() {
        definitions.push(sdl::object_type("Query", query));
    }
    if !subscription.is_empty() {
        definitions.push(sdl::object_type("Subscription", subscription));
    }
    if registry.uses_json {
        definitions.push(sdl::scalar_type(JSON_SCALAR));
    }
    definitions.extend(registry.definitions.into_values());

    let document = ServiceDocument { definitions };
    let schema = sdl::print_document(&document);
    let classification = classifier::classify(&document, None, &[]);

    let custom = GrpcCustom {
        endpoint: options.endpoint.clone(),
        protoset: BASE64.encode(descriptor_set),
        bindings,
    };
    let mut data_source = DataSource::new(id, DataSourceCustom::Grpc(custom));
    data_source.root_nodes = classification.root_nodes;
    data_source.child_nodes = classification.child_nodes;

    let mut fields = registry.fields;
    fields.extend(classification.fields);

    info!(upstream = id, endpoint = %options.endpoint, "translated gRPC descriptor set");

    Ok(Api {
        schema,
        data_sources: vec![data_source],
        fields,
        ..Default::default()
    })
}
