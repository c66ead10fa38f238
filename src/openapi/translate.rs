use super::{warn_unsupported_parameter, OpenApiDocument, Operation, Parameter, ParameterLocation, PathItem};
use crate::classifier;
use crate::error::{Error, Result, UnsupportedConstruct};
use crate::jsonschema::{
    sanitize_field_name, sanitize_type_name, FieldType, Mode, ScalarReplacement, SchemaKind,
    TypeRegistry, Wrapper,
};
use crate::sdl::ast::{FieldDefinition, InputValueDefinition, ServiceDocument, TypeSystemDefinition};
use crate::sdl::{self, Positioned};
use crate::types::{
    Api, ArgumentConfiguration, ArgumentRenderConfiguration, DataSource, DataSourceCustom,
    FetchConfiguration, FieldConfigurations, HttpMethod, QueryParameter, RestCustom,
    RestSubscriptionConfiguration, StatusCodeTypeMapping, TypeField,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

const UNSPECIFIED_RESPONSE: &str = "UnspecifiedHttpResponse";

/// Per-upstream translation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenApiOptions {
    /// Overrides the document's `servers`
    pub base_url: Option<String>,
    /// Static headers sent with every request
    pub headers: BTreeMap<String, Vec<String>>,
    /// Discriminate responses by status code with a union per operation
    pub status_code_unions: bool,
    /// Also expose every GET operation as a polling subscription
    pub subscriptions_polling_interval_ms: Option<u64>,
    pub scalar_replacements: Vec<ScalarReplacement>,
    pub request_timeout_seconds: Option<u64>,
}

/// Translate an OpenAPI document into an [`Api`].
///
/// GET operations become `Query` fields, the other supported verbs become
/// `Mutation` fields. Each operation gets its own REST data source.
pub fn translate(id: &str, document: &OpenApiDocument, options: &OpenApiOptions) -> Result<Api> {
    let base_url = base_url(id, document, options)?;
    let mut registry = TypeRegistry::new(&document.components.schemas, &options.scalar_replacements);
    let mut builder = OperationBuilder {
        id,
        document,
        options,
        base_url,
        query: Vec::new(),
        mutation: Vec::new(),
        subscription: Vec::new(),
        unions: Vec::new(),
        data_sources: Vec::new(),
        fields: FieldConfigurations::new(),
        used_names: HashSet::new(),
        unspecified_response: false,
    };

    for (path, item) in &document.paths {
        for (verb, operation) in item.operations().map_err(|e| e.for_upstream(id))? {
            let method = match HttpMethod::parse(&verb) {
                Some(method) if !matches!(method, HttpMethod::Head | HttpMethod::Options) => method,
                _ => {
                    UnsupportedConstruct::UnsupportedHttpMethod {
                        method: verb.to_ascii_uppercase(),
                    }
                    .warn(path);
                    continue;
                }
            };
            builder.add_operation(&mut registry, path, item, method, &operation);
        }
    }

    let output = registry.finish();
    let OperationBuilder {
        query,
        mutation,
        subscription,
        unions,
        mut data_sources,
        mut fields,
        unspecified_response,
        ..
    } = builder;

    let mut definitions = Vec::new();
    for (root, root_fields) in [("Query", query), ("Mutation", mutation), ("Subscription", subscription)] {
        if !root_fields.is_empty() {
            definitions.push(sdl::object_type(root, root_fields));
        }
    }
    if unspecified_response {
        definitions.push(sdl::object_type(
            UNSPECIFIED_RESPONSE,
            vec![sdl::field("statusCode", sdl::non_null(sdl::named("Int")), Vec::new())],
        ));
    }
    definitions.extend(unions);
    definitions.extend(output.definitions);

    let document = ServiceDocument { definitions };
    let schema = sdl::print_document(&document);
    let classification = classifier::classify(&document, None, &output.custom_json_scalars);

    for data_source in &mut data_sources {
        data_source.child_nodes = classification.child_nodes.clone();
    }
    fields.extend(output.fields);
    fields.extend(classification.fields);

    info!(
        upstream = id,
        operations = data_sources.len(),
        "translated OpenAPI document"
    );

    Ok(Api {
        schema,
        data_sources,
        fields,
        custom_json_scalars: output.custom_json_scalars,
        ..Default::default()
    })
}

fn base_url(id: &str, document: &OpenApiDocument, options: &OpenApiOptions) -> Result<String> {
    if let Some(url) = options.base_url.as_deref().filter(|u| !u.is_empty()) {
        return Ok(url.trim_end_matches('/').to_string());
    }
    let server = document.servers.first().ok_or_else(|| {
        Error::translation(id, "the document has no `servers` entry and no base URL is configured")
    })?;
    let url = server.resolved_url();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::translation(
            id,
            format!("server URL `{url}` is relative; configure a base URL"),
        ))
    }
}

/// Accumulates root fields and data sources across operations.
struct OperationBuilder<'d> {
    id: &'d str,
    document: &'d OpenApiDocument,
    options: &'d OpenApiOptions,
    base_url: String,
    query: Vec<Positioned<FieldDefinition>>,
    mutation: Vec<Positioned<FieldDefinition>>,
    subscription: Vec<Positioned<FieldDefinition>>,
    unions: Vec<TypeSystemDefinition>,
    data_sources: Vec<DataSource>,
    fields: FieldConfigurations,
    used_names: HashSet<(&'static str, String)>,
    unspecified_response: bool,
}

/// Request wiring collected from an operation's parameters and body.
#[derive(Default)]
struct RequestShape {
    arguments: Vec<Positioned<InputValueDefinition>>,
    argument_configurations: Vec<ArgumentConfiguration>,
    path: String,
    query: Vec<QueryParameter>,
    header: BTreeMap<String, Vec<String>>,
    body: Option<String>,
    url_encode_body: bool,
}

impl RequestShape {
    fn add_argument(
        &mut self,
        name: &str,
        field_type: FieldType,
        description: Option<&str>,
    ) -> bool {
        if self.arguments.iter().any(|a| a.node.name.node.as_str() == name) {
            return false;
        }
        self.arguments.push(sdl::with_description(
            sdl::input_value(name, field_type.ty),
            description,
        ));
        true
    }
}

fn template(argument: &str) -> String {
    format!("{{{{ .arguments.{argument} }}}}")
}

impl<'d> OperationBuilder<'d> {
    fn add_operation(
        &mut self,
        registry: &mut TypeRegistry<'d>,
        path: &str,
        item: &PathItem,
        method: HttpMethod,
        operation: &Operation,
    ) {
        let root = if method == HttpMethod::Get { "Query" } else { "Mutation" };
        let field_name = self.field_name(root, path, method, operation);
        let type_prefix = sanitize_type_name(&field_name);
        debug!(root, field = %field_name, path, "translating operation");

        let request = self.request_shape(registry, path, item, operation, &field_name, &type_prefix);
        let response = self.response(registry, operation, &type_prefix);

        let description = operation.summary.as_deref().or(operation.description.as_deref());
        let definition = sdl::with_description(
            sdl::field(&field_name, response.field_type.ty.clone(), request.arguments.clone()),
            description,
        );

        let fetch = FetchConfiguration {
            url: format!("{}{}", self.base_url, request.path),
            base_url: self.base_url.clone(),
            path: request.path.clone(),
            method,
            header: request.header.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            url_encode_body: request.url_encode_body,
        };

        let mut roots = vec![(root, RestSubscriptionConfiguration::default())];
        if let (HttpMethod::Get, Some(interval)) = (method, self.options.subscriptions_polling_interval_ms) {
            if self.used_names.insert(("Subscription", field_name.clone())) {
                roots.push((
                    "Subscription",
                    RestSubscriptionConfiguration {
                        enabled: true,
                        polling_interval_millis: interval,
                        skip_publish_same_response: true,
                    },
                ));
            }
        }

        for (root, subscription) in roots {
            let custom = RestCustom {
                fetch: fetch.clone(),
                subscription,
                status_code_type_mappings: response.mappings.clone(),
                default_type_name: response.default_type_name.clone(),
            };
            let mut data_source = DataSource::new(
                format!("{}-{}-{}", self.id, root.to_ascii_lowercase(), field_name),
                DataSourceCustom::Rest(custom),
            );
            data_source.request_timeout_seconds = self.options.request_timeout_seconds;
            data_source.root_nodes.push(TypeField {
                type_name: root.to_string(),
                field_names: vec![field_name.clone()],
            });
            self.data_sources.push(data_source);

            let configuration = self.fields.entry(root, &field_name);
            configuration.disable_default_field_mapping = true;
            configuration.unescape_response_json |= response.field_type.json;
            for argument in &request.argument_configurations {
                configuration.set_argument(argument.clone());
            }

            let target = match root {
                "Query" => &mut self.query,
                "Mutation" => &mut self.mutation,
                _ => &mut self.subscription,
            };
            target.push(definition.clone());
        }
    }

    /// `operationId` when present, otherwise the verb plus the PascalCased path.
    fn field_name(&mut self, root: &'static str, path: &str, method: HttpMethod, operation: &Operation) -> String {
        let base = match operation.operation_id.as_deref().filter(|id| !id.is_empty()) {
            Some(operation_id) => sanitize_field_name(operation_id),
            None => {
                let path_cased: String = path
                    .split(|c: char| !c.is_ascii_alphanumeric())
                    .filter(|segment| !segment.is_empty())
                    .map(sanitize_type_name)
                    .collect();
                format!("{}{path_cased}", method.as_str().to_ascii_lowercase())
            }
        };

        let mut name = base.clone();
        let mut suffix = 2;
        while !self.used_names.insert((root, name.clone())) {
            name = format!("{base}{suffix}");
            suffix += 1;
        }
        name
    }

    fn request_shape(
        &self,
        registry: &mut TypeRegistry<'d>,
        path: &str,
        item: &PathItem,
        operation: &Operation,
        field_name: &str,
        type_prefix: &str,
    ) -> RequestShape {
        let mut shape = RequestShape {
            path: path.to_string(),
            header: self.options.headers.clone(),
            ..Default::default()
        };
        let context = format!("{} {path}", self.id);

        for parameter in self.parameters(item, operation) {
            if matches!(parameter.location, ParameterLocation::Cookie | ParameterLocation::FormData) {
                warn_unsupported_parameter(parameter, &context);
                continue;
            }

            let argument = sanitize_field_name(&parameter.name);
            let required = parameter.required || parameter.location == ParameterLocation::Path;
            let stack = if required { vec![Wrapper::NonNull] } else { Vec::new() };
            let hint = format!("{type_prefix}{}", sanitize_type_name(&argument));
            let field_type = match &parameter.schema {
                Some(schema) => registry.field_type(schema, &hint, Mode::Input, stack),
                None => FieldType {
                    ty: crate::jsonschema::wrap("String", &stack),
                    json: false,
                },
            };
            let is_array = parameter
                .schema
                .as_ref()
                .is_some_and(|schema| registry.resolve(schema).is_array());
            if !shape.add_argument(&argument, field_type, parameter.description.as_deref()) {
                continue;
            }

            let value = template(&argument);
            match parameter.location {
                ParameterLocation::Path => {
                    shape.path = shape.path.replace(&format!("{{{}}}", parameter.name), &value);
                    if is_array {
                        shape.argument_configurations.push(
                            ArgumentConfiguration::field_argument(&argument)
                                .with_render(ArgumentRenderConfiguration::AsArrayCsv),
                        );
                    }
                }
                ParameterLocation::Query => shape.query.push(QueryParameter {
                    name: parameter.name.clone(),
                    value,
                }),
                ParameterLocation::Header => {
                    shape.header.insert(parameter.name.clone(), vec![value]);
                }
                ParameterLocation::Cookie | ParameterLocation::FormData => {}
            }
        }

        let body = operation
            .request_body
            .as_ref()
            .and_then(|body| body.resolve(&self.document.components));
        if let Some(body) = body {
            if let Some((media_type, schema)) = body
                .media_type()
                .and_then(|(name, media)| media.schema.as_ref().map(|schema| (name, schema)))
            {
                let argument = format!("{field_name}Input");
                let stack = if body.required { vec![Wrapper::NonNull] } else { Vec::new() };
                let field_type = registry.field_type(schema, type_prefix, Mode::Input, stack);
                if shape.add_argument(&argument, field_type, body.description.as_deref()) {
                    shape.body = Some(template(&argument));
                    shape.url_encode_body = media_type == "application/x-www-form-urlencoded";
                }
            }
        }

        shape
    }

    /// Path-level parameters overridden by operation-level ones.
    fn parameters<'p>(&'p self, item: &'p PathItem, operation: &'p Operation) -> Vec<&'p Parameter> {
        let components = &self.document.components;
        let mut parameters: Vec<&Parameter> = Vec::new();
        for parameter in item
            .parameters
            .iter()
            .chain(operation.parameters.iter())
            .filter_map(|p| p.resolve(components))
        {
            match parameters
                .iter_mut()
                .find(|p| p.name == parameter.name && p.location == parameter.location)
            {
                Some(existing) => *existing = parameter,
                None => parameters.push(parameter),
            }
        }
        parameters
    }

    fn response(&mut self, registry: &mut TypeRegistry<'d>, operation: &Operation, type_prefix: &str) -> ResponseShape {
        if self.options.status_code_unions {
            if let Some(shape) = self.status_code_union(registry, operation, type_prefix) {
                return shape;
            }
        }

        let components = &self.document.components;
        let response = ["200", "201"]
            .iter()
            .find_map(|code| operation.responses.get(*code))
            .or_else(|| {
                operation
                    .responses
                    .iter()
                    .find(|(code, _)| code.starts_with('2'))
                    .map(|(_, response)| response)
            })
            .or_else(|| operation.responses.get("default"))
            .and_then(|response| response.resolve(components));

        let field_type = match response.and_then(|r| r.schema()) {
            Some(schema) => registry.field_type(schema, type_prefix, Mode::Output, Vec::new()),
            None => FieldType {
                ty: sdl::named("String"),
                json: false,
            },
        };
        ResponseShape {
            field_type,
            mappings: Vec::new(),
            default_type_name: None,
        }
    }

    fn status_code_union(
        &mut self,
        registry: &mut TypeRegistry<'d>,
        operation: &Operation,
        type_prefix: &str,
    ) -> Option<ResponseShape> {
        let components = &self.document.components;
        let mut members = vec![UNSPECIFIED_RESPONSE.to_string()];
        let mut mappings = Vec::new();

        for (code, response) in &operation.responses {
            let Ok(status_code) = code.parse::<u16>() else {
                continue;
            };
            let Some(schema) = response.resolve(components).and_then(|r| r.schema()) else {
                continue;
            };
            let is_object = match &registry.resolve(schema).kind {
                SchemaKind::Object(object) => !object.properties.is_empty(),
                SchemaKind::AllOf(_) => true,
                _ => false,
            };
            if !is_object {
                UnsupportedConstruct::NonObjectStatusResponse {
                    status_code: code.clone(),
                }
                .warn(type_prefix);
                continue;
            }

            let field_type = registry.field_type(
                schema,
                &format!("{type_prefix}{code}"),
                Mode::Output,
                Vec::new(),
            );
            let type_name = sdl::named_type(&field_type.ty).to_string();
            if !members.contains(&type_name) {
                members.push(type_name.clone());
            }
            mappings.push(StatusCodeTypeMapping {
                status_code,
                type_name,
                inject_status_code_into_body: false,
            });
        }

        if mappings.is_empty() {
            return None;
        }

        let union_name = format!("{type_prefix}Response");
        self.unions.push(sdl::union_type(&union_name, &members));
        self.unspecified_response = true;
        Some(ResponseShape {
            field_type: FieldType {
                ty: sdl::named(&union_name),
                json: false,
            },
            mappings,
            default_type_name: Some(UNSPECIFIED_RESPONSE.to_string()),
        })
    }
}

struct ResponseShape {
    field_type: FieldType,
    mappings: Vec<StatusCodeTypeMapping>,
    default_type_name: Option<String>,
}
