//! OpenAPI documents and their translation to GraphQL.
//!
//! Documents load from JSON or YAML. Swagger 2 documents are rewritten into
//! the OpenAPI 3 shape before they are typed, so the translator only ever
//! sees one dialect.

mod translate;

pub use translate::{translate, OpenApiOptions};

use crate::error::{Result, UnsupportedConstruct};
use crate::jsonschema::JsonSchema;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// HTTP verbs that may appear as path item keys.
const PATH_ITEM_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenApiDocument {
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub paths: IndexMap<String, PathItem>,
    #[serde(default)]
    pub components: Components,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub url: String,
    #[serde(default)]
    pub variables: IndexMap<String, ServerVariable>,
}

impl Server {
    /// Server URL with every `{variable}` replaced by its default.
    pub fn resolved_url(&self) -> String {
        let mut url = self.url.clone();
        for (name, variable) in &self.variables {
            url = url.replace(&format!("{{{name}}}"), &variable.default);
        }
        url
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerVariable {
    #[serde(default)]
    pub default: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(default)]
    pub schemas: IndexMap<String, JsonSchema>,
    #[serde(default)]
    pub parameters: IndexMap<String, Referenced<Parameter>>,
    #[serde(default)]
    pub request_bodies: IndexMap<String, Referenced<RequestBody>>,
    #[serde(default)]
    pub responses: IndexMap<String, Referenced<Response>>,
}

/// Either an inline object or a `$ref` into `components`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Referenced<T> {
    Reference {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Item(T),
}

/// A component section `$ref`s can point into.
pub trait ComponentSection: Sized {
    fn section(components: &Components) -> &IndexMap<String, Referenced<Self>>;
}

impl ComponentSection for Parameter {
    fn section(components: &Components) -> &IndexMap<String, Referenced<Self>> {
        &components.parameters
    }
}

impl ComponentSection for RequestBody {
    fn section(components: &Components) -> &IndexMap<String, Referenced<Self>> {
        &components.request_bodies
    }
}

impl ComponentSection for Response {
    fn section(components: &Components) -> &IndexMap<String, Referenced<Self>> {
        &components.responses
    }
}

impl<T: ComponentSection> Referenced<T> {
    /// Follow references through `components`, giving up after a few hops.
    pub fn resolve<'a>(&'a self, components: &'a Components) -> Option<&'a T> {
        let mut current = self;
        for _ in 0..8 {
            match current {
                Referenced::Item(item) => return Some(item),
                Referenced::Reference { reference } => {
                    let name = reference.rsplit('/').next()?;
                    current = T::section(components).get(name)?;
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathItem {
    #[serde(default)]
    pub parameters: Vec<Referenced<Parameter>>,
    #[serde(flatten)]
    entries: IndexMap<String, Value>,
}

impl PathItem {
    /// Operations keyed by lowercase verb, in document order.
    pub fn operations(&self) -> Result<Vec<(String, Operation)>> {
        let mut operations = Vec::new();
        for (key, value) in &self.entries {
            let verb = key.to_ascii_lowercase();
            if PATH_ITEM_METHODS.contains(&verb.as_str()) {
                operations.push((verb, serde_json::from_value(value.clone())?));
            }
        }
        Ok(operations)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Referenced<Parameter>>,
    pub request_body: Option<Referenced<RequestBody>>,
    #[serde(default)]
    pub responses: IndexMap<String, Referenced<Response>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
    /// Swagger 2 form fields that survived normalization
    FormData,
}

impl ParameterLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Query => "query",
            ParameterLocation::Header => "header",
            ParameterLocation::Cookie => "cookie",
            ParameterLocation::FormData => "formData",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
    pub description: Option<String>,
    pub schema: Option<JsonSchema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    pub description: Option<String>,
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
}

impl Response {
    /// Schema of the JSON body, or of the first declared media type.
    pub fn schema(&self) -> Option<&JsonSchema> {
        json_media_type(&self.content).and_then(|m| m.schema.as_ref())
    }
}

impl RequestBody {
    pub fn media_type(&self) -> Option<(&str, &MediaType)> {
        self.content
            .iter()
            .find(|(name, _)| is_json(name))
            .or_else(|| self.content.first())
            .map(|(name, media)| (name.as_str(), media))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaType {
    pub schema: Option<JsonSchema>,
}

fn is_json(media_type: &str) -> bool {
    media_type.starts_with("application/json") || media_type.ends_with("+json")
}

fn json_media_type(content: &IndexMap<String, MediaType>) -> Option<&MediaType> {
    content
        .iter()
        .find(|(name, _)| is_json(name))
        .or_else(|| content.first())
        .map(|(_, media)| media)
}

impl OpenApiDocument {
    /// Parse a JSON or YAML document, normalizing Swagger 2 on the way.
    pub fn parse(source: &str) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(source)?;
        if value.get("swagger").is_some() {
            normalize_v2(&mut value);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Rewrite a Swagger 2 document into the OpenAPI 3 layout in place.
pub fn normalize_v2(document: &mut Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };

    if let Some(host) = root.get("host").and_then(Value::as_str) {
        let base_path = root.get("basePath").and_then(Value::as_str).unwrap_or("");
        let scheme = root
            .get("schemes")
            .and_then(Value::as_array)
            .and_then(|schemes| {
                schemes
                    .iter()
                    .filter_map(Value::as_str)
                    .find(|s| *s == "https")
                    .or_else(|| schemes.first().and_then(Value::as_str))
            })
            .unwrap_or("https");
        let url = format!("{scheme}://{host}{base_path}");
        root.insert("servers".into(), json!([{ "url": url }]));
    } else if let Some(base_path) = root.get("basePath").and_then(Value::as_str) {
        let url = base_path.to_string();
        root.insert("servers".into(), json!([{ "url": url }]));
    }

    let mut components = Map::new();
    if let Some(definitions) = root.remove("definitions") {
        components.insert("schemas".into(), definitions);
    }
    if let Some(Value::Object(parameters)) = root.remove("parameters") {
        let converted = parameters
            .into_iter()
            .map(|(name, parameter)| (name, convert_v2_parameter(parameter)))
            .collect::<Map<_, _>>();
        components.insert("parameters".into(), Value::Object(converted));
    }
    if let Some(Value::Object(responses)) = root.remove("responses") {
        let converted = responses
            .into_iter()
            .map(|(name, response)| (name, convert_v2_response(response)))
            .collect::<Map<_, _>>();
        components.insert("responses".into(), Value::Object(converted));
    }
    root.insert("components".into(), Value::Object(components));

    let global_consumes = root.get("consumes").cloned();
    if let Some(Value::Object(paths)) = root.get_mut("paths") {
        for item in paths.values_mut() {
            let Some(item) = item.as_object_mut() else {
                continue;
            };
            if let Some(Value::Array(parameters)) = item.remove("parameters") {
                let parameters = parameters.into_iter().map(convert_v2_parameter).collect();
                item.insert("parameters".into(), Value::Array(parameters));
            }
            for (verb, operation) in item.iter_mut() {
                if PATH_ITEM_METHODS.contains(&verb.as_str()) {
                    convert_v2_operation(operation, global_consumes.as_ref());
                }
            }
        }
    }

    rewrite_refs(document);
}

fn convert_v2_operation(operation: &mut Value, global_consumes: Option<&Value>) {
    let Some(operation) = operation.as_object_mut() else {
        return;
    };
    let consumes = operation
        .get("consumes")
        .or(global_consumes)
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(Value::as_str)
        .unwrap_or("application/json")
        .to_string();

    if let Some(Value::Array(parameters)) = operation.remove("parameters") {
        let mut kept = Vec::new();
        let mut form_properties = Map::new();
        let mut form_required = Vec::new();
        for parameter in parameters {
            match parameter.get("in").and_then(Value::as_str) {
                Some("body") => {
                    let schema = parameter.get("schema").cloned().unwrap_or(json!({}));
                    let required = parameter
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    operation.insert(
                        "requestBody".into(),
                        json!({
                            "required": required,
                            "description": parameter.get("description").cloned().unwrap_or(Value::Null),
                            "content": { consumes.clone(): { "schema": schema } }
                        }),
                    );
                }
                Some("formData") => {
                    if let Some(name) = parameter.get("name").and_then(Value::as_str) {
                        if parameter.get("required").and_then(Value::as_bool) == Some(true) {
                            form_required.push(Value::String(name.to_string()));
                        }
                        form_properties.insert(name.to_string(), parameter_schema(&parameter));
                    }
                }
                _ => kept.push(convert_v2_parameter(parameter)),
            }
        }
        if !form_properties.is_empty() {
            operation.insert(
                "requestBody".into(),
                json!({
                    "required": !form_required.is_empty(),
                    "content": { "application/x-www-form-urlencoded": { "schema": {
                        "type": "object",
                        "properties": form_properties,
                        "required": form_required,
                    } } }
                }),
            );
        }
        operation.insert("parameters".into(), Value::Array(kept));
    }

    if let Some(Value::Object(responses)) = operation.get_mut("responses") {
        for response in responses.values_mut() {
            *response = convert_v2_response(response.take());
        }
    }
}

fn convert_v2_parameter(mut parameter: Value) -> Value {
    if parameter.get("$ref").is_some() || parameter.get("schema").is_some() {
        return parameter;
    }
    let schema = parameter_schema(&parameter);
    if let Some(object) = parameter.as_object_mut() {
        for key in ["type", "format", "items", "enum", "collectionFormat", "default"] {
            object.remove(key);
        }
        object.insert("schema".into(), schema);
    }
    parameter
}

/// The inline type keywords of a Swagger 2 parameter as a schema.
fn parameter_schema(parameter: &Value) -> Value {
    let mut schema = Map::new();
    for key in ["type", "format", "items", "enum"] {
        if let Some(value) = parameter.get(key) {
            schema.insert(key.into(), value.clone());
        }
    }
    Value::Object(schema)
}

fn convert_v2_response(mut response: Value) -> Value {
    let Some(object) = response.as_object_mut() else {
        return response;
    };
    if object.contains_key("$ref") {
        return response;
    }
    if let Some(schema) = object.remove("schema") {
        object.insert(
            "content".into(),
            json!({ "application/json": { "schema": schema } }),
        );
    }
    response
}

fn rewrite_refs(value: &mut Value) {
    match value {
        Value::Object(object) => {
            for (key, child) in object.iter_mut() {
                if key == "$ref" {
                    if let Value::String(reference) = child {
                        *reference = reference
                            .replacen("#/definitions/", "#/components/schemas/", 1)
                            .replacen("#/parameters/", "#/components/parameters/", 1)
                            .replacen("#/responses/", "#/components/responses/", 1);
                    }
                } else {
                    rewrite_refs(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}

/// Warn about a parameter the REST engine cannot render.
pub(crate) fn warn_unsupported_parameter(parameter: &Parameter, context: &str) {
    UnsupportedConstruct::UnsupportedParameterLocation {
        name: parameter.name.clone(),
        location: parameter.location.as_str().to_string(),
    }
    .warn(context);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonschema::SchemaKind;

    #[test]
    fn declaration_order_is_kept() {
        let document = OpenApiDocument::parse(
            r#"
openapi: 3.0.0
servers: [{ url: "https://api.example" }]
paths:
  /zoo: { get: { responses: { "200": { description: ok } } } }
  /apes: { get: { responses: { "200": { description: ok } } } }
components:
  schemas:
    Zebra:
      type: object
      properties:
        stripes: { type: integer }
        age: { type: integer }
    Ant: { type: string }
"#,
        )
        .unwrap();
        let paths: Vec<_> = document.paths.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["/zoo", "/apes"]);
        let schemas: Vec<_> = document.components.schemas.keys().map(String::as_str).collect();
        assert_eq!(schemas, vec!["Zebra", "Ant"]);
        let SchemaKind::Object(zebra) = &document.components.schemas["Zebra"].kind else {
            panic!("expected an object schema");
        };
        let properties: Vec<_> = zebra.properties.keys().map(String::as_str).collect();
        assert_eq!(properties, vec!["stripes", "age"]);
    }

    #[test]
    fn swagger_two_is_normalized() {
        let doc = OpenApiDocument::parse(
            r##"
swagger: "2.0"
host: petstore.example.com
basePath: /v1
schemes: [http, https]
paths:
  /pets/{petId}:
    get:
      operationId: getPet
      parameters:
        - name: petId
          in: path
          required: true
          type: integer
      responses:
        200:
          description: ok
          schema:
            $ref: "#/definitions/Pet"
    post:
      parameters:
        - name: petId
          in: path
          required: true
          type: integer
        - name: body
          in: body
          required: true
          schema:
            $ref: "#/definitions/Pet"
      responses:
        201:
          description: created
definitions:
  Pet:
    type: object
    properties:
      name:
        type: string
"##,
        )
        .unwrap();

        assert_eq!(doc.servers[0].url, "https://petstore.example.com/v1");
        assert!(doc.components.schemas.contains_key("Pet"));

        let operations = doc.paths["/pets/{petId}"].operations().unwrap();
        assert_eq!(operations.len(), 2);
        let (verb, get) = &operations[0];
        assert_eq!(verb, "get");
        let Referenced::Item(parameter) = &get.parameters[0] else {
            panic!("expected inline parameter");
        };
        assert_eq!(parameter.location, ParameterLocation::Path);
        assert!(matches!(
            parameter.schema.as_ref().unwrap().kind,
            SchemaKind::Primitive { .. }
        ));
        let response = get.responses["200"].resolve(&doc.components).unwrap();
        assert_eq!(
            response.schema().unwrap().reference(),
            Some("#/components/schemas/Pet")
        );

        let (_, post) = &operations[1];
        assert_eq!(post.parameters.len(), 1);
        let body = post.request_body.as_ref().unwrap().resolve(&doc.components).unwrap();
        assert!(body.required);
        assert!(body.content.contains_key("application/json"));
    }

    #[test]
    fn server_variables_take_defaults() {
        let doc = OpenApiDocument::parse(
            r#"{
              "openapi": "3.0.0",
              "servers": [{ "url": "https://{region}.api.example.com/{version}",
                            "variables": { "region": { "default": "eu" }, "version": { "default": "v2" } } }],
              "paths": {}
            }"#,
        )
        .unwrap();
        assert_eq!(doc.servers[0].resolved_url(), "https://eu.api.example.com/v2");
    }

    #[test]
    fn referenced_parameters_resolve() {
        let doc = OpenApiDocument::parse(
            r##"
openapi: 3.0.0
paths:
  /items:
    get:
      parameters:
        - $ref: "#/components/parameters/Limit"
      responses: {}
components:
  parameters:
    Limit:
      name: limit
      in: query
      schema: { type: integer }
"##,
        )
        .unwrap();
        let operations = doc.paths["/items"].operations().unwrap();
        let parameter = operations[0].1.parameters[0].resolve(&doc.components).unwrap();
        assert_eq!(parameter.name, "limit");
        assert_eq!(parameter.location, ParameterLocation::Query);
    }
}
