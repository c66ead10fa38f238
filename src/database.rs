//! Database upstreams.
//!
//! The database schema is dumped by an external introspection tool. Its
//! output (a GraphQL SDL plus the tool's own schema text and JSON hints) is
//! classified and bound to one data source of the configured database kind.

use crate::classifier;
use crate::error::{Error, Result};
use crate::sdl;
use crate::types::{Api, DataSource, DatabaseCustom, DatabaseKind, DataSourceCustom, SingleTypeField};
use serde::{Deserialize, Serialize};
use tracing::info;

/// What the external introspection tool produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseIntrospection {
    pub graphql_schema: String,
    /// The tool's native schema, handed to the engine verbatim
    #[serde(default)]
    pub schema: String,
    /// Output fields whose values are JSON documents
    #[serde(default)]
    pub json_type_fields: Vec<SingleTypeField>,
    /// Input types whose variables are passed through as JSON
    #[serde(default)]
    pub json_input_variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    pub database: DatabaseKind,
    pub database_url: String,
}

pub fn translate(
    id: &str,
    introspection: &DatabaseIntrospection,
    options: &DatabaseOptions,
) -> Result<Api> {
    if options.database_url.is_empty() {
        return Err(Error::translation(id, "database upstream has no URL"));
    }
    let document = sdl::parse(&introspection.graphql_schema).map_err(|e| e.for_upstream(id))?;
    let schema = sdl::print_document(&document);
    let classification = classifier::classify(&document, None, &[]);

    let mut fields = classification.fields;
    for json_field in &introspection.json_type_fields {
        fields
            .entry(&json_field.type_name, &json_field.field_name)
            .unescape_response_json = true;
    }

    let custom = DatabaseCustom {
        database: options.database,
        database_url: options.database_url.clone(),
        schema: introspection.schema.clone(),
        graphql_schema: schema.clone(),
        json_type_fields: introspection.json_type_fields.clone(),
        json_input_variables: introspection.json_input_variables.clone(),
    };
    let mut data_source = DataSource::new(id, DataSourceCustom::Database(custom));
    data_source.root_nodes = classification.root_nodes;
    data_source.child_nodes = classification.child_nodes;

    let mut api = Api {
        schema,
        data_sources: vec![data_source],
        fields,
        ..Default::default()
    };
    for variable in &introspection.json_input_variables {
        api.add_interpolate_as_json(variable.as_str());
    }

    info!(upstream = id, database = ?options.database, "bound database upstream");
    Ok(api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{contains_type_field, DataSourceKind};

    fn introspection() -> DatabaseIntrospection {
        serde_json::from_value(serde_json::json!({
            "graphqlSchema": r#"
                scalar Json
                type Query { findManyUser(take: Int): [User!]! }
                type Mutation { createOneUser(data: UserCreateInput!): User }
                type User { id: Int! email: String! meta: Json }
                input UserCreateInput { email: String! meta: Json }
            "#,
            "schema": "model User { id Int @id }",
            "jsonTypeFields": [{ "typeName": "User", "fieldName": "meta" }],
            "jsonInputVariables": ["UserCreateInput"]
        }))
        .unwrap()
    }

    #[test]
    fn binds_one_database_data_source() {
        let options = DatabaseOptions {
            database: DatabaseKind::Postgresql,
            database_url: "postgresql://localhost:5432/app".into(),
        };
        let api = translate("db", &introspection(), &options).unwrap();

        assert_eq!(api.data_sources.len(), 1);
        let data_source = &api.data_sources[0];
        assert_eq!(data_source.kind(), DataSourceKind::Postgresql);
        assert!(contains_type_field(&data_source.root_nodes, "Query", "findManyUser"));
        assert!(contains_type_field(&data_source.root_nodes, "Mutation", "createOneUser"));
        assert!(contains_type_field(&data_source.child_nodes, "User", "email"));

        assert!(api.fields.get("User", "meta").unwrap().unescape_response_json);
        assert_eq!(api.interpolate_variable_definition_as_json, vec!["UserCreateInput"]);
        let take = api.fields.get("Query", "findManyUser").unwrap();
        assert_eq!(take.arguments_configuration[0].name, "take");

        let DataSourceCustom::Database(custom) = &data_source.custom else {
            panic!("expected database payload");
        };
        assert_eq!(custom.schema, "model User { id Int @id }");
        assert_eq!(custom.graphql_schema, api.schema);
    }

    #[test]
    fn unparsable_sdl_names_the_upstream() {
        let options = DatabaseOptions {
            database: DatabaseKind::Mysql,
            database_url: "mysql://localhost".into(),
        };
        let broken = DatabaseIntrospection {
            graphql_schema: "type Query {".into(),
            ..Default::default()
        };
        let err = translate("orders-db", &broken, &options).unwrap_err();
        assert_eq!(err.code(), "TRANSLATION_ERROR");
        assert!(err.to_string().contains("orders-db"));
    }
}
