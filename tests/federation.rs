use graphql_gateway_compiler::graphql::{api_from_sdl, GraphqlOptions};
use graphql_gateway_compiler::sdl::{self, ast::TypeKind, ast::TypeSystemDefinition};
use graphql_gateway_compiler::types::contains_type_field;
use graphql_gateway_compiler::{merge_apis, Api, Compiler, CompilerConfig, DataSourceKind};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

const SUBGRAPHS: &[&str] = &["accounts", "products", "reviews", "inventory"];

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/federation")
        .join(format!("{name}.graphql"))
}

fn subgraph(name: &str) -> Api {
    let sdl = std::fs::read_to_string(fixture(name)).unwrap();
    let options = GraphqlOptions {
        url: format!("http://{name}:4000/graphql"),
        federation: true,
        ..Default::default()
    };
    api_from_sdl(name, &sdl, Some(&sdl), &options).unwrap()
}

fn field_names(schema: &str, type_name: &str) -> Vec<String> {
    let document = sdl::parse(schema).unwrap();
    document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            TypeSystemDefinition::Type(ty) if ty.node.name.node.as_str() == type_name => {
                match &ty.node.kind {
                    TypeKind::Object(object) => Some(
                        object
                            .fields
                            .iter()
                            .map(|f| f.node.name.node.to_string())
                            .collect(),
                    ),
                    _ => None,
                }
            }
            _ => None,
        })
        .unwrap_or_else(|| panic!("no object type {type_name}"))
}

#[test]
fn four_subgraphs_merge_into_one_product() {
    let apis: Vec<Api> = SUBGRAPHS.iter().map(|name| subgraph(name)).collect();
    let merged = merge_apis(&apis, &[], &[]).unwrap();

    assert_eq!(
        field_names(&merged.schema, "Product"),
        vec![
            "upc",
            "name",
            "price",
            "weight",
            "reviews",
            "inStock",
            "shippingEstimate",
            "_join"
        ]
    );
    assert_eq!(field_names(&merged.schema, "Query"), vec!["me", "topProducts"]);
    assert!(merged
        .schema
        .contains("topProducts(first: Int = 5): [Product]"));
    assert_eq!(
        field_names(&merged.schema, "User"),
        vec!["id", "name", "username", "reviews", "_join"]
    );

    let estimate = merged.fields.get("Product", "shippingEstimate").unwrap();
    assert_eq!(estimate.requires_fields, vec!["upc"]);

    for artifact in ["@key", "@external", "@requires", "@provides", "extend type"] {
        assert!(!merged.schema.contains(artifact), "{artifact} leaked");
    }
}

#[test]
fn entity_fields_are_owned_by_their_subgraphs() {
    let apis: Vec<Api> = SUBGRAPHS.iter().map(|name| subgraph(name)).collect();
    let merged = merge_apis(&apis, &[], &[]).unwrap();
    let source = |id: &str| merged.data_sources.iter().find(|ds| ds.id == id).unwrap();

    let inventory = source("inventory");
    assert!(contains_type_field(&inventory.root_nodes, "Product", "inStock"));
    assert!(contains_type_field(&inventory.root_nodes, "Product", "shippingEstimate"));
    assert!(!contains_type_field(&inventory.root_nodes, "Product", "weight"));
    assert!(contains_type_field(&inventory.child_nodes, "Product", "upc"));

    let products = source("products");
    assert!(contains_type_field(&products.root_nodes, "Query", "topProducts"));
    assert!(contains_type_field(&products.root_nodes, "Product", "name"));

    let reviews = source("reviews");
    assert!(contains_type_field(&reviews.root_nodes, "Product", "reviews"));
    assert!(contains_type_field(&reviews.root_nodes, "User", "reviews"));
    assert!(contains_type_field(&reviews.root_nodes, "Review", "body"));

    assert_eq!(merged.data_sources.last().unwrap().kind(), DataSourceKind::Static);
}

#[tokio::test]
async fn compiles_federated_subgraphs_from_files() {
    let upstreams: String = SUBGRAPHS
        .iter()
        .map(|name| {
            format!(
                "  - id: {name}\n    kind: graphql\n    url: http://{name}:4000/graphql\n    federation: true\n    schema_file: {}\n",
                fixture(name).display()
            )
        })
        .collect();
    let config = CompilerConfig::from_yaml_str(&format!("upstreams:\n{upstreams}")).unwrap();

    let compilation = Compiler::from_config(config)
        .unwrap()
        .compile()
        .await
        .unwrap();
    let engine = &compilation.configuration.engine_configuration;

    let graphql_sources: Vec<_> = engine
        .datasource_configurations
        .iter()
        .filter_map(|ds| ds.custom_graphql.as_ref())
        .collect();
    assert_eq!(graphql_sources.len(), 4);
    assert!(graphql_sources.iter().all(|custom| custom.federation.enabled));
    assert!(graphql_sources[0].federation.service_sdl.contains("type User @key"));

    assert!(engine
        .field_configurations
        .iter()
        .any(|f| f.type_name == "Product"
            && f.field_name == "shippingEstimate"
            && f.requires_fields == vec!["upc"]));
}
