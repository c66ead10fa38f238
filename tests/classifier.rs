use graphql_gateway_compiler::classify_sdl;
use graphql_gateway_compiler::federation::{self, FederationConfig};
use graphql_gateway_compiler::sdl::{self, ast::TypeKind, ast::TypeSystemDefinition};
use std::path::PathBuf;

const SUBGRAPHS: &[&str] = &["accounts", "products", "reviews", "inventory"];

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/federation")
        .join(format!("{name}.graphql"));
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn every_field_is_a_root_or_a_child_but_never_both() {
    let plain = "type Query { me: User, users(first: Int): [User] } \
                 type Mutation { signOut: Boolean } \
                 interface Node { id: ID! } \
                 type User implements Node { id: ID!, name: String, friends: [User] }";
    let mut schemas: Vec<String> = SUBGRAPHS.iter().map(|name| fixture(name)).collect();
    schemas.push(plain.to_string());

    for schema in &schemas {
        let classification = classify_sdl(schema, Some(schema), &[]).unwrap();
        let document = sdl::parse(schema).unwrap();
        let entities = FederationConfig::from_document(&document);

        for definition in &document.definitions {
            let TypeSystemDefinition::Type(ty) = definition else {
                continue;
            };
            if !matches!(ty.node.kind, TypeKind::Object(_) | TypeKind::Interface(_)) {
                continue;
            }
            let type_name = ty.node.name.node.as_str();
            let keys = entities.entity(type_name).map(|e| e.key_fields()).unwrap_or_default();

            for field in sdl::field_definitions(&ty.node.kind).into_iter().flatten() {
                let field_name = field.node.name.node.as_str();
                let root = classification.is_root(type_name, field_name);
                let child = classification.is_child(type_name, field_name);
                assert!(!(root && child), "{type_name}.{field_name} is both");

                let external = federation::is_external(&field.node);
                let is_key = keys.iter().any(|k| k == field_name);
                if external && !is_key {
                    assert!(!root && !child, "{type_name}.{field_name} is owned elsewhere");
                } else {
                    assert!(root || child, "{type_name}.{field_name} is unclassified");
                }
            }
        }
    }
}

#[test]
fn extension_fields_require_the_entity_key() {
    let schema = fixture("inventory");
    let classification = classify_sdl(&schema, Some(&schema), &[]).unwrap();
    for field in ["inStock", "shippingEstimate"] {
        assert!(classification.is_root("Product", field));
        let config = classification.fields.get("Product", field).unwrap();
        assert_eq!(config.requires_fields, vec!["upc"]);
    }
    assert!(classification.is_child("Product", "upc"));
}
