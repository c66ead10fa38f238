use graphql_gateway_compiler::merge::{JOIN_DATA_SOURCE_ID, JOIN_FIELD};
use graphql_gateway_compiler::openapi::{self, OpenApiDocument, OpenApiOptions};
use graphql_gateway_compiler::sdl::{self, ast::TypeKind, ast::TypeSystemDefinition, RootTypeNames};
use graphql_gateway_compiler::types::contains_type_field;
use graphql_gateway_compiler::{merge_apis, namespace_api, Api, Error};
use std::collections::{HashMap, HashSet, VecDeque};

const PETS: &str = r##"
openapi: 3.0.0
servers:
  - url: https://pets.example/v1
paths:
  /pets:
    get:
      operationId: listPets
      responses:
        "200":
          content:
            application/json:
              schema:
                type: array
                items: { $ref: "#/components/schemas/Pet" }
    post:
      operationId: createPet
      requestBody:
        required: true
        content:
          application/json:
            schema: { $ref: "#/components/schemas/Pet" }
      responses:
        "201":
          content:
            application/json:
              schema: { $ref: "#/components/schemas/Pet" }
  /pets/{petId}:
    get:
      operationId: showPetById
      parameters:
        - { name: petId, in: path, required: true, schema: { type: string } }
      responses:
        "200":
          content:
            application/json:
              schema: { $ref: "#/components/schemas/Pet" }
components:
  schemas:
    Pet:
      type: object
      required: [id, name]
      properties:
        id: { type: integer, format: int64 }
        name: { type: string }
        owner: { $ref: "#/components/schemas/Owner" }
    Owner:
      type: object
      properties:
        name: { type: string }
"##;

fn pets() -> Api {
    let document = OpenApiDocument::parse(PETS).unwrap();
    openapi::translate("pets", &document, &OpenApiOptions::default()).unwrap()
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

/// Object types reachable from the root types by following field types.
fn reachable(schema: &str) -> (HashSet<String>, HashMap<String, bool>) {
    let document = sdl::parse(schema).unwrap();
    let roots = RootTypeNames::from_document(&document);
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut objects = HashMap::new();
    for definition in &document.definitions {
        let TypeSystemDefinition::Type(ty) = definition else {
            continue;
        };
        let name = ty.node.name.node.to_string();
        match &ty.node.kind {
            TypeKind::Object(object) => {
                let has_join = object.fields.iter().any(|f| f.node.name.node.as_str() == JOIN_FIELD);
                objects.insert(name.clone(), has_join);
                edges.insert(
                    name,
                    object
                        .fields
                        .iter()
                        .filter(|f| f.node.name.node.as_str() != JOIN_FIELD)
                        .map(|f| sdl::named_type(&f.node.ty.node).to_string())
                        .collect(),
                );
            }
            TypeKind::Union(union) => {
                edges.insert(name, union.members.iter().map(|m| m.node.to_string()).collect());
            }
            _ => {}
        }
    }

    let mut seen = HashSet::new();
    let mut queue: VecDeque<String> = roots.names().iter().map(|r| r.to_string()).collect();
    while let Some(next) = queue.pop_front() {
        if !seen.insert(next.clone()) {
            continue;
        }
        for target in edges.get(&next).into_iter().flatten() {
            queue.push_back(target.clone());
        }
    }
    (seen, objects)
}

#[test]
fn shared_refs_become_one_type() {
    let api = pets();
    assert_eq!(count(&api.schema, "type Pet {"), 1);
    assert_eq!(count(&api.schema, "input PetInput {"), 1);
    assert_eq!(count(&api.schema, "type Owner {"), 1);
    assert!(api.schema.contains("listPets: [Pet!]"));
    assert!(api.schema.contains("showPetById(petId: String!): Pet"));
}

#[test]
fn every_merged_object_type_is_reachable_or_joined() {
    let accounts = Api::new(
        "type Query { me: Account } type Account { id: ID! } type AuditLog { entries: [String] }",
    );
    let apis = vec![
        namespace_api(&accounts, "accounts", &[]).unwrap(),
        namespace_api(&pets(), "pets", &[]).unwrap(),
    ];
    let merged = merge_apis(&apis, &[], &[]).unwrap();

    let document = sdl::parse(&merged.schema).unwrap();
    let roots = RootTypeNames::from_document(&document);
    let (reachable, objects) = reachable(&merged.schema);
    let join = merged
        .data_sources
        .iter()
        .find(|ds| ds.id == JOIN_DATA_SOURCE_ID)
        .unwrap();

    assert!(objects.contains_key("accounts_AuditLog"));
    for (name, has_join) in &objects {
        if roots.contains(name) {
            assert!(!has_join, "{name} is a root type");
            continue;
        }
        assert!(reachable.contains(name) || *has_join, "{name} is orphaned");
        assert!(*has_join, "{name} lacks {JOIN_FIELD}");
        assert!(contains_type_field(&join.root_nodes, name, JOIN_FIELD));
    }
}

#[test]
fn unnamespaced_duplicates_collide_and_namespaces_resolve_them() {
    let a = Api::new("type Query { a: Foo } type Foo { id: ID!, name: String }");
    let b = Api::new("type Query { b: Foo } type Foo { id: ID!, name: [String] }");

    match merge_apis(&[a.clone(), b.clone()], &[], &[]) {
        Err(Error::SchemaCollision { type_name, .. }) => assert_eq!(type_name, "Foo"),
        other => panic!("expected a collision, got {other:?}"),
    }

    let merged = merge_apis(
        &[
            namespace_api(&a, "first", &[]).unwrap(),
            namespace_api(&b, "second", &[]).unwrap(),
        ],
        &[],
        &[],
    )
    .unwrap();
    assert!(merged.schema.contains("type first_Foo {"));
    assert!(merged.schema.contains("type second_Foo {"));
    let renames: Vec<_> = merged
        .types
        .iter()
        .map(|t| (t.type_name.as_str(), t.rename_to.as_str()))
        .collect();
    assert_eq!(renames, vec![("first_Foo", "Foo"), ("second_Foo", "Foo")]);
}

#[test]
fn identical_types_merge_without_namespaces() {
    let a = Api::new("type Query { a: Money } type Money { amount: Int, currency: String }");
    let b = Api::new("type Query { b: Money } type Money { amount: Int, currency: String }");
    let merged = merge_apis(&[a, b], &[], &[]).unwrap();
    assert_eq!(count(&merged.schema, "type Money {"), 1);
}

#[test]
fn merged_schema_always_carries_the_base_directives() {
    let merged = merge_apis(&[pets()], &["reader".to_string()], &["org".to_string()]).unwrap();
    for directive in [
        "@fromClaim",
        "@rbac",
        "@export",
        "@transform",
        "@injectCurrentDateTime",
        "@injectGeneratedUUID",
        "@injectEnvironmentVariable",
    ] {
        assert!(merged.schema.contains(&format!("directive {directive}")), "{directive}");
    }
    assert!(merged.schema.contains("enum GatewayRole {\n  reader\n}"));
    assert!(merged.schema.contains("  ORG\n}"));
}
