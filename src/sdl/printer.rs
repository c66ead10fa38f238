use super::ast::{
    BaseType, ConstDirective, DirectiveDefinition, DirectiveLocation, FieldDefinition,
    InputValueDefinition, SchemaDefinition, ServiceDocument, Type, TypeDefinition, TypeKind,
    TypeSystemDefinition,
};
use super::{ConstValue, Positioned};
use std::fmt::Write;

const INDENT: &str = "  ";

/// Print a document in canonical form: one blank line between definitions,
/// two-space indentation, trailing newline.
pub fn print_document(document: &ServiceDocument) -> String {
    let mut out = String::new();
    for (index, definition) in document.definitions.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        match definition {
            TypeSystemDefinition::Schema(schema) => print_schema(&mut out, &schema.node),
            TypeSystemDefinition::Type(ty) => print_type_definition(&mut out, &ty.node),
            TypeSystemDefinition::Directive(directive) => {
                print_directive_definition(&mut out, &directive.node)
            }
        }
    }
    out
}

pub fn print_type(ty: &Type) -> String {
    let mut out = match &ty.base {
        BaseType::Named(name) => name.to_string(),
        BaseType::List(inner) => format!("[{}]", print_type(inner)),
    };
    if !ty.nullable {
        out.push('!');
    }
    out
}

pub fn print_value(value: &ConstValue) -> String {
    match value {
        ConstValue::Null | ConstValue::Binary(_) => "null".to_string(),
        ConstValue::Number(number) => number.to_string(),
        ConstValue::String(s) => quote(s),
        ConstValue::Boolean(b) => b.to_string(),
        ConstValue::Enum(name) => name.to_string(),
        ConstValue::List(items) => {
            let items: Vec<String> = items.iter().map(print_value).collect();
            format!("[{}]", items.join(", "))
        }
        ConstValue::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{}: {}", name, print_value(value)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn print_description(out: &mut String, description: &Option<Positioned<String>>, indent: &str) {
    let Some(description) = description else {
        return;
    };
    let text = &description.node;
    if text.contains('\n') || text.contains('"') {
        let _ = writeln!(out, "{indent}\"\"\"");
        for line in text.lines() {
            let line = line.replace("\"\"\"", "\\\"\"\"");
            if line.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, "{indent}{line}");
            }
        }
        let _ = writeln!(out, "{indent}\"\"\"");
    } else {
        let _ = writeln!(out, "{indent}{}", quote(text));
    }
}

fn print_directives(out: &mut String, directives: &[Positioned<ConstDirective>]) {
    for directive in directives {
        out.push(' ');
        print_directive(out, &directive.node);
    }
}

fn print_directive(out: &mut String, directive: &ConstDirective) {
    let _ = write!(out, "@{}", directive.name.node);
    if !directive.arguments.is_empty() {
        let arguments: Vec<String> = directive
            .arguments
            .iter()
            .map(|(name, value)| format!("{}: {}", name.node, print_value(&value.node)))
            .collect();
        let _ = write!(out, "({})", arguments.join(", "));
    }
}

fn print_schema(out: &mut String, schema: &SchemaDefinition) {
    if schema.extend {
        out.push_str("extend ");
    }
    out.push_str("schema");
    print_directives(out, &schema.directives);
    let operations = [
        ("query", &schema.query),
        ("mutation", &schema.mutation),
        ("subscription", &schema.subscription),
    ];
    if operations.iter().any(|(_, name)| name.is_some()) {
        out.push_str(" {\n");
        for (operation, name) in operations {
            if let Some(name) = name {
                let _ = writeln!(out, "{INDENT}{operation}: {}", name.node);
            }
        }
        out.push('}');
    }
    out.push('\n');
}

fn print_type_definition(out: &mut String, definition: &TypeDefinition) {
    print_description(out, &definition.description, "");
    if definition.extend {
        out.push_str("extend ");
    }
    let keyword = match &definition.kind {
        TypeKind::Scalar => "scalar",
        TypeKind::Object(_) => "type",
        TypeKind::Interface(_) => "interface",
        TypeKind::Union(_) => "union",
        TypeKind::Enum(_) => "enum",
        TypeKind::InputObject(_) => "input",
    };
    let _ = write!(out, "{keyword} {}", definition.name.node);

    match &definition.kind {
        TypeKind::Scalar => {
            print_directives(out, &definition.directives);
            out.push('\n');
        }
        TypeKind::Object(object) => {
            print_implements(out, &object.implements);
            print_directives(out, &definition.directives);
            print_fields(out, &object.fields);
        }
        TypeKind::Interface(interface) => {
            print_implements(out, &interface.implements);
            print_directives(out, &definition.directives);
            print_fields(out, &interface.fields);
        }
        TypeKind::Union(union) => {
            print_directives(out, &definition.directives);
            if !union.members.is_empty() {
                let members: Vec<String> =
                    union.members.iter().map(|m| m.node.to_string()).collect();
                let _ = write!(out, " = {}", members.join(" | "));
            }
            out.push('\n');
        }
        TypeKind::Enum(enumeration) => {
            print_directives(out, &definition.directives);
            if enumeration.values.is_empty() {
                out.push('\n');
                return;
            }
            out.push_str(" {\n");
            for value in &enumeration.values {
                print_description(out, &value.node.description, INDENT);
                let _ = write!(out, "{INDENT}{}", value.node.value.node);
                print_directives(out, &value.node.directives);
                out.push('\n');
            }
            out.push_str("}\n");
        }
        TypeKind::InputObject(input) => {
            print_directives(out, &definition.directives);
            if input.fields.is_empty() {
                out.push('\n');
                return;
            }
            out.push_str(" {\n");
            for field in &input.fields {
                print_input_value(out, &field.node, INDENT);
                out.push('\n');
            }
            out.push_str("}\n");
        }
    }
}

fn print_implements(out: &mut String, implements: &[Positioned<super::Name>]) {
    if !implements.is_empty() {
        let names: Vec<String> = implements.iter().map(|n| n.node.to_string()).collect();
        let _ = write!(out, " implements {}", names.join(" & "));
    }
}

fn print_fields(out: &mut String, fields: &[Positioned<FieldDefinition>]) {
    if fields.is_empty() {
        out.push('\n');
        return;
    }
    out.push_str(" {\n");
    for field in fields {
        print_field(out, &field.node);
    }
    out.push_str("}\n");
}

fn print_field(out: &mut String, field: &FieldDefinition) {
    print_description(out, &field.description, INDENT);
    let _ = write!(out, "{INDENT}{}", field.name.node);
    print_arguments(out, &field.arguments, INDENT);
    let _ = write!(out, ": {}", print_type(&field.ty.node));
    print_directives(out, &field.directives);
    out.push('\n');
}

fn print_arguments(out: &mut String, arguments: &[Positioned<InputValueDefinition>], indent: &str) {
    if arguments.is_empty() {
        return;
    }
    if arguments.iter().any(|a| a.node.description.is_some()) {
        out.push_str("(\n");
        let nested = format!("{indent}{INDENT}");
        for argument in arguments {
            print_input_value(out, &argument.node, &nested);
            out.push('\n');
        }
        let _ = write!(out, "{indent})");
    } else {
        out.push('(');
        for (index, argument) in arguments.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            print_input_value(out, &argument.node, "");
        }
        out.push(')');
    }
}

fn print_input_value(out: &mut String, value: &InputValueDefinition, indent: &str) {
    print_description(out, &value.description, indent);
    let _ = write!(out, "{indent}{}: {}", value.name.node, print_type(&value.ty.node));
    if let Some(default) = &value.default_value {
        let _ = write!(out, " = {}", print_value(&default.node));
    }
    print_directives(out, &value.directives);
}

fn print_directive_definition(out: &mut String, directive: &DirectiveDefinition) {
    print_description(out, &directive.description, "");
    let _ = write!(out, "directive @{}", directive.name.node);
    print_arguments(out, &directive.arguments, "");
    if directive.is_repeatable {
        out.push_str(" repeatable");
    }
    let locations: Vec<&str> = directive
        .locations
        .iter()
        .map(|l| location_name(&l.node))
        .collect();
    let _ = writeln!(out, " on {}", locations.join(" | "));
}

fn location_name(location: &DirectiveLocation) -> &'static str {
    match location {
        DirectiveLocation::Query => "QUERY",
        DirectiveLocation::Mutation => "MUTATION",
        DirectiveLocation::Subscription => "SUBSCRIPTION",
        DirectiveLocation::Field => "FIELD",
        DirectiveLocation::FragmentDefinition => "FRAGMENT_DEFINITION",
        DirectiveLocation::FragmentSpread => "FRAGMENT_SPREAD",
        DirectiveLocation::InlineFragment => "INLINE_FRAGMENT",
        DirectiveLocation::VariableDefinition => "VARIABLE_DEFINITION",
        DirectiveLocation::Schema => "SCHEMA",
        DirectiveLocation::Scalar => "SCALAR",
        DirectiveLocation::Object => "OBJECT",
        DirectiveLocation::FieldDefinition => "FIELD_DEFINITION",
        DirectiveLocation::ArgumentDefinition => "ARGUMENT_DEFINITION",
        DirectiveLocation::Interface => "INTERFACE",
        DirectiveLocation::Union => "UNION",
        DirectiveLocation::Enum => "ENUM",
        DirectiveLocation::EnumValue => "ENUM_VALUE",
        DirectiveLocation::InputObject => "INPUT_OBJECT",
        DirectiveLocation::InputFieldDefinition => "INPUT_FIELD_DEFINITION",
    }
}

#[cfg(test)]
mod tests {
    use crate::sdl::{canonicalize, parse};
    use pretty_assertions::assert_eq;

    #[test]
    fn prints_canonical_sdl() {
        let sdl = r#"
            schema { query: Query }
            "A product"
            type Product implements Node @key(fields: "upc") { upc: String! name: String @deprecated(reason: "use title")
              reviews(first: Int = 5, order: Order = ASC): [Review!]! }
            interface Node { id: ID! }
            union SearchResult = Product | Review
            enum Order { ASC DESC }
            input Filter { ids: [ID!] limit: Int = 10 }
            scalar JSON
            extend type Query { product(upc: String!): Product }
            directive @export(as: String!) on FIELD | VARIABLE_DEFINITION
        "#;
        let expected = r#"schema {
  query: Query
}

"A product"
type Product implements Node @key(fields: "upc") {
  upc: String!
  name: String @deprecated(reason: "use title")
  reviews(first: Int = 5, order: Order = ASC): [Review!]!
}

interface Node {
  id: ID!
}

union SearchResult = Product | Review

enum Order {
  ASC
  DESC
}

input Filter {
  ids: [ID!]
  limit: Int = 10
}

scalar JSON

extend type Query {
  product(upc: String!): Product
}

directive @export(as: String!) on FIELD | VARIABLE_DEFINITION
"#;
        assert_eq!(canonicalize(sdl).unwrap(), expected);
    }

    #[test]
    fn printing_is_idempotent() {
        let sdl = "\"\"\"\nMulti\nline\n\"\"\"\ntype Query { a(\"doc\" x: Int): String }";
        let once = canonicalize(sdl).unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
        assert!(parse(&once).is_ok());
    }
}
