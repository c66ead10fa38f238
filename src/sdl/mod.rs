//! SDL parsing, AST construction helpers and canonical printing.
//!
//! Parsing goes through `async_graphql::parser`; every transform in the crate
//! works on its `ServiceDocument` and prints the result back with
//! [`print_document`], so two schemas compare equal exactly when their
//! canonical printings do.

mod printer;

pub use async_graphql::parser::types as ast;
pub use async_graphql::parser::{Pos, Positioned};
pub use async_graphql::{Name, Value as ConstValue};
pub use printer::{print_document, print_type, print_value};

use crate::error::{Error, Result};
use ast::{
    BaseType, ConstDirective, FieldDefinition, InputValueDefinition, ServiceDocument,
    TypeDefinition, TypeKind, TypeSystemDefinition,
};

pub const BUILT_IN_SCALARS: &[&str] = &["Int", "Float", "String", "Boolean", "ID"];
pub const BUILT_IN_DIRECTIVES: &[&str] = &[
    "skip",
    "include",
    "deprecated",
    "specifiedBy",
    "oneOf",
    "defer",
    "stream",
];

/// Parse an SDL document, reporting the parser's source position on failure.
pub fn parse(sdl: &str) -> Result<ServiceDocument> {
    let mut document = async_graphql::parser::parse_schema(sdl).map_err(|e| {
        let position = e
            .positions()
            .next()
            .map(|pos| format!(" at line {}, column {}", pos.line, pos.column))
            .unwrap_or_default();
        Error::Schema(format!("{e}{position}"))
    })?;
    // The parser flags every directive definition as repeatable.
    for definition in &mut document.definitions {
        if let TypeSystemDefinition::Directive(directive) = definition {
            directive.node.is_repeatable = declares_repeatable(sdl, directive.node.name.pos);
        }
    }
    Ok(document)
}

/// Whether the directive definition named at `name` carries the
/// `repeatable` keyword between its arguments and `on`.
fn declares_repeatable(source: &str, name: Pos) -> bool {
    let Some(start) = byte_offset(source, name) else {
        return false;
    };
    let bytes = source.as_bytes();
    let mut i = start;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    i = skip_ignored(bytes, i);
    if bytes.get(i) == Some(&b'(') {
        let mut depth = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        i += 1;
                        break;
                    }
                }
                b'"' => {
                    i = skip_string(bytes, i);
                    continue;
                }
                b'#' => {
                    i = skip_ignored(bytes, i);
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
        i = skip_ignored(bytes, i);
    }
    let rest = &bytes[i.min(bytes.len())..];
    rest.starts_with(b"repeatable")
        && !rest
            .get("repeatable".len())
            .is_some_and(|b| is_name_byte(*b))
}

fn byte_offset(source: &str, pos: Pos) -> Option<usize> {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(pos.line.checked_sub(1)?)
        .map(str::len)
        .sum();
    source[line_start..]
        .char_indices()
        .nth(pos.column.checked_sub(1)?)
        .map(|(offset, _)| line_start + offset)
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Skip whitespace, commas and comments.
fn skip_ignored(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => i += 1,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    i
}

/// Index just past the string or block string starting at `i`.
fn skip_string(bytes: &[u8], i: usize) -> usize {
    if bytes[i..].starts_with(b"\"\"\"") {
        let mut j = i + 3;
        while j < bytes.len() {
            if bytes[j] == b'\\' && bytes[j + 1..].starts_with(b"\"\"\"") {
                j += 4;
            } else if bytes[j..].starts_with(b"\"\"\"") {
                return j + 3;
            } else {
                j += 1;
            }
        }
        return j;
    }
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'"' => return j + 1,
            _ => j += 1,
        }
    }
    j
}

/// Parse and re-print an SDL document.
pub fn canonicalize(sdl: &str) -> Result<String> {
    Ok(print_document(&parse(sdl)?))
}

pub fn positioned<T>(node: T) -> Positioned<T> {
    Positioned::new(node, Pos::default())
}

pub fn name(value: &str) -> Positioned<Name> {
    positioned(Name::new(value))
}

/// Nullable reference to a named type.
pub fn named(type_name: &str) -> ast::Type {
    ast::Type {
        base: BaseType::Named(Name::new(type_name)),
        nullable: true,
    }
}

pub fn non_null(mut ty: ast::Type) -> ast::Type {
    ty.nullable = false;
    ty
}

pub fn list(ty: ast::Type) -> ast::Type {
    ast::Type {
        base: BaseType::List(Box::new(ty)),
        nullable: true,
    }
}

/// The innermost named type, stripped of list and non-null wrappers.
pub fn named_type(ty: &ast::Type) -> &str {
    match &ty.base {
        BaseType::Named(name) => name.as_str(),
        BaseType::List(inner) => named_type(inner),
    }
}

/// Rewrite the innermost named type in place when `rename` returns a new name.
pub fn rename_named_type(ty: &mut ast::Type, rename: &dyn Fn(&str) -> Option<String>) {
    match &mut ty.base {
        BaseType::Named(name) => {
            if let Some(renamed) = rename(name.as_str()) {
                *name = Name::new(renamed);
            }
        }
        BaseType::List(inner) => rename_named_type(inner, rename),
    }
}

/// Compare list/named structure, ignoring nullability.
pub fn same_shape(a: &ast::Type, b: &ast::Type) -> bool {
    match (&a.base, &b.base) {
        (BaseType::Named(x), BaseType::Named(y)) => x == y,
        (BaseType::List(x), BaseType::List(y)) => same_shape(x, y),
        _ => false,
    }
}

pub fn has_directive(directives: &[Positioned<ConstDirective>], directive: &str) -> bool {
    directives
        .iter()
        .any(|d| d.node.name.node.as_str() == directive)
}

pub fn directive_argument<'a>(
    directive: &'a ConstDirective,
    argument: &str,
) -> Option<&'a ConstValue> {
    directive
        .arguments
        .iter()
        .find(|(name, _)| name.node.as_str() == argument)
        .map(|(_, value)| &value.node)
}

pub fn string_directive(directive: &str, argument: &str, value: &str) -> Positioned<ConstDirective> {
    positioned(ConstDirective {
        name: name(directive),
        arguments: vec![(name(argument), positioned(ConstValue::String(value.to_string())))],
    })
}

pub fn type_definition_name(definition: &TypeDefinition) -> &str {
    definition.name.node.as_str()
}

pub fn field_definitions(kind: &TypeKind) -> Option<&Vec<Positioned<FieldDefinition>>> {
    match kind {
        TypeKind::Object(object) => Some(&object.fields),
        TypeKind::Interface(interface) => Some(&interface.fields),
        _ => None,
    }
}

pub fn field_definitions_mut(kind: &mut TypeKind) -> Option<&mut Vec<Positioned<FieldDefinition>>> {
    match kind {
        TypeKind::Object(object) => Some(&mut object.fields),
        TypeKind::Interface(interface) => Some(&mut interface.fields),
        _ => None,
    }
}

pub fn object_type(type_name: &str, fields: Vec<Positioned<FieldDefinition>>) -> TypeSystemDefinition {
    TypeSystemDefinition::Type(positioned(TypeDefinition {
        extend: false,
        description: None,
        name: name(type_name),
        directives: Vec::new(),
        kind: TypeKind::Object(ast::ObjectType {
            implements: Vec::new(),
            fields,
        }),
    }))
}

pub fn input_object_type(
    type_name: &str,
    fields: Vec<Positioned<InputValueDefinition>>,
) -> TypeSystemDefinition {
    TypeSystemDefinition::Type(positioned(TypeDefinition {
        extend: false,
        description: None,
        name: name(type_name),
        directives: Vec::new(),
        kind: TypeKind::InputObject(ast::InputObjectType { fields }),
    }))
}

pub fn enum_type(type_name: &str, values: &[String]) -> TypeSystemDefinition {
    let values = values
        .iter()
        .map(|value| {
            positioned(ast::EnumValueDefinition {
                description: None,
                value: name(value),
                directives: Vec::new(),
            })
        })
        .collect();
    TypeSystemDefinition::Type(positioned(TypeDefinition {
        extend: false,
        description: None,
        name: name(type_name),
        directives: Vec::new(),
        kind: TypeKind::Enum(ast::EnumType { values }),
    }))
}

pub fn union_type(type_name: &str, members: &[String]) -> TypeSystemDefinition {
    TypeSystemDefinition::Type(positioned(TypeDefinition {
        extend: false,
        description: None,
        name: name(type_name),
        directives: Vec::new(),
        kind: TypeKind::Union(ast::UnionType {
            members: members.iter().map(|m| name(m)).collect(),
        }),
    }))
}

pub fn scalar_type(type_name: &str) -> TypeSystemDefinition {
    TypeSystemDefinition::Type(positioned(TypeDefinition {
        extend: false,
        description: None,
        name: name(type_name),
        directives: Vec::new(),
        kind: TypeKind::Scalar,
    }))
}

pub fn field(
    field_name: &str,
    ty: ast::Type,
    arguments: Vec<Positioned<InputValueDefinition>>,
) -> Positioned<FieldDefinition> {
    positioned(FieldDefinition {
        description: None,
        name: name(field_name),
        arguments,
        ty: positioned(ty),
        directives: Vec::new(),
    })
}

pub fn input_value(value_name: &str, ty: ast::Type) -> Positioned<InputValueDefinition> {
    positioned(InputValueDefinition {
        description: None,
        name: name(value_name),
        ty: positioned(ty),
        default_value: None,
        directives: Vec::new(),
    })
}

pub fn with_description<T>(mut node: Positioned<T>, description: Option<&str>) -> Positioned<T>
where
    T: HasDescription,
{
    if let Some(text) = description.map(str::trim).filter(|d| !d.is_empty()) {
        *node.node.description_mut() = Some(positioned(text.to_string()));
    }
    node
}

/// AST nodes that carry a description.
pub trait HasDescription {
    fn description_mut(&mut self) -> &mut Option<Positioned<String>>;
}

impl HasDescription for FieldDefinition {
    fn description_mut(&mut self) -> &mut Option<Positioned<String>> {
        &mut self.description
    }
}

impl HasDescription for InputValueDefinition {
    fn description_mut(&mut self) -> &mut Option<Positioned<String>> {
        &mut self.description
    }
}

impl HasDescription for TypeDefinition {
    fn description_mut(&mut self) -> &mut Option<Positioned<String>> {
        &mut self.description
    }
}

/// Names of the operation root types, honoring a custom `schema { }` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootTypeNames {
    pub query: String,
    pub mutation: String,
    pub subscription: String,
}

impl Default for RootTypeNames {
    fn default() -> Self {
        Self {
            query: "Query".to_string(),
            mutation: "Mutation".to_string(),
            subscription: "Subscription".to_string(),
        }
    }
}

impl RootTypeNames {
    pub fn from_document(document: &ServiceDocument) -> Self {
        let mut roots = Self::default();
        for definition in &document.definitions {
            if let TypeSystemDefinition::Schema(schema) = definition {
                if let Some(query) = &schema.node.query {
                    roots.query = query.node.to_string();
                }
                if let Some(mutation) = &schema.node.mutation {
                    roots.mutation = mutation.node.to_string();
                }
                if let Some(subscription) = &schema.node.subscription {
                    roots.subscription = subscription.node.to_string();
                }
            }
        }
        roots
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.query == type_name || self.mutation == type_name || self.subscription == type_name
    }

    pub fn names(&self) -> [&str; 3] {
        [&self.query, &self.mutation, &self.subscription]
    }
}
