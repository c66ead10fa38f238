use super::{JsonSchema, ObjectSchema, PrimitiveType, SchemaKind};
use crate::error::UnsupportedConstruct;
use crate::sdl::ast::{self, TypeSystemDefinition};
use crate::sdl;
use crate::types::FieldConfigurations;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

const JSON_SCALAR: &str = "JSON";
const MAX_REF_DEPTH: usize = 32;

/// One layer of the enclosing-type stack, applied outer to inner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrapper {
    NonNull,
    List,
}

/// Wrap `base` in the stack's layers, outermost first.
pub fn wrap(base: &str, stack: &[Wrapper]) -> ast::Type {
    let mut ty = sdl::named(base);
    for wrapper in stack.iter().rev() {
        ty = match wrapper {
            Wrapper::NonNull => sdl::non_null(ty),
            Wrapper::List => sdl::list(ty),
        };
    }
    ty
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Output,
    Input,
}

/// A GraphQL type reference produced for a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub ty: ast::Type,
    /// The named type carries opaque JSON
    pub json: bool,
}

/// Replace a generated type, or one field of it, with a named scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarReplacement {
    pub entity_name: String,
    #[serde(default)]
    pub field_name: Option<String>,
    pub response_type_replacement: String,
    #[serde(default)]
    pub input_type_replacement: Option<String>,
}

impl ScalarReplacement {
    fn scalar(&self, mode: Mode) -> &str {
        match mode {
            Mode::Output => &self.response_type_replacement,
            Mode::Input => self
                .input_type_replacement
                .as_deref()
                .unwrap_or(&self.response_type_replacement),
        }
    }
}

/// The source a generated type was built from.
#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Object(ObjectSchema),
    Enum(Vec<String>),
}

/// Memoizing JSON-Schema to GraphQL type builder.
///
/// Every named type is emitted once no matter how many times it is reached;
/// recursion through `$ref` cycles terminates on the type name. Two different
/// schemas competing for one name get distinct names.
pub struct TypeRegistry<'a> {
    components: &'a IndexMap<String, JsonSchema>,
    replacements: &'a [ScalarReplacement],
    definitions: IndexMap<String, TypeSystemDefinition>,
    shapes: HashMap<String, Shape>,
    /// Inlined `$ref`s on the current path
    inlining: HashSet<String>,
    scalars: Vec<String>,
    fields: FieldConfigurations,
    custom_json_scalars: Vec<String>,
}

/// Everything a registry produced.
#[derive(Debug, Default)]
pub struct RegistryOutput {
    pub definitions: Vec<TypeSystemDefinition>,
    pub fields: FieldConfigurations,
    pub custom_json_scalars: Vec<String>,
}

impl<'a> TypeRegistry<'a> {
    pub fn new(
        components: &'a IndexMap<String, JsonSchema>,
        replacements: &'a [ScalarReplacement],
    ) -> Self {
        Self {
            components,
            replacements,
            definitions: IndexMap::new(),
            shapes: HashMap::new(),
            inlining: HashSet::new(),
            scalars: Vec::new(),
            fields: FieldConfigurations::new(),
            custom_json_scalars: Vec::new(),
        }
    }

    /// Look up a `$ref` target by its last path segment.
    pub fn lookup(&self, reference: &str) -> Option<(&'a str, &'a JsonSchema)> {
        let components: &'a IndexMap<String, JsonSchema> = self.components;
        let name = reference.rsplit('/').next()?;
        components
            .get_key_value(name)
            .map(|(name, schema)| (name.as_str(), schema))
    }

    /// Follow `$ref`s until a concrete schema is reached.
    pub fn resolve<'s>(&self, schema: &'s JsonSchema) -> &'s JsonSchema
    where
        'a: 's,
    {
        let mut current = schema;
        for _ in 0..MAX_REF_DEPTH {
            match current.reference().and_then(|r| self.lookup(r)) {
                Some((_, target)) => current = target,
                None => break,
            }
        }
        current
    }

    pub fn contains_type(&self, type_name: &str) -> bool {
        self.definitions.contains_key(type_name) || self.scalars.iter().any(|s| s == type_name)
    }

    /// GraphQL type for `schema`, wrapped by `stack`.
    ///
    /// `hint` names an anonymous object or enum found at this position.
    pub fn field_type(
        &mut self,
        schema: &JsonSchema,
        hint: &str,
        mode: Mode,
        mut stack: Vec<Wrapper>,
    ) -> FieldType {
        if schema.nullable && stack.last() == Some(&Wrapper::NonNull) {
            stack.pop();
        }

        match &schema.kind {
            SchemaKind::Array(items) => {
                stack.push(Wrapper::List);
                match items {
                    Some(items) => {
                        if !items.nullable {
                            stack.push(Wrapper::NonNull);
                        }
                        self.field_type(items, hint, mode, stack)
                    }
                    None => self.json(&stack),
                }
            }
            SchemaKind::Ref(reference) => match self.lookup(reference) {
                Some((name, target)) if is_inlinable(target) => {
                    if !self.inlining.insert(name.to_string()) {
                        UnsupportedConstruct::UnmappableSchema {
                            reason: format!("`{reference}` refers to itself"),
                        }
                        .warn(hint);
                        return self.json(&stack);
                    }
                    let field_type = self.field_type(target, hint, mode, stack);
                    self.inlining.remove(name);
                    field_type
                }
                Some((name, target)) => self.named_type(name, target, mode, stack),
                None => {
                    UnsupportedConstruct::UnmappableSchema {
                        reason: format!("unresolved reference `{reference}`"),
                    }
                    .warn(hint);
                    self.json(&stack)
                }
            },
            SchemaKind::Primitive {
                ty: PrimitiveType::String,
                enum_values,
                ..
            } if !enum_values.is_empty() => {
                let name = schema
                    .title
                    .as_deref()
                    .map(sanitize_type_name)
                    .unwrap_or_else(|| sanitize_type_name(hint));
                let base = self.ensure_enum(&name, enum_values, schema.description.as_deref());
                FieldType {
                    ty: wrap(&base, &stack),
                    json: false,
                }
            }
            SchemaKind::Primitive { ty, .. } => FieldType {
                ty: wrap(ty.scalar(), &stack),
                json: false,
            },
            SchemaKind::Object(object) if object.properties.is_empty() => self.json(&stack),
            SchemaKind::Object(object) => {
                let name = schema
                    .title
                    .as_deref()
                    .map(sanitize_type_name)
                    .unwrap_or_else(|| sanitize_type_name(hint));
                let base = self.ensure_object(&name, object, mode, schema.description.as_deref());
                FieldType {
                    ty: wrap(&base, &stack),
                    json: false,
                }
            }
            SchemaKind::OneOf(branches) if branches.len() == 1 => {
                self.field_type(&branches[0], hint, mode, stack)
            }
            SchemaKind::OneOf(branches) => {
                UnsupportedConstruct::MultiBranchOneOf {
                    branches: branches.len(),
                }
                .warn(hint);
                let first_primitive = branches.iter().find(|branch| {
                    matches!(
                        self.resolve(branch).kind,
                        SchemaKind::Primitive { .. }
                    )
                });
                match first_primitive {
                    Some(branch) => self.field_type(branch, hint, mode, stack),
                    None => self.json(&stack),
                }
            }
            SchemaKind::AllOf(parts) => match self.merge_all_of(parts, 0) {
                Some(mut merged) => {
                    merged.title = schema.title.clone().or(merged.title);
                    merged.description = schema.description.clone().or(merged.description);
                    self.field_type(&merged, hint, mode, stack)
                }
                None => self.json(&stack),
            },
            SchemaKind::Any => self.json(&stack),
        }
    }

    /// Define (or reuse) the named type for a `$ref` target.
    fn named_type(
        &mut self,
        name: &str,
        target: &JsonSchema,
        mode: Mode,
        stack: Vec<Wrapper>,
    ) -> FieldType {
        if let Some(replacement) = self
            .replacements
            .iter()
            .find(|r| r.entity_name == name && r.field_name.is_none())
        {
            let scalar = replacement.scalar(mode).to_string();
            return self.scalar(&scalar, &stack);
        }

        let base = sanitize_type_name(name);
        let mut named = target.clone();
        named.title = Some(base.clone());
        self.field_type(&named, &base, mode, stack)
    }

    /// Define an object (or input object) type once and return its name.
    pub fn ensure_object(
        &mut self,
        name: &str,
        object: &ObjectSchema,
        mode: Mode,
        description: Option<&str>,
    ) -> String {
        let input_name = |base: &str| match mode {
            Mode::Output => base.to_string(),
            Mode::Input => format!("{base}Input"),
        };
        let shape = Shape::Object(object.clone());
        let (base, type_name) = match self.claim(name, &shape, input_name) {
            Claim::Defined(type_name) => return type_name,
            Claim::Free(base, type_name) => (base, type_name),
        };
        self.shapes.insert(type_name.clone(), shape);
        debug!(type_name = %type_name, "defining object type");

        let mut output_fields = Vec::new();
        let mut input_fields = Vec::new();
        for (key, property) in &object.properties {
            let field_name = sanitize_field_name(key);
            let stack = if object.required.contains(key) {
                vec![Wrapper::NonNull]
            } else {
                Vec::new()
            };
            let replacement = self
                .replacements
                .iter()
                .find(|r| r.entity_name == name && r.field_name.as_deref() == Some(key.as_str()))
                .map(|r| r.scalar(mode).to_string());
            let hint = format!("{base}{}", capitalize(&field_name));
            let field_type = match replacement {
                Some(scalar) => self.scalar(&scalar, &stack),
                None => self.field_type(property, &hint, mode, stack),
            };
            let property_description = self.resolve(property).description.as_deref();

            match mode {
                Mode::Output => {
                    if field_name != *key {
                        self.fields.entry(&type_name, &field_name).path = vec![key.clone()];
                    }
                    if field_type.json {
                        self.fields
                            .entry(&type_name, &field_name)
                            .unescape_response_json = true;
                    }
                    output_fields.push(sdl::with_description(
                        sdl::field(&field_name, field_type.ty, Vec::new()),
                        property_description,
                    ));
                }
                Mode::Input => input_fields.push(sdl::with_description(
                    sdl::input_value(&field_name, field_type.ty),
                    property_description,
                )),
            }
        }

        let definition = match mode {
            Mode::Output => sdl::object_type(&type_name, output_fields),
            Mode::Input => sdl::input_object_type(&type_name, input_fields),
        };
        self.definitions
            .insert(type_name.clone(), describe(definition, description));
        type_name
    }

    fn ensure_enum(&mut self, name: &str, values: &[Value], description: Option<&str>) -> String {
        let mut sanitized: Vec<String> = Vec::new();
        for value in values.iter().filter_map(sanitize_enum_value) {
            if !sanitized.contains(&value) {
                sanitized.push(value);
            }
        }
        if sanitized.is_empty() {
            return "String".to_string();
        }
        let shape = Shape::Enum(sanitized.clone());
        let type_name = match self.claim(name, &shape, |base| base.to_string()) {
            Claim::Defined(type_name) => return type_name,
            Claim::Free(_, type_name) => type_name,
        };
        self.shapes.insert(type_name.clone(), shape);
        self.definitions.insert(
            type_name.clone(),
            describe(sdl::enum_type(&type_name, &sanitized), description),
        );
        type_name
    }

    /// Find the type built (or being built) from `shape` under `name`, or
    /// the first free name of `name`, `name2`, `name3`, ... for it.
    fn claim(&self, name: &str, shape: &Shape, type_name: impl Fn(&str) -> String) -> Claim {
        let mut base = name.to_string();
        let mut n = 1;
        loop {
            let candidate = type_name(&base);
            match self.shapes.get(&candidate) {
                Some(existing) if existing == shape => return Claim::Defined(candidate),
                Some(_) => {}
                None if self.contains_type(&candidate) => {}
                None => {
                    if base != name {
                        warn!(
                            type_name = %type_name(name),
                            renamed = %candidate,
                            "different schemas share a type name, renaming"
                        );
                    }
                    return Claim::Free(base, candidate);
                }
            }
            n += 1;
            base = format!("{name}{n}");
        }
    }

    /// Shallow `allOf` merge: union of properties and `required`, first base type wins.
    fn merge_all_of(&self, parts: &[JsonSchema], depth: usize) -> Option<JsonSchema> {
        if depth > MAX_REF_DEPTH {
            return None;
        }
        let mut object: Option<ObjectSchema> = None;
        let mut primitive: Option<JsonSchema> = None;
        let mut object_first = None;
        let mut title = None;
        let mut description = None;

        for part in parts {
            let part = self.resolve(part);
            let part = match &part.kind {
                SchemaKind::AllOf(nested) => match self.merge_all_of(nested, depth + 1) {
                    Some(merged) => merged,
                    None => continue,
                },
                _ => part.clone(),
            };
            title = title.or(part.title.clone());
            description = description.or(part.description.clone());
            if let SchemaKind::Object(part_object) = &part.kind {
                object_first.get_or_insert(true);
                let merged = object.get_or_insert_with(|| ObjectSchema {
                    properties: IndexMap::new(),
                    required: Vec::new(),
                    open: false,
                });
                for (key, property) in &part_object.properties {
                    merged
                        .properties
                        .entry(key.clone())
                        .or_insert_with(|| property.clone());
                }
                for required in &part_object.required {
                    if !merged.required.contains(required) {
                        merged.required.push(required.clone());
                    }
                }
                merged.open |= part_object.open;
            } else if primitive.is_none() && matches!(part.kind, SchemaKind::Primitive { .. }) {
                object_first.get_or_insert(false);
                primitive = Some(part);
            }
        }

        let mut merged = match (object, primitive, object_first) {
            (_, Some(primitive), Some(false)) | (None, Some(primitive), _) => primitive,
            (Some(object), _, _) => JsonSchema::new(SchemaKind::Object(object)),
            (None, None, _) => return None,
        };
        merged.title = title;
        merged.description = description;
        Some(merged)
    }

    fn json(&mut self, stack: &[Wrapper]) -> FieldType {
        self.scalar(JSON_SCALAR, stack)
    }

    /// Reference a scalar carrying JSON, declaring it on first use.
    fn scalar(&mut self, scalar: &str, stack: &[Wrapper]) -> FieldType {
        if !sdl::BUILT_IN_SCALARS.contains(&scalar) && !self.scalars.iter().any(|s| s == scalar) {
            self.scalars.push(scalar.to_string());
        }
        if scalar != JSON_SCALAR && !self.custom_json_scalars.iter().any(|s| s == scalar) {
            self.custom_json_scalars.push(scalar.to_string());
        }
        FieldType {
            ty: wrap(scalar, stack),
            json: !sdl::BUILT_IN_SCALARS.contains(&scalar),
        }
    }

    /// Mark a field outside the registry's own types as carrying JSON.
    pub fn fields_mut(&mut self) -> &mut FieldConfigurations {
        &mut self.fields
    }

    /// Scalars first, then every other definition in the order it was completed.
    pub fn finish(self) -> RegistryOutput {
        let mut definitions: Vec<TypeSystemDefinition> =
            self.scalars.iter().map(|s| sdl::scalar_type(s)).collect();
        definitions.extend(self.definitions.into_values());
        RegistryOutput {
            definitions,
            fields: self.fields,
            custom_json_scalars: self.custom_json_scalars,
        }
    }
}

enum Claim {
    /// An equal shape already owns this name
    Defined(String),
    /// Base name and type name to define
    Free(String, String),
}

fn describe(definition: TypeSystemDefinition, description: Option<&str>) -> TypeSystemDefinition {
    match definition {
        TypeSystemDefinition::Type(ty) => {
            TypeSystemDefinition::Type(sdl::with_description(ty, description))
        }
        other => other,
    }
}

fn is_inlinable(schema: &JsonSchema) -> bool {
    match &schema.kind {
        SchemaKind::Primitive { enum_values, .. } => enum_values.is_empty(),
        SchemaKind::Array(_) | SchemaKind::Any => true,
        _ => false,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !s.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// PascalCase a schema or path name into a legal GraphQL type name.
pub fn sanitize_type_name(raw: &str) -> String {
    let joined: String = raw
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .map(capitalize)
        .collect();
    let trimmed = joined.trim_start_matches(|c: char| c.is_ascii_digit());
    if trimmed.is_empty() {
        "Unnamed".to_string()
    } else {
        capitalize(trimmed)
    }
}

/// Legal GraphQL field name for a JSON property, camel-casing when needed.
pub fn sanitize_field_name(raw: &str) -> String {
    if is_valid_name(raw) {
        return raw.to_string();
    }
    let mut out = String::new();
    for segment in raw
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
    {
        if out.is_empty() {
            out.push_str(segment);
        } else {
            out.push_str(&capitalize(segment));
        }
    }
    let trimmed = out.trim_start_matches(|c: char| c.is_ascii_digit());
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Legal GraphQL enum value for a JSON enum entry. Non-strings are dropped.
pub fn sanitize_enum_value(value: &Value) -> Option<String> {
    let raw = value.as_str()?;
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() {
        return None;
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if matches!(out.as_str(), "true" | "false" | "null") {
        out = out.to_uppercase();
    }
    Some(out)
}
