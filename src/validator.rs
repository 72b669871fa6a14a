//! Schema validation - compiles schema descriptions into a normalized type
//! tree and validates JSON values against it.
//!
//! A schema is either a bare scalar type or an object shape with
//! per-property requirements. Compiling produces a [`TypeNode`] tree whose
//! properties are stored in sorted order, so two descriptions differing
//! only in declaration order compile to the same tree - the tree is what
//! `describe()` hands to remote callers.
//!
//! Validation failures are structured issue records, not errors:
//!
//! ```
//! use modelserv::validator::{validate, Schema, TypeName};
//! use serde_json::json;
//!
//! let node = modelserv::validator::parse(&Schema::scalar(TypeName::String));
//! let issues = validate(&node, &json!(120));
//! assert_eq!(issues[0].message, "must be string, but is number");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON type names used by schemas and issue messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
}

impl TypeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeName::String => "string",
            TypeName::Number => "number",
            TypeName::Boolean => "boolean",
            TypeName::Object => "object",
            TypeName::Array => "array",
            TypeName::Null => "null",
        }
    }

    /// The type name of a JSON value.
    pub fn of(value: &Value) -> TypeName {
        match value {
            Value::Null => TypeName::Null,
            Value::Bool(_) => TypeName::Boolean,
            Value::Number(_) => TypeName::Number,
            Value::String(_) => TypeName::String,
            Value::Array(_) => TypeName::Array,
            Value::Object(_) => TypeName::Object,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema description as written by model authors.
#[derive(Debug, Clone)]
pub enum Schema {
    /// A bare scalar type, e.g. "the mutation input must be a string".
    Scalar(TypeName),
    /// An object shape with per-property types and requirements.
    Shape(ShapeSchema),
}

impl Schema {
    pub fn scalar(kind: TypeName) -> Schema {
        Schema::Scalar(kind)
    }
}

impl From<TypeName> for Schema {
    fn from(kind: TypeName) -> Schema {
        Schema::Scalar(kind)
    }
}

impl From<ShapeSchema> for Schema {
    fn from(shape: ShapeSchema) -> Schema {
        Schema::Shape(shape)
    }
}

/// Builder for object-shaped schemas.
///
/// ```
/// use modelserv::validator::{ShapeSchema, TypeName};
///
/// let schema = ShapeSchema::new()
///     .required("first", TypeName::String)
///     .optional("nickname", TypeName::String);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShapeSchema {
    properties: Vec<(String, TypeName, bool)>,
}

impl ShapeSchema {
    pub fn new() -> ShapeSchema {
        ShapeSchema::default()
    }

    /// Add a property that must be present.
    pub fn required(mut self, name: &str, kind: TypeName) -> ShapeSchema {
        self.properties.push((name.to_string(), kind, true));
        self
    }

    /// Add a property that may be absent.
    pub fn optional(mut self, name: &str, kind: TypeName) -> ShapeSchema {
        self.properties.push((name.to_string(), kind, false));
        self
    }
}

/// A compiled, normalized schema node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, TypeNode>>,
}

impl TypeNode {
    pub fn scalar(kind: TypeName) -> TypeNode {
        TypeNode {
            kind: kind.as_str().to_string(),
            optional: false,
            properties: None,
        }
    }

    /// An object node from `(name, type, required)` triples. Properties end
    /// up sorted regardless of iteration order.
    pub fn object<I>(properties: I) -> TypeNode
    where
        I: IntoIterator<Item = (String, TypeName, bool)>,
    {
        let properties = properties
            .into_iter()
            .map(|(name, kind, required)| {
                let node = TypeNode {
                    kind: kind.as_str().to_string(),
                    optional: !required,
                    properties: None,
                };
                (name, node)
            })
            .collect();

        TypeNode {
            kind: TypeName::Object.as_str().to_string(),
            optional: false,
            properties: Some(properties),
        }
    }
}

/// Compile a schema description into its normalized type tree.
pub fn parse(schema: &Schema) -> TypeNode {
    match schema {
        Schema::Scalar(kind) => TypeNode::scalar(*kind),
        Schema::Shape(shape) => TypeNode::object(shape.properties.iter().cloned()),
    }
}

/// One validation failure. `property` is a path rooted at `@`
/// (`@`, `@.last`); `code` is always null at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub property: String,
    pub reason: String,
    pub message: String,
    pub code: Option<String>,
}

/// Validate a value against a compiled node. An empty result means valid.
pub fn validate(node: &TypeNode, value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check(node, value, "@", &mut issues);
    issues
}

fn check(node: &TypeNode, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let actual = TypeName::of(value);
    if actual.as_str() != node.kind {
        issues.push(ValidationIssue {
            property: path.to_string(),
            reason: "type".to_string(),
            message: format!("must be {}, but is {}", node.kind, actual),
            code: None,
        });
        return;
    }

    if let (Some(properties), Value::Object(map)) = (&node.properties, value) {
        for (name, child) in properties {
            let child_path = format!("{}.{}", path, name);
            match map.get(name) {
                Some(present) => check(child, present, &child_path, issues),
                None if !child.optional => issues.push(ValidationIssue {
                    property: child_path,
                    reason: "optional".to_string(),
                    message: "is missing and not optional".to_string(),
                    code: None,
                }),
                None => {}
            }
        }
    }
}
