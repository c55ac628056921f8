//! Runtime schema primitives for workflow inputs and step outputs.
//!
//! Schemas are built by the workflow DSL (`string()`, `enum(...)`, `list(t)`,
//! `optional(t)`, `object({...})`) and validated against `serde_json::Value`
//! at run admission and step completion. `to_interchange` renders a
//! JSON-Schema-style description for external consumers (API, UI).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A runtime-constructed value schema.
///
/// `BTreeMap` keeps object fields in a stable order so interchange rendering
/// and error paths are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schema {
    /// Any UTF-8 string.
    String,
    /// 64-bit integer.
    Integer,
    /// Boolean.
    Boolean,
    /// One of a fixed set of string variants.
    Enum { variants: Vec<String> },
    /// Homogeneous list of `item`.
    List { item: Box<Schema> },
    /// `inner`, or absent/null.
    Optional { inner: Box<Schema> },
    /// Structured object with named fields.
    Object { fields: BTreeMap<String, Schema> },
}

impl Schema {
    /// Shorthand constructors mirroring the DSL builtins.
    pub fn string() -> Self {
        Schema::String
    }

    pub fn integer() -> Self {
        Schema::Integer
    }

    pub fn boolean() -> Self {
        Schema::Boolean
    }

    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Enum {
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn list(item: Schema) -> Self {
        Schema::List { item: Box::new(item) }
    }

    pub fn optional(inner: Schema) -> Self {
        Schema::Optional { inner: Box::new(inner) }
    }

    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Schema)>,
        S: Into<String>,
    {
        Schema::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Validate a JSON value against this schema.
    ///
    /// Violations carry the path to the offending value and a reason that is
    /// safe to surface to end users.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        self.validate_at("$", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> Result<(), SchemaViolation> {
        match self {
            Schema::String => match value {
                Value::String(_) => Ok(()),
                other => Err(SchemaViolation::new(path, format!("expected string, got {}", kind_of(other)))),
            },
            Schema::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                other => Err(SchemaViolation::new(path, format!("expected integer, got {}", kind_of(other)))),
            },
            Schema::Boolean => match value {
                Value::Bool(_) => Ok(()),
                other => Err(SchemaViolation::new(path, format!("expected boolean, got {}", kind_of(other)))),
            },
            Schema::Enum { variants } => match value {
                Value::String(s) if variants.iter().any(|v| v == s) => Ok(()),
                Value::String(s) => Err(SchemaViolation::new(
                    path,
                    format!("'{s}' is not one of [{}]", variants.join(", ")),
                )),
                other => Err(SchemaViolation::new(path, format!("expected enum string, got {}", kind_of(other)))),
            },
            Schema::List { item } => match value {
                Value::Array(entries) => {
                    for (i, entry) in entries.iter().enumerate() {
                        item.validate_at(&format!("{path}[{i}]"), entry)?;
                    }
                    Ok(())
                }
                other => Err(SchemaViolation::new(path, format!("expected list, got {}", kind_of(other)))),
            },
            Schema::Optional { inner } => match value {
                Value::Null => Ok(()),
                present => inner.validate_at(path, present),
            },
            Schema::Object { fields } => match value {
                Value::Object(map) => {
                    for (name, field_schema) in fields {
                        let field_path = format!("{path}.{name}");
                        match map.get(name) {
                            Some(v) => field_schema.validate_at(&field_path, v)?,
                            None => {
                                // Absent optional fields are fine
                                if !matches!(field_schema, Schema::Optional { .. }) {
                                    return Err(SchemaViolation::new(
                                        field_path,
                                        "required field is missing".to_string(),
                                    ));
                                }
                            }
                        }
                    }
                    for key in map.keys() {
                        if !fields.contains_key(key) {
                            return Err(SchemaViolation::new(
                                format!("{path}.{key}"),
                                "unknown field".to_string(),
                            ));
                        }
                    }
                    Ok(())
                }
                other => Err(SchemaViolation::new(path, format!("expected object, got {}", kind_of(other)))),
            },
        }
    }

    /// Render a JSON-Schema-style interchange description.
    pub fn to_interchange(&self) -> Value {
        match self {
            Schema::String => json!({"type": "string"}),
            Schema::Integer => json!({"type": "integer"}),
            Schema::Boolean => json!({"type": "boolean"}),
            Schema::Enum { variants } => json!({"type": "string", "enum": variants}),
            Schema::List { item } => json!({"type": "array", "items": item.to_interchange()}),
            Schema::Optional { inner } => {
                let mut desc = inner.to_interchange();
                if let Value::Object(map) = &mut desc {
                    map.insert("nullable".to_string(), Value::Bool(true));
                }
                desc
            }
            Schema::Object { fields } => {
                let properties: serde_json::Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_interchange()))
                    .collect();
                let required: Vec<&str> = fields
                    .iter()
                    .filter(|(_, v)| !matches!(v, Schema::Optional { .. }))
                    .map(|(k, _)| k.as_str())
                    .collect();
                json!({"type": "object", "properties": properties, "required": required})
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// SchemaViolation
// ---------------------------------------------------------------------------

/// A structured schema violation: where, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{path}: {reason}")]
pub struct SchemaViolation {
    /// Path to the offending value (e.g. `$.inputs.target[2]`).
    pub path: String,
    /// Human-readable reason, free of internal detail.
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_accepts_string() {
        assert!(Schema::string().validate(&json!("hello")).is_ok());
        let err = Schema::string().validate(&json!(42)).unwrap_err();
        assert!(err.reason.contains("expected string"));
    }

    #[test]
    fn test_enum_matches_variants() {
        let schema = Schema::enumeration(["debug", "release"]);
        assert!(schema.validate(&json!("debug")).is_ok());
        let err = schema.validate(&json!("profile")).unwrap_err();
        assert!(err.reason.contains("not one of"), "got: {}", err.reason);
    }

    #[test]
    fn test_list_reports_element_path() {
        let schema = Schema::list(Schema::integer());
        assert!(schema.validate(&json!([1, 2, 3])).is_ok());
        let err = schema.validate(&json!([1, "two", 3])).unwrap_err();
        assert_eq!(err.path, "$[1]");
    }

    #[test]
    fn test_optional_allows_null() {
        let schema = Schema::optional(Schema::string());
        assert!(schema.validate(&json!(null)).is_ok());
        assert!(schema.validate(&json!("x")).is_ok());
        assert!(schema.validate(&json!(1)).is_err());
    }

    #[test]
    fn test_object_required_and_unknown_fields() {
        let schema = Schema::object([
            ("target", Schema::string()),
            ("profile", Schema::optional(Schema::enumeration(["debug", "release"]))),
        ]);

        assert!(schema.validate(&json!({"target": "x86_64"})).is_ok());

        let err = schema.validate(&json!({})).unwrap_err();
        assert_eq!(err.path, "$.target");
        assert!(err.reason.contains("missing"));

        let err = schema
            .validate(&json!({"target": "a", "extra": 1}))
            .unwrap_err();
        assert_eq!(err.path, "$.extra");
        assert!(err.reason.contains("unknown field"));
    }

    #[test]
    fn test_nested_object_path() {
        let schema = Schema::object([(
            "matrix",
            Schema::object([("os", Schema::list(Schema::string()))]),
        )]);
        let err = schema
            .validate(&json!({"matrix": {"os": ["linux", 7]}}))
            .unwrap_err();
        assert_eq!(err.path, "$.matrix.os[1]");
    }

    #[test]
    fn test_interchange_object_rendering() {
        let schema = Schema::object([
            ("name", Schema::string()),
            ("retries", Schema::optional(Schema::integer())),
        ]);
        let desc = schema.to_interchange();
        assert_eq!(desc["type"], "object");
        assert_eq!(desc["properties"]["name"]["type"], "string");
        assert_eq!(desc["properties"]["retries"]["nullable"], true);
        assert_eq!(desc["required"], json!(["name"]));
    }

    #[test]
    fn test_schema_serde_roundtrip() {
        let schema = Schema::object([("os", Schema::list(Schema::enumeration(["linux", "macos"])))]);
        let encoded = serde_json::to_string(&schema).unwrap();
        let decoded: Schema = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, schema);
    }
}
