//! Schema validation contract.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tidesync_protocol::Body;

/// A document rejected by a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Offending field, if the failure is field-specific.
    pub field: Option<String>,
    /// Human-readable reason.
    pub message: String,
}

impl ValidationError {
    /// Creates an error about `field`.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Creates an error about the whole document.
    pub fn document(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Accepts or rejects document bodies.
///
/// Validators are passed to each replication session explicitly, so a
/// session's behaviour is fully determined by its constructor arguments.
pub trait SchemaValidator: Send + Sync {
    /// Validates a document body.
    fn validate(&self, body: &Body) -> Result<(), ValidationError>;
}

/// A validator that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidation;

impl SchemaValidator for NoValidation {
    fn validate(&self, _body: &Body) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// JSON type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A string.
    String,
    /// An integral number.
    Integer,
    /// Any number.
    Number,
    /// A boolean.
    Boolean,
    /// An object.
    Object,
    /// An array.
    Array,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    field_type: FieldType,
    minimum: Option<i64>,
    maximum: Option<i64>,
}

/// A field-level schema: declared fields with types, required fields,
/// integer bounds, and an open/closed switch for undeclared fields.
///
/// # Example
///
/// ```
/// use tidesync_store::{FieldSchema, FieldType, SchemaValidator};
///
/// let schema = FieldSchema::new()
///     .field("id", FieldType::String)
///     .field("age", FieldType::Integer)
///     .required(["id", "age"])
///     .range("age", 0, 150);
///
/// let ok = serde_json::json!({"id": "a", "age": 30});
/// assert!(schema.validate(ok.as_object().unwrap()).is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    fields: BTreeMap<String, FieldRule>,
    required: Vec<String>,
    closed: bool,
}

impl FieldSchema {
    /// Creates an empty, open schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field and its type.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldRule {
                field_type,
                minimum: None,
                maximum: None,
            },
        );
        self
    }

    /// Marks fields as required.
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    /// Bounds a declared integer field (inclusive).
    pub fn range(mut self, name: &str, minimum: i64, maximum: i64) -> Self {
        if let Some(rule) = self.fields.get_mut(name) {
            rule.minimum = Some(minimum);
            rule.maximum = Some(maximum);
        }
        self
    }

    /// Rejects fields that were not declared.
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }
}

impl SchemaValidator for FieldSchema {
    fn validate(&self, body: &Body) -> Result<(), ValidationError> {
        for name in &self.required {
            if body.get(name).map_or(true, Value::is_null) {
                return Err(ValidationError::field(name, "is required"));
            }
        }

        for (name, value) in body {
            let Some(rule) = self.fields.get(name) else {
                if self.closed {
                    return Err(ValidationError::field(name, "is not declared"));
                }
                continue;
            };

            if value.is_null() {
                continue;
            }
            if !rule.field_type.matches(value) {
                return Err(ValidationError::field(
                    name,
                    format!("expected {:?}", rule.field_type),
                ));
            }
            if let Some(n) = value.as_i64() {
                if rule.minimum.is_some_and(|min| n < min) || rule.maximum.is_some_and(|max| n > max) {
                    return Err(ValidationError::field(name, "is out of range"));
                }
            }
        }

        Ok(())
    }
}
