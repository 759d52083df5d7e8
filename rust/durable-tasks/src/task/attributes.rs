//! Attribute values, model references and the attribute schema.
//!
//! Task attributes are stored as JSON scalars or as `{id, type}` references to
//! domain objects owned by the application. The domain objects themselves are
//! never embedded in a snapshot.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{TaskError, TaskResult};

/// Attribute map of a task instance, ordered by name.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Results map written once when a task completes.
pub type Results = BTreeMap<String, Value>;

/// An application-owned domain object that attributes can reference.
pub trait Model {
    /// Identifier of this object within its type.
    fn model_id(&self) -> String;

    /// Type name used to look the object up again.
    fn model_type(&self) -> String;
}

/// Portable reference to a [`Model`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: String,
    #[serde(rename = "type")]
    pub model_type: String,
}

impl ModelRef {
    #[must_use]
    pub fn new(id: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model_type: model_type.into(),
        }
    }

    /// Reference the given model.
    #[must_use]
    pub fn of(model: &dyn Model) -> Self {
        Self::new(model.model_id(), model.model_type())
    }

    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.len() != 2 {
            return None;
        }
        let id = object.get("id")?.as_str()?;
        let model_type = object.get("type")?.as_str()?;
        Some(Self::new(id, model_type))
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model_type, self.id)
    }
}

/// A single attribute value.
///
/// Serialised untagged. When read back, an object with exactly the string keys
/// `id` and `type` becomes a [`AttributeValue::Model`], a non-empty array made
/// only of such objects becomes [`AttributeValue::Models`], and anything else
/// is a [`AttributeValue::Scalar`]. [`From<Value>`] applies the same rule, so
/// values built through it survive a snapshot round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Model(ModelRef),
    Models(Vec<ModelRef>),
    Scalar(Value),
}

impl AttributeValue {
    /// The null value, meaning "unset".
    pub const NULL: Self = Self::Scalar(Value::Null);

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Value::Null))
    }

    /// JSON view of this value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Model(reference) => model_ref_json(reference),
            Self::Models(references) => {
                Value::Array(references.iter().map(model_ref_json).collect())
            }
        }
    }

    /// Build a value from anything serialisable.
    pub fn from_serialize(value: impl Serialize) -> TaskResult<Self> {
        Ok(serde_json::to_value(value)?.into())
    }
}

fn model_ref_json(reference: &ModelRef) -> Value {
    serde_json::json!({ "id": reference.id, "type": reference.model_type })
}

impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        if let Some(reference) = ModelRef::from_value(&value) {
            return Self::Model(reference);
        }
        if let Value::Array(items) = &value {
            if !items.is_empty() {
                let references: Option<Vec<ModelRef>> =
                    items.iter().map(ModelRef::from_value).collect();
                if let Some(references) = references {
                    return Self::Models(references);
                }
            }
        }
        Self::Scalar(value)
    }
}

impl From<ModelRef> for AttributeValue {
    fn from(reference: ModelRef) -> Self {
        Self::Model(reference)
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Self::from)
    }
}

/// Declared type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Any JSON value.
    Json,
    /// A single reference to a model of the named type.
    Model(String),
    /// A list of references to models of the named type.
    Models(String),
}

impl AttributeKind {
    /// Whether `value` may be stored in an attribute of this kind.
    ///
    /// `null` is accepted for every kind.
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        if value.is_null() {
            return true;
        }
        match (self, value) {
            (Self::Json, _) => true,
            (Self::String, AttributeValue::Scalar(v)) => v.is_string(),
            (Self::Integer, AttributeValue::Scalar(v)) => v.is_i64() || v.is_u64(),
            (Self::Float, AttributeValue::Scalar(v)) => v.is_number(),
            (Self::Boolean, AttributeValue::Scalar(v)) => v.is_boolean(),
            (Self::Model(expected), AttributeValue::Model(r)) => &r.model_type == expected,
            (Self::Models(expected), AttributeValue::Models(refs)) => {
                refs.iter().all(|r| &r.model_type == expected)
            }
            (Self::Models(_), AttributeValue::Scalar(Value::Array(items))) => items.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("a string"),
            Self::Integer => f.write_str("an integer"),
            Self::Float => f.write_str("a number"),
            Self::Boolean => f.write_str("a boolean"),
            Self::Json => f.write_str("JSON"),
            Self::Model(t) => write!(f, "a reference to {t}"),
            Self::Models(t) => write!(f, "a list of references to {t}"),
        }
    }
}

/// Schema entry for one declared attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    pub default: Option<Value>,
    pub required: bool,
}

impl AttributeSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            required: false,
        }
    }

    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::String)
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Integer)
    }

    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Float)
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Boolean)
    }

    #[must_use]
    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Json)
    }

    #[must_use]
    pub fn model(name: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Model(model_type.into()))
    }

    #[must_use]
    pub fn models(name: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Models(model_type.into()))
    }

    /// Value used when the attribute is absent at construction.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Reject construction when the attribute is absent.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Type check a value about to be written to this attribute.
    pub fn check(&self, value: &AttributeValue) -> TaskResult<()> {
        if self.kind.accepts(value) {
            Ok(())
        } else {
            Err(TaskError::Validation(format!(
                "{} must be {}",
                self.name, self.kind
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_classification() {
        let value = AttributeValue::from(json!({"id": "7", "type": "User"}));
        assert_eq!(value, AttributeValue::Model(ModelRef::new("7", "User")));

        let value = AttributeValue::from(json!([{"id": "1", "type": "User"}, {"id": "2", "type": "User"}]));
        assert!(matches!(value, AttributeValue::Models(ref refs) if refs.len() == 2));

        // extra keys keep it a plain object
        let value = AttributeValue::from(json!({"id": "7", "type": "User", "name": "x"}));
        assert!(matches!(value, AttributeValue::Scalar(_)));

        let value = AttributeValue::from(json!([]));
        assert_eq!(value, AttributeValue::Scalar(json!([])));
    }

    #[test]
    fn test_value_json_round_trip() {
        for raw in [
            json!("hello"),
            json!(42),
            json!(null),
            json!({"id": "1", "type": "Post"}),
            json!([{"id": "1", "type": "Post"}]),
            json!({"nested": {"a": [1, 2]}}),
        ] {
            let value = AttributeValue::from(raw.clone());
            let text = serde_json::to_string(&value).unwrap();
            let back: AttributeValue = serde_json::from_str(&text).unwrap();
            assert_eq!(back, value);
            assert_eq!(back.to_json(), raw);
        }
    }

    #[test]
    fn test_kind_accepts() {
        assert!(AttributeKind::String.accepts(&json!("x").into()));
        assert!(!AttributeKind::String.accepts(&json!(1).into()));
        assert!(AttributeKind::Integer.accepts(&json!(3).into()));
        assert!(!AttributeKind::Integer.accepts(&json!(3.5).into()));
        assert!(AttributeKind::Float.accepts(&json!(3).into()));
        assert!(AttributeKind::Boolean.accepts(&AttributeValue::NULL));
        assert!(AttributeKind::Model("User".into()).accepts(&ModelRef::new("1", "User").into()));
        assert!(!AttributeKind::Model("User".into()).accepts(&ModelRef::new("1", "Post").into()));
        assert!(AttributeKind::Models("User".into()).accepts(&json!([]).into()));
    }

    #[test]
    fn test_spec_check_message() {
        let spec = AttributeSpec::boolean("arriving").with_default(true);
        let err = spec.check(&json!("yes").into()).unwrap_err();
        assert_eq!(err.to_string(), "arriving must be a boolean");
    }
}
