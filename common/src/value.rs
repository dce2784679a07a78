//! Typed record values and the type tags a job declares for them.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A value emitted by a job module.
///
/// Values are immutable once emitted; [`Value::Bytes`] holds engine-defined
/// binary payloads.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Bytes),
    List(Vec<Value>),
}

impl Value {
    /// The tag describing this value, `None` for [`Value::Null`].
    pub fn type_tag(&self) -> Option<TypeTag> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(TypeTag::Boolean),
            Value::Int(_) => Some(TypeTag::Int),
            Value::Double(_) => Some(TypeTag::Double),
            Value::Text(_) => Some(TypeTag::Text),
            Value::Bytes(_) => Some(TypeTag::Bytes),
            Value::List(_) => Some(TypeTag::List),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => v.iter().try_for_each(|b| write!(f, "{b:02x}")),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

/// Declared type of a job's keys or values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Null,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "long")]
    Int,
    #[serde(alias = "float")]
    Double,
    #[serde(alias = "string")]
    Text,
    Bytes,
    #[serde(alias = "array")]
    List,
}

impl TypeTag {
    /// Whether keys may be declared with this tag.
    pub fn is_key_type(self) -> bool {
        matches!(self, TypeTag::Text | TypeTag::Bytes)
    }

    /// Whether a value conforms to this tag. `Null` conforms to every tag.
    pub fn accepts(self, value: &Value) -> bool {
        match value.type_tag() {
            None => true,
            Some(tag) => tag == self,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Boolean => "boolean",
            TypeTag::Int => "int",
            TypeTag::Double => "double",
            TypeTag::Text => "text",
            TypeTag::Bytes => "bytes",
            TypeTag::List => "list",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(TypeTag::Null),
            "boolean" | "bool" => Ok(TypeTag::Boolean),
            "int" | "long" => Ok(TypeTag::Int),
            "double" | "float" => Ok(TypeTag::Double),
            "text" | "string" => Ok(TypeTag::Text),
            "bytes" => Ok(TypeTag::Bytes),
            "list" | "array" => Ok(TypeTag::List),
            other => Err(format!("unknown type tag `{other}`")),
        }
    }
}
