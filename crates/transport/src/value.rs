//! Dynamic values exchanged with the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value passed to or returned from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// No value (zero requested outputs).
    Empty,
    /// Logical scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Double-precision scalar.
    Double(f64),
    /// Character vector.
    Text(String),
    /// Ordered outputs of a call with more than one requested output.
    Tuple(Vec<Value>),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Tuple(_) => "tuple",
        }
    }

    /// Numeric view of a scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of a character vector.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is [`Value::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => f.write_str("[]"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_engine_notation() {
        assert_eq!(Value::Empty.to_string(), "[]");
        assert_eq!(Value::Double(2.5).to_string(), "2.5");
        assert_eq!(Value::from("abc").to_string(), "'abc'");
        assert_eq!(
            Value::Tuple(vec![Value::Int(1), Value::Bool(true)]).to_string(),
            "(1, true)"
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Value::Double(2.0)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "double", "value": 2.0 }));

        let back: Value = serde_json::from_value(serde_json::json!({ "type": "empty" })).unwrap();
        assert_eq!(back, Value::Empty);
    }

    #[test]
    fn numeric_view_covers_int_and_double() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Double(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::Bool(true).as_f64(), None);
    }
}
