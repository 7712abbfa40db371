//! Values carried by binary frames.
//!
//! The wire only knows lists, tokens and binary payloads, so some shapes
//! collapse on a round trip: booleans and numbers come back as strings,
//! a mapping comes back as its flattened key/value list, and `Null` and the
//! empty list share one tag.

/// A value that can be encoded into a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Flat key/value mapping, encoded as an alternating `key, value` list.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Get as string if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Raw payload bytes of a string or bytes value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as list if this is a list value
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The shape this value takes after a round trip through the codec.
    pub fn wire_normalized(&self) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Str(s) => Value::Str(s.clone()),
            Value::Bool(b) => Value::Str(b.to_string()),
            Value::Int(n) => Value::Str(n.to_string()),
            Value::Float(f) => Value::Str(f.to_string()),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => Value::Str(s.to_string()),
                Err(_) => Value::Bytes(b.clone()),
            },
            Value::List(items) if items.is_empty() => Value::Null,
            Value::List(items) => Value::List(items.iter().map(Value::wire_normalized).collect()),
            Value::Map(_) => self.flatten().wire_normalized(),
        }
    }

    /// Flatten a mapping into its alternating key/value list. Other values are returned as-is.
    pub fn flatten(&self) -> Value {
        match self {
            Value::Map(entries) => Value::List(
                entries
                    .iter()
                    .flat_map(|(k, v)| [Value::Str(k.clone()), v.clone()])
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_map() {
        let map = Value::Map(vec![
            ("type".into(), "get".into()),
            ("id".into(), Value::Int(7)),
        ]);
        assert_eq!(
            map.flatten(),
            Value::List(vec!["type".into(), "get".into(), "id".into(), Value::Int(7)])
        );
    }

    #[test]
    fn test_wire_normalized_asymmetry() {
        assert_eq!(Value::Bool(true).wire_normalized(), Value::Str("true".into()));
        assert_eq!(Value::Int(-42).wire_normalized(), Value::Str("-42".into()));
        assert_eq!(Value::List(vec![]).wire_normalized(), Value::Null);
        assert_eq!(
            Value::Bytes(vec![0xff, 0x00]).wire_normalized(),
            Value::Bytes(vec![0xff, 0x00])
        );
    }
}
