//! Binary encoder for protocol frames.
//!
//! Encodes [`Value`]s into the tagged binary format, always choosing the
//! smallest length prefix that fits.

use super::token::{get_token_index, tags};
use super::value::Value;
use crate::error::EncodeError;

const MAX_BINARY_20: usize = (1 << 20) - 1;

/// Binary encoder for frame values
pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Encode a value and return the binary data
    pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
        let mut encoder = Self::new();
        encoder.write_value(value)?;
        Ok(encoder.data)
    }

    fn write_byte(&mut self, b: u8) {
        self.data.push(b);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Write a string, as a token when it exactly matches a dictionary entry
    fn write_string(&mut self, s: &str) -> Result<(), EncodeError> {
        if let Some(token) = get_token_index(s) {
            self.write_byte(token);
            return Ok(());
        }
        self.write_binary(s.as_bytes())
    }

    /// Write a length-prefixed binary payload
    fn write_binary(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let len = bytes.len();
        if len < 256 {
            self.write_byte(tags::BINARY_8);
            self.write_byte(len as u8);
        } else if len <= MAX_BINARY_20 {
            self.write_byte(tags::BINARY_20);
            self.write_byte(((len >> 16) & 0x0F) as u8);
            self.write_byte(((len >> 8) & 0xFF) as u8);
            self.write_byte((len & 0xFF) as u8);
        } else {
            let len32 = u32::try_from(len).map_err(|_| EncodeError::PayloadTooLarge(len))?;
            self.write_byte(tags::BINARY_32);
            self.write_bytes(&len32.to_be_bytes());
        }
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write a list header followed by each element
    fn write_list(&mut self, items: &[Value]) -> Result<(), EncodeError> {
        let len = items.len();
        if len == 0 {
            self.write_byte(tags::LIST_EMPTY);
            return Ok(());
        }
        if len < 256 {
            self.write_byte(tags::LIST_8);
            self.write_byte(len as u8);
        } else if len < 65536 {
            self.write_byte(tags::LIST_16);
            self.write_bytes(&(len as u16).to_be_bytes());
        } else {
            return Err(EncodeError::ListTooLong(len));
        }
        for item in items {
            self.write_value(item)?;
        }
        Ok(())
    }

    fn write_value(&mut self, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Null => {
                self.write_byte(tags::LIST_EMPTY);
                Ok(())
            }
            Value::Str(s) => self.write_string(s),
            Value::Bool(b) => self.write_string(if *b { "true" } else { "false" }),
            Value::Int(n) => self.write_string(&n.to_string()),
            Value::Float(f) => self.write_string(&f.to_string()),
            Value::Bytes(b) => self.write_binary(b),
            Value::List(items) => self.write_list(items),
            Value::Map(_) => self.write_value(&value.flatten()),
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a value to binary format
pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
    Encoder::encode(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::token::get_token_index;

    #[test]
    fn test_token_string_is_one_byte() {
        let encoded = encode(&Value::from("message")).unwrap();
        assert_eq!(encoded, vec![get_token_index("message").unwrap()]);
    }

    #[test]
    fn test_short_string_uses_8_bit_length() {
        let encoded = encode(&Value::from("hello")).unwrap();
        assert_eq!(encoded[0], tags::BINARY_8);
        assert_eq!(encoded[1], 5);
        assert_eq!(&encoded[2..], b"hello");
    }

    #[test]
    fn test_long_string_uses_3_byte_length() {
        let s = "x".repeat(300);
        let encoded = encode(&Value::from(s.as_str())).unwrap();
        assert_eq!(encoded[0], tags::BINARY_20);
        assert_eq!(&encoded[1..4], &[0x00, 0x01, 0x2c]);
        assert_eq!(encoded.len(), 4 + 300);
    }

    #[test]
    fn test_list_prefixes() {
        assert_eq!(encode(&Value::List(vec![])).unwrap(), vec![tags::LIST_EMPTY]);
        assert_eq!(encode(&Value::Null).unwrap(), vec![tags::LIST_EMPTY]);

        let small = Value::List(vec![Value::Null; 3]);
        assert_eq!(encode(&small).unwrap(), vec![tags::LIST_8, 3, 0, 0, 0]);

        let big = Value::List(vec![Value::Null; 300]);
        let encoded = encode(&big).unwrap();
        assert_eq!(&encoded[..3], &[tags::LIST_16, 0x01, 0x2c]);
        assert_eq!(encoded.len(), 3 + 300);
    }

    #[test]
    fn test_map_is_flattened() {
        let map = Value::Map(vec![("type".into(), "get".into())]);
        let list = Value::List(vec!["type".into(), "get".into()]);
        assert_eq!(encode(&map).unwrap(), encode(&list).unwrap());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let v = Value::List(vec!["iq".into(), Value::Int(5), Value::Bytes(vec![1, 2, 3])]);
        assert_eq!(encode(&v).unwrap(), encode(&v).unwrap());
    }

    #[test]
    fn test_oversized_list_rejected() {
        let huge = Value::List(vec![Value::Null; 65536]);
        assert_eq!(encode(&huge), Err(EncodeError::ListTooLong(65536)));
    }
}
