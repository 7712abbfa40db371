//! Binary decoder for protocol frames.
//!
//! Parses one frame from the front of a buffer. Every declared length is
//! checked against the bytes that remain before anything is read, and
//! length prefixes must be the smallest encoding for their value.

use super::token::{get_token, tags, MAX_TOKEN};
use super::value::Value;
use crate::error::ProtocolDecodeError;

/// Lists nest at most this deep.
pub const MAX_DEPTH: usize = 64;

/// Binary decoder for frame values
pub struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    /// Create a new decoder
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    /// Decode one value from the front of `data`, returning it with the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Value, usize), ProtocolDecodeError> {
        let mut decoder = Decoder::new(data);
        let value = decoder.read_value(0)?;
        Ok((value, decoder.index))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    fn read_byte(&mut self) -> Result<u8, ProtocolDecodeError> {
        let b = *self
            .data
            .get(self.index)
            .ok_or(ProtocolDecodeError::UnexpectedEnd {
                needed: 1,
                remaining: 0,
            })?;
        self.index += 1;
        Ok(b)
    }

    fn read_slice(&mut self, n: usize) -> Result<&'a [u8], ProtocolDecodeError> {
        if n > self.remaining() {
            return Err(ProtocolDecodeError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.index..self.index + n];
        self.index += n;
        Ok(slice)
    }

    /// Read a big-endian integer of `bytes` width
    fn read_int(&mut self, bytes: usize) -> Result<usize, ProtocolDecodeError> {
        let mut result = 0usize;
        for b in self.read_slice(bytes)? {
            result = (result << 8) | *b as usize;
        }
        Ok(result)
    }

    fn read_binary(&mut self, tag: u8) -> Result<Value, ProtocolDecodeError> {
        let (len, min) = match tag {
            tags::BINARY_8 => (self.read_int(1)?, 0),
            tags::BINARY_20 => {
                let raw = self.read_int(3)?;
                if raw > 0x0F_FFFF {
                    return Err(ProtocolDecodeError::LengthOverflow {
                        declared: raw,
                        remaining: self.remaining(),
                    });
                }
                (raw, 256)
            }
            _ => (self.read_int(4)?, 1 << 20),
        };
        if len < min {
            return Err(ProtocolDecodeError::NonCanonicalLength { tag, length: len });
        }
        if len > self.remaining() {
            return Err(ProtocolDecodeError::LengthOverflow {
                declared: len,
                remaining: self.remaining(),
            });
        }
        let bytes = self.read_slice(len)?;
        Ok(match std::str::from_utf8(bytes) {
            Ok(s) => Value::Str(s.to_string()),
            Err(_) => Value::Bytes(bytes.to_vec()),
        })
    }

    fn read_list(&mut self, tag: u8, depth: usize) -> Result<Value, ProtocolDecodeError> {
        let (count, min) = match tag {
            tags::LIST_8 => (self.read_int(1)?, 1),
            _ => (self.read_int(2)?, 256),
        };
        if count < min {
            return Err(ProtocolDecodeError::NonCanonicalLength { tag, length: count });
        }
        // every element occupies at least one byte
        if count > self.remaining() {
            return Err(ProtocolDecodeError::LengthOverflow {
                declared: count,
                remaining: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_value(depth + 1)?);
        }
        Ok(Value::List(items))
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, ProtocolDecodeError> {
        if depth > MAX_DEPTH {
            return Err(ProtocolDecodeError::NestingTooDeep(MAX_DEPTH));
        }
        let tag = self.read_byte()?;
        match tag {
            tags::LIST_EMPTY => Ok(Value::Null),
            tags::LIST_8 | tags::LIST_16 => self.read_list(tag, depth),
            tags::BINARY_8 | tags::BINARY_20 | tags::BINARY_32 => self.read_binary(tag),
            1..=MAX_TOKEN => get_token(tag)
                .map(|t| Value::Str(t.to_string()))
                .ok_or(ProtocolDecodeError::TokenOutOfRange(tag)),
            t if t < tags::LIST_8 => Err(ProtocolDecodeError::TokenOutOfRange(t)),
            t => Err(ProtocolDecodeError::UnknownTag(t)),
        }
    }
}

/// Decode one value from the front of a buffer.
pub fn decode(data: &[u8]) -> Result<(Value, usize), ProtocolDecodeError> {
    Decoder::decode(data)
}
