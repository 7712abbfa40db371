//! Binary frame encoding and decoding.
//!
//! Frames are tag-prefixed values sharing a fixed token dictionary.
//! [`Node`] is the stanza view used by the rest of the crate.

mod decoder;
mod encoder;
mod node;
pub mod token;
mod value;

pub use decoder::{decode, Decoder, MAX_DEPTH};
pub use encoder::{encode, Encoder};
pub use node::{decode_node, encode_node, Attrs, Node, NodeContent};
pub use token::{get_token, get_token_index, tags, MAX_TOKEN, SINGLE_BYTE_TOKENS};
pub use value::Value;
