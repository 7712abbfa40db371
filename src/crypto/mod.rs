//! Cryptographic primitives for the handshake and session encryption.

mod engine;
mod hkdf;
mod keypair;

pub use engine::*;
pub use hkdf::Hkdf;
pub use keypair::KeyPair;
