//! Error taxonomy for the protocol core.
//!
//! Each class maps to one propagation policy:
//! - [`ProtocolDecodeError`]: isolated per frame, the frame is dropped and logged
//! - [`EncryptionError`]: fatal to the current operation (or to the handshake)
//! - [`ValidationError`]: caller input rejected before any side effect
//! - [`ConnectionError`]: handled centrally by the reconnect policy
//! - [`AuthError`]: surfaces `auth.failure`, retry is caller-initiated

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Malformed or truncated frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolDecodeError {
    #[error("unexpected end of frame: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("declared length {declared} exceeds {remaining} remaining bytes")]
    LengthOverflow { declared: usize, remaining: usize },
    #[error("non-minimal length prefix: tag 0x{tag:02x} carrying {length}")]
    NonCanonicalLength { tag: u8, length: usize },
    #[error("token byte {0} outside the dictionary range")]
    TokenOutOfRange(u8),
    #[error("unrecognized tag byte 0x{0:02x}")]
    UnknownTag(u8),
    #[error("frame nesting deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("malformed node: {0}")]
    MalformedNode(String),
}

/// Value that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("list of {0} elements exceeds the 16-bit count prefix")]
    ListTooLong(usize),
    #[error("payload of {0} bytes exceeds the 32-bit length prefix")]
    PayloadTooLarge(usize),
}

/// Authentication or decryption failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    #[error("invalid key material")]
    InvalidKey,
    #[error("malformed ciphertext ({0} bytes)")]
    MalformedCiphertext(usize),
    #[error("ciphertext failed authentication")]
    AuthenticationFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("missing session key: {0}")]
    MissingKey(&'static str),
}

/// Caller-supplied input was malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid phone number {0:?}: expected 10-15 digits with optional leading '+'")]
    InvalidPhoneNumber(String),
    #[error("invalid JID {0:?}")]
    InvalidJid(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} is not a media message kind")]
    NotMedia(&'static str),
    #[error("no media uploader configured")]
    NoMediaUploader,
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Transport-open timeout or abrupt close.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("transport did not open within {0:?}")]
    Timeout(Duration),
    #[error("transport refused: {0}")]
    Refused(String),
    #[error("transport closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection attempt cancelled")]
    Cancelled,
}

/// Handshake rejected or attempted from the wrong state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("server rejected authentication: {0}")]
    Rejected(String),
    #[error("handshake failed: {0}")]
    Handshake(#[from] EncryptionError),
    #[error("invalid authenticator state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("no authentication in progress")]
    NotAuthenticating,
}

/// Webhook delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Transport(String),
    #[error("webhook endpoint answered {status}")]
    Status { status: u16 },
    #[error("webhook body could not be serialized: {0}")]
    Serialize(String),
    #[error("webhook signing failed: {0}")]
    Signing(#[from] EncryptionError),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] ProtocolDecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error("invalid connection state: cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
    #[error("request {0} timed out")]
    RequestTimeout(String),
    #[error("request {id} failed: {reason}")]
    RequestFailed { id: String, reason: String },
    #[error("media upload failed: {0}")]
    MediaUpload(String),
}

pub type Result<T> = std::result::Result<T, Error>;
