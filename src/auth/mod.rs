//! Authentication challenges for linking a new session.
//!
//! Two variants exist: [`QrAuthenticator`] shows a QR string to scan and
//! [`PairingCodeAuthenticator`] produces an 8-character code to type on the
//! phone. Both own their challenge and their timers, and cancel every timer
//! on success or reset.

mod pairing;
mod qr;

use lazy_static::lazy_static;
use regex::Regex;

pub use pairing::{PairingChallenge, PairingCodeAuthenticator, PairingRequest, PairingState};
pub use qr::{QrAuthenticator, QrChallenge, QrState};

use crate::error::ValidationError;

lazy_static! {
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[0-9]{10,15}$").expect("valid phone regex");
}

/// Which authenticator drives a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Qr,
    PairingCode,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Qr => "qr",
            AuthKind::PairingCode => "pairing_code",
        }
    }
}

/// Behaviour shared by both authenticators.
pub trait Authenticator: Send + Sync {
    fn kind(&self) -> AuthKind;

    /// The server accepted the challenge: cancel timers and drop the challenge.
    fn consume_success(&self);

    /// Cancel timers, discard the challenge and return to idle.
    fn reset(&self);

    /// A challenge is outstanding and has not expired.
    fn is_pending(&self) -> bool;
}

/// The authenticator of an in-progress login.
#[derive(Clone)]
pub enum ActiveAuth {
    Qr(QrAuthenticator),
    Pairing(PairingCodeAuthenticator),
}

impl ActiveAuth {
    pub fn as_authenticator(&self) -> &dyn Authenticator {
        match self {
            ActiveAuth::Qr(qr) => qr,
            ActiveAuth::Pairing(pairing) => pairing,
        }
    }
}

/// Validate a phone number and reduce it to digits.
///
/// Spaces, dashes, dots and parentheses are ignored. What remains must be
/// 10 to 15 digits with an optional leading `+`.
pub fn normalize_phone_number(input: &str) -> Result<String, ValidationError> {
    let compact: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if !PHONE_RE.is_match(&compact) {
        return Err(ValidationError::InvalidPhoneNumber(input.to_string()));
    }
    Ok(compact.trim_start_matches('+').to_string())
}
