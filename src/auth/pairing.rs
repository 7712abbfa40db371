//! Pairing-code login.
//!
//! `Idle -> Requested -> {Expired | Authenticated}`. The code is generated
//! locally but only surfaced as a `pairing_code` event once the server has
//! acknowledged the request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use rand::rngs::OsRng;
use rand::Rng;

use super::{normalize_phone_number, AuthKind, Authenticator};
use crate::error::{AuthError, Error};
use crate::event_bus::EventBus;
use crate::store::Credentials;
use crate::timer::{ScheduledTask, TaskSet};
use crate::types::Event;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LEN: usize = 8;

/// State of the pairing login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Requested,
    Expired,
    Authenticated,
}

impl PairingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingState::Idle => "idle",
            PairingState::Requested => "requested",
            PairingState::Expired => "expired",
            PairingState::Authenticated => "authenticated",
        }
    }
}

/// One outstanding pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingChallenge {
    pub phone_number: String,
    pub client_id: Vec<u8>,
    pub public_key: [u8; 32],
    pub code: String,
    pub issued_at: DateTime<Utc>,
    /// Server acknowledged the request and the code was published.
    pub confirmed: bool,
}

/// Payload forwarded to the server to start pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub client_id: Vec<u8>,
    pub public_key: [u8; 32],
    pub phone_number: String,
}

struct PairingInner {
    state: PairingState,
    challenge: Option<PairingChallenge>,
    generation: u64,
    timers: TaskSet,
}

/// Pairing-code authenticator. Cloning shares the same challenge.
#[derive(Clone)]
pub struct PairingCodeAuthenticator {
    inner: Arc<Mutex<PairingInner>>,
    bus: EventBus,
    timeout: Duration,
}

fn generate_code() -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[OsRng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

impl PairingCodeAuthenticator {
    pub fn new(bus: EventBus, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PairingInner {
                state: PairingState::Idle,
                challenge: None,
                generation: 0,
                timers: TaskSet::new(),
            })),
            bus,
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PairingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PairingState {
        self.lock().state
    }

    pub fn challenge(&self) -> Option<PairingChallenge> {
        self.lock().challenge.clone()
    }

    /// Start pairing for `phone_number`.
    ///
    /// The number is validated before anything else happens; an invalid
    /// number leaves the authenticator untouched. Valid from `Idle` or
    /// `Expired`. Must be called inside a tokio runtime.
    pub fn request_challenge(
        &self,
        phone_number: &str,
        credentials: &Credentials,
    ) -> Result<PairingRequest, Error> {
        let phone_number = normalize_phone_number(phone_number)?;

        let mut inner = self.lock();
        if !matches!(inner.state, PairingState::Idle | PairingState::Expired) {
            return Err(AuthError::InvalidState {
                expected: "idle or expired",
                actual: inner.state.as_str(),
            }
            .into());
        }

        inner.timers.cancel_all();
        inner.generation += 1;
        inner.challenge = Some(PairingChallenge {
            phone_number: phone_number.clone(),
            client_id: credentials.client_id().to_vec(),
            public_key: *credentials.public_key(),
            code: generate_code(),
            issued_at: Utc::now(),
            confirmed: false,
        });
        inner.state = PairingState::Requested;

        let generation = inner.generation;
        let weak = Arc::downgrade(&self.inner);
        let bus = self.bus.clone();
        inner.timers.insert(
            "expiry",
            ScheduledTask::after(self.timeout, move || {
                let expired = weak.upgrade().is_some_and(|inner| {
                    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    if inner.generation != generation || inner.state != PairingState::Requested {
                        return false;
                    }
                    inner.state = PairingState::Expired;
                    true
                });
                if expired {
                    info!("pairing code expired");
                    bus.publish(&Event::PairingCodeExpired);
                }
            }),
        );
        info!("requested pairing code for {} digits", phone_number.len());

        Ok(PairingRequest {
            client_id: credentials.client_id().to_vec(),
            public_key: *credentials.public_key(),
            phone_number,
        })
    }

    /// The server acknowledged the request: publish the code.
    ///
    /// Returns the code, or `None` when no request is outstanding. The code is
    /// published once per request.
    pub fn confirm_issued(&self) -> Option<String> {
        let code = {
            let mut inner = self.lock();
            if inner.state != PairingState::Requested {
                return None;
            }
            let challenge = inner.challenge.as_mut()?;
            if challenge.confirmed {
                return Some(challenge.code.clone());
            }
            challenge.confirmed = true;
            challenge.code.clone()
        };
        self.bus.publish(&Event::PairingCode { code: code.clone() });
        Some(code)
    }
}

impl Authenticator for PairingCodeAuthenticator {
    fn kind(&self) -> AuthKind {
        AuthKind::PairingCode
    }

    fn consume_success(&self) {
        let mut inner = self.lock();
        inner.timers.cancel_all();
        inner.generation += 1;
        inner.challenge = None;
        inner.state = PairingState::Authenticated;
    }

    fn reset(&self) {
        let mut inner = self.lock();
        inner.timers.cancel_all();
        inner.generation += 1;
        inner.challenge = None;
        inner.state = PairingState::Idle;
    }

    fn is_pending(&self) -> bool {
        self.lock().state == PairingState::Requested
    }
}
