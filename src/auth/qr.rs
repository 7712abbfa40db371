//! QR-code login.
//!
//! `Idle -> Issued -> {Expired | Refreshing | Authenticated}`. While a
//! challenge is issued the refresh task raises `qr_refresh_needed` every
//! refresh interval, and the expiry timer raises `qr_expired` once. A new QR
//! string is only produced when the caller asks for one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::time::Instant;

use super::{AuthKind, Authenticator};
use crate::error::AuthError;
use crate::event_bus::EventBus;
use crate::store::Credentials;
use crate::timer::{ScheduledTask, TaskSet};
use crate::types::Event;

const REF_LEN: usize = 16;

/// State of the QR login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrState {
    Idle,
    Issued,
    Expired,
    Refreshing,
    Authenticated,
}

impl QrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QrState::Idle => "idle",
            QrState::Issued => "issued",
            QrState::Expired => "expired",
            QrState::Refreshing => "refreshing",
            QrState::Authenticated => "authenticated",
        }
    }
}

/// One issued QR challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrChallenge {
    pub reference: String,
    pub public_key: [u8; 32],
    pub client_id: Vec<u8>,
    pub issued_at: DateTime<Utc>,
}

impl QrChallenge {
    /// `ref,publicKeyBase64,clientIdBase64`. Fields are joined without escaping.
    pub fn qr_string(&self) -> String {
        format!(
            "{},{},{}",
            self.reference,
            BASE64.encode(self.public_key),
            BASE64.encode(&self.client_id)
        )
    }
}

struct QrInner {
    state: QrState,
    challenge: Option<QrChallenge>,
    /// Bumped on every issue and reset; timers from older generations do nothing.
    generation: u64,
    timers: TaskSet,
}

/// QR authenticator. Cloning shares the same challenge.
#[derive(Clone)]
pub struct QrAuthenticator {
    inner: Arc<Mutex<QrInner>>,
    bus: EventBus,
    timeout: Duration,
    refresh_interval: Duration,
}

impl QrAuthenticator {
    pub fn new(bus: EventBus, timeout: Duration, refresh_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QrInner {
                state: QrState::Idle,
                challenge: None,
                generation: 0,
                timers: TaskSet::new(),
            })),
            bus,
            timeout,
            refresh_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QrInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> QrState {
        self.lock().state
    }

    pub fn challenge(&self) -> Option<QrChallenge> {
        self.lock().challenge.clone()
    }

    /// Issue a fresh challenge and publish its QR string.
    ///
    /// Valid from `Idle`, `Expired` or `Refreshing`. Must be called inside a
    /// tokio runtime.
    pub fn generate_challenge(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let qr = {
            let mut inner = self.lock();
            if !matches!(inner.state, QrState::Idle | QrState::Expired | QrState::Refreshing) {
                return Err(AuthError::InvalidState {
                    expected: "idle, expired or refreshing",
                    actual: inner.state.as_str(),
                });
            }

            let mut reference = [0u8; REF_LEN];
            OsRng.fill_bytes(&mut reference);
            let challenge = QrChallenge {
                reference: BASE64.encode(reference),
                public_key: *credentials.public_key(),
                client_id: credentials.client_id().to_vec(),
                issued_at: Utc::now(),
            };
            let qr = challenge.qr_string();

            inner.timers.cancel_all();
            inner.generation += 1;
            inner.challenge = Some(challenge);
            inner.state = QrState::Issued;
            self.arm_timers(&mut inner);
            qr
        };
        info!("issued QR challenge");
        self.bus.publish(&Event::Qr(qr.clone()));
        Ok(qr)
    }

    /// Replace an issued challenge with a new one (`Issued -> Refreshing -> Issued`).
    pub fn refresh(&self, credentials: &Credentials) -> Result<String, AuthError> {
        {
            let mut inner = self.lock();
            match inner.state {
                QrState::Issued | QrState::Expired => inner.state = QrState::Refreshing,
                QrState::Refreshing => {}
                other => {
                    return Err(AuthError::InvalidState {
                        expected: "issued or expired",
                        actual: other.as_str(),
                    })
                }
            }
        }
        self.generate_challenge(credentials)
    }

    fn arm_timers(&self, inner: &mut QrInner) {
        let generation = inner.generation;

        let weak = Arc::downgrade(&self.inner);
        let bus = self.bus.clone();
        inner.timers.insert(
            "expiry",
            ScheduledTask::after(self.timeout, move || {
                if expire(&weak, generation) {
                    info!("QR challenge expired");
                    bus.publish(&Event::QrExpired);
                }
            }),
        );

        if self.refresh_interval.is_zero() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let bus = self.bus.clone();
        let (timeout, every) = (self.timeout, self.refresh_interval);
        inner.timers.insert(
            "refresh",
            ScheduledTask::spawn(async move {
                let start = Instant::now();
                let mut k = 1u32;
                while every * k < timeout {
                    tokio::time::sleep_until(start + every * k).await;
                    if !still_issued(&weak, generation) {
                        return;
                    }
                    debug!("QR refresh interval {k} elapsed");
                    bus.publish(&Event::QrRefreshNeeded);
                    k += 1;
                }
            }),
        );
    }
}

fn expire(weak: &Weak<Mutex<QrInner>>, generation: u64) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    if inner.generation != generation || inner.state != QrState::Issued {
        return false;
    }
    inner.state = QrState::Expired;
    inner.timers.cancel("refresh");
    true
}

fn still_issued(weak: &Weak<Mutex<QrInner>>, generation: u64) -> bool {
    weak.upgrade().is_some_and(|inner| {
        let inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.generation == generation && inner.state == QrState::Issued
    })
}

impl Authenticator for QrAuthenticator {
    fn kind(&self) -> AuthKind {
        AuthKind::Qr
    }

    fn consume_success(&self) {
        let mut inner = self.lock();
        inner.timers.cancel_all();
        inner.generation += 1;
        inner.challenge = None;
        inner.state = QrState::Authenticated;
    }

    fn reset(&self) {
        let mut inner = self.lock();
        inner.timers.cancel_all();
        inner.generation += 1;
        inner.challenge = None;
        inner.state = QrState::Idle;
    }

    fn is_pending(&self) -> bool {
        matches!(self.lock().state, QrState::Issued | QrState::Refreshing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &EventBus) -> Arc<Mutex<Vec<(u64, &'static str)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let start = Instant::now();
        bus.subscribe_all(move |e| {
            l.lock()
                .unwrap()
                .push((start.elapsed().as_millis() as u64, e.name()));
        });
        log
    }

    fn qr_auth(bus: &EventBus) -> QrAuthenticator {
        QrAuthenticator::new(bus.clone(), Duration::from_millis(60_000), Duration::from_millis(20_000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_and_expiry_schedule() {
        let bus = EventBus::new();
        let log = recorder(&bus);
        let auth = qr_auth(&bus);
        let creds = Credentials::generate();

        auth.generate_challenge(&creds).unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (0, "qr"),
                (20_000, "qr_refresh_needed"),
                (40_000, "qr_refresh_needed"),
                (60_000, "qr_expired"),
            ]
        );
        assert_eq!(auth.state(), QrState::Expired);
        assert!(!auth.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_string_format() {
        let bus = EventBus::new();
        let auth = qr_auth(&bus);
        let creds = Credentials::generate();

        let qr = auth.generate_challenge(&creds).unwrap();
        let fields: Vec<&str> = qr.split(',').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(BASE64.decode(fields[0]).unwrap().len(), REF_LEN);
        assert_eq!(fields[1], BASE64.encode(creds.public_key()));
        assert_eq!(fields[2], BASE64.encode(creds.client_id()));
        assert_eq!(auth.challenge().unwrap().qr_string(), qr);
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_only_from_valid_states() {
        let bus = EventBus::new();
        let auth = qr_auth(&bus);
        let creds = Credentials::generate();

        let first = auth.generate_challenge(&creds).unwrap();
        assert!(matches!(
            auth.generate_challenge(&creds),
            Err(AuthError::InvalidState { actual: "issued", .. })
        ));

        let second = auth.refresh(&creds).unwrap();
        assert_ne!(first, second);
        assert_eq!(auth.state(), QrState::Issued);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(auth.state(), QrState::Expired);
        assert!(auth.generate_challenge(&creds).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_rearms_timers() {
        let bus = EventBus::new();
        let log = recorder(&bus);
        let auth = qr_auth(&bus);
        let creds = Credentials::generate();

        auth.generate_challenge(&creds).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        auth.refresh(&creds).unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;

        let names: Vec<(u64, &str)> = log.lock().unwrap().clone();
        assert_eq!(
            names,
            vec![
                (0, "qr"),
                (20_000, "qr_refresh_needed"),
                (30_000, "qr"),
                (50_000, "qr_refresh_needed"),
                (70_000, "qr_refresh_needed"),
                (90_000, "qr_expired"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_and_reset_cancel_timers() {
        let bus = EventBus::new();
        let log = recorder(&bus);
        let auth = qr_auth(&bus);
        let creds = Credentials::generate();

        auth.generate_challenge(&creds).unwrap();
        auth.consume_success();
        assert_eq!(auth.state(), QrState::Authenticated);
        assert!(auth.challenge().is_none());
        assert!(auth.generate_challenge(&creds).is_err());

        auth.reset();
        assert_eq!(auth.state(), QrState::Idle);
        auth.generate_challenge(&creds).unwrap();
        auth.reset();

        tokio::time::sleep(Duration::from_secs(120)).await;
        let names: Vec<&str> = log.lock().unwrap().iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["qr", "qr"]);
    }
}
