//! Outbound webhook delivery.
//!
//! A [`WebhookForwarder`] listens on the [`EventBus`], keeps the events named
//! in its allow-list and posts each one as JSON:
//!
//! ```json
//! {"event": "message.new", "timestamp": 1700000000000, "data": {...}, "signature": "..."}
//! ```
//!
//! `signature` is present when a secret is configured. It is the hex
//! HMAC-SHA256 of the serialized `{event, timestamp, data}` object.
//! Delivery happens on a dedicated thread so publishers never wait on HTTP.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto;
use crate::error::{Result, ValidationError, WebhookError};
use crate::event_bus::{EventBus, SubscriptionId};
use crate::types::Event;

/// Where and what to forward.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    /// Event names to forward, e.g. `"message.new"`.
    pub events: Vec<String>,
    /// HMAC key for the `signature` field.
    pub secret: Option<String>,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return Err(ValidationError::Config(format!(
                "webhook url must be an http:// or https:// URL, got {:?}",
                self.url
            )));
        }
        if let Some(unknown) = self.events.iter().find(|e| !Event::NAMES.contains(&e.as_str())) {
            return Err(ValidationError::Config(format!("unknown webhook event {unknown:?}")));
        }
        if matches!(&self.secret, Some(secret) if secret.is_empty()) {
            return Err(ValidationError::Empty("webhook secret"));
        }
        Ok(())
    }

    /// Whether `event` is on the allow-list.
    pub fn forwards(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}

/// The signed part of a webhook body. Fields serialize in declaration order.
#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a str,
    timestamp: i64,
    data: &'a Value,
}

#[derive(Serialize)]
struct SignedEnvelope<'a> {
    #[serde(flatten)]
    envelope: Envelope<'a>,
    signature: String,
}

/// Build the JSON POST body for one event.
pub fn build_payload(
    event: &str,
    timestamp: i64,
    data: &Value,
    secret: Option<&str>,
) -> std::result::Result<String, WebhookError> {
    let envelope = Envelope { event, timestamp, data };
    let unsigned = serde_json::to_string(&envelope).map_err(|e| WebhookError::Serialize(e.to_string()))?;
    let Some(secret) = secret else {
        return Ok(unsigned);
    };
    let tag = crypto::hmac(unsigned.as_bytes(), secret.as_bytes())?;
    serde_json::to_string(&SignedEnvelope {
        envelope,
        signature: hex::encode(tag),
    })
    .map_err(|e| WebhookError::Serialize(e.to_string()))
}

/// Delivers webhook bodies.
pub trait WebhookSink: Send + Sync {
    /// `body` is the serialized JSON document.
    fn deliver(&self, url: &str, body: &str) -> std::result::Result<(), WebhookError>;
}

/// Posts JSON bodies with `ureq`.
pub struct UreqSink {
    agent: ureq::Agent,
}

impl UreqSink {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for UreqSink {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl WebhookSink for UreqSink {
    fn deliver(&self, url: &str, body: &str) -> std::result::Result<(), WebhookError> {
        let request = self.agent.post(url).set("Content-Type", "application/json");
        match request.send_string(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => Err(WebhookError::Status { status }),
            Err(e) => Err(WebhookError::Transport(e.to_string())),
        }
    }
}

/// Forwards allow-listed bus events to a webhook until dropped.
pub struct WebhookForwarder {
    bus: EventBus,
    subscription: SubscriptionId,
}

impl WebhookForwarder {
    /// Attach with an HTTP sink.
    pub fn attach(bus: &EventBus, config: WebhookConfig) -> Result<Self> {
        Self::attach_with_sink(bus, config, Arc::new(UreqSink::default()))
    }

    pub fn attach_with_sink(bus: &EventBus, config: WebhookConfig, sink: Arc<dyn WebhookSink>) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::channel::<String>();
        let url = config.url.clone();
        thread::Builder::new()
            .name("webhook".into())
            .spawn(move || {
                for body in rx {
                    if let Err(e) = sink.deliver(&url, &body) {
                        warn!("webhook delivery to {url} failed: {e}");
                    }
                }
                debug!("webhook worker stopped");
            })
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        let subscription = bus.subscribe_all(move |event| {
            let name = event.name();
            if !config.forwards(name) {
                return;
            }
            let timestamp = chrono::Utc::now().timestamp_millis();
            match build_payload(name, timestamp, &event.data(), config.secret.as_deref()) {
                Ok(body) => {
                    if tx.send(body).is_err() {
                        warn!("webhook worker gone, dropping {name}");
                    }
                }
                Err(e) => warn!("webhook payload for {name} failed: {e}"),
            }
        });
        Ok(Self {
            bus: bus.clone(),
            subscription,
        })
    }
}

impl Drop for WebhookForwarder {
    fn drop(&mut self) {
        // Dropping the handler closes the channel and ends the worker.
        self.bus.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::error::Error;

    struct Recorder {
        tx: Mutex<mpsc::Sender<(String, Value)>>,
    }

    impl WebhookSink for Recorder {
        fn deliver(&self, url: &str, body: &str) -> std::result::Result<(), WebhookError> {
            let body = serde_json::from_str(body).unwrap();
            let _ = self.tx.lock().unwrap().send((url.to_string(), body));
            Ok(())
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::Receiver<(String, Value)>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Recorder { tx: Mutex::new(tx) }), rx)
    }

    #[test]
    fn test_validate() {
        assert!(WebhookConfig::new("https://hooks.example.com/wa").validate().is_ok());
        assert!(WebhookConfig::new("ftp://hooks.example.com").validate().is_err());
        assert!(WebhookConfig::new("http://localhost:8080")
            .with_events(["message.new", "nonsense"])
            .validate()
            .is_err());
        assert_eq!(
            WebhookConfig::new("http://localhost").with_secret("").validate(),
            Err(ValidationError::Empty("webhook secret"))
        );
    }

    #[test]
    fn test_payload_field_order() {
        let body = build_payload("qr", 42, &json!("ref,key"), None).unwrap();
        assert_eq!(body, r#"{"event":"qr","timestamp":42,"data":"ref,key"}"#);
    }

    #[test]
    fn test_payload_signature() {
        let body = build_payload("qr", 42, &json!("ref,key"), Some("s3cret")).unwrap();
        let expected = crypto::hmac(br#"{"event":"qr","timestamp":42,"data":"ref,key"}"#, b"s3cret").unwrap();
        assert_eq!(
            body,
            format!(
                r#"{{"event":"qr","timestamp":42,"data":"ref,key","signature":"{}"}}"#,
                hex::encode(expected)
            )
        );
    }

    #[test]
    fn test_forwards_only_allowed_events() {
        let bus = EventBus::new();
        let (sink, rx) = recorder();
        let config = WebhookConfig::new("http://localhost/hook").with_events(["qr"]);
        let forwarder = WebhookForwarder::attach_with_sink(&bus, config, sink).unwrap();

        bus.publish(&Event::Disconnected);
        bus.publish(&Event::Qr("ref,pub,id,adv".into()));

        let (url, body) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(url, "http://localhost/hook");
        assert_eq!(body["event"], "qr");
        assert_eq!(body["data"], "ref,pub,id,adv");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(forwarder);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_attach_rejects_invalid_config() {
        let bus = EventBus::new();
        let (sink, _rx) = recorder();
        let result = WebhookForwarder::attach_with_sink(&bus, WebhookConfig::new("not a url"), sink);
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
