use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::normalize_phone_number;
use crate::error::ValidationError;
use crate::webhook::WebhookConfig;

/// Browser user agent presented to the server.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// How a new session is linked to the phone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Scan a QR code.
    #[default]
    Qr,
    /// Enter an 8-character code on the phone.
    PairingCode { phone_number: String },
}

/// Durations are serialized as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub endpoint: String,
    /// `Origin` header sent on connect.
    pub origin: String,
    /// `User-Agent` header sent on connect.
    pub user_agent: String,
    /// Directory holding persisted sessions.
    pub session_dir: String,
    /// Key of the session document.
    pub session_id: String,
    pub auth_method: AuthMethod,
    #[serde(with = "duration_ms")]
    pub qr_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub qr_refresh_interval: Duration,
    #[serde(with = "duration_ms")]
    pub pairing_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Base of the linear reconnect backoff.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    pub retry_count: u32,
    pub auto_reconnect: bool,
    #[serde(with = "duration_ms")]
    pub keep_alive_interval: Duration,
    /// How long an IQ query waits for its result.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    pub webhook: Option<WebhookConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://web.whatsapp.com/ws/chat".into(),
            origin: "https://web.whatsapp.com".into(),
            user_agent: DEFAULT_USER_AGENT.into(),
            session_dir: "./data/sessions".into(),
            session_id: "default".into(),
            auth_method: AuthMethod::Qr,
            qr_timeout: Duration::from_secs(60),
            qr_refresh_interval: Duration::from_secs(20),
            pairing_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
            retry_count: 5,
            auto_reconnect: true,
            keep_alive_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(20),
            webhook: None,
        }
    }
}

impl ClientConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ValidationError::Config(format!("{}: {e}", path.as_ref().display())))?;
        serde_json::from_str(&data).map_err(|e| ValidationError::Config(e.to_string()))
    }

    /// Check the configuration before connecting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.endpoint.starts_with("wss://") || self.endpoint.starts_with("ws://")) {
            return Err(ValidationError::Config(format!(
                "endpoint must be a ws:// or wss:// URL, got {:?}",
                self.endpoint
            )));
        }
        if self.session_id.is_empty() {
            return Err(ValidationError::Empty("session_id"));
        }
        for (name, value) in [
            ("qr_timeout", self.qr_timeout),
            ("qr_refresh_interval", self.qr_refresh_interval),
            ("pairing_timeout", self.pairing_timeout),
            ("connect_timeout", self.connect_timeout),
            ("keep_alive_interval", self.keep_alive_interval),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ValidationError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.auto_reconnect && self.retry_delay.is_zero() {
            return Err(ValidationError::Config("retry_delay must be non-zero".into()));
        }
        if let AuthMethod::PairingCode { phone_number } = &self.auth_method {
            normalize_phone_number(phone_number)?;
        }
        if let Some(webhook) = &self.webhook {
            webhook.validate()?;
        }
        Ok(())
    }

    /// Override the WebSocket endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Override the session directory.
    pub fn with_session_dir(mut self, dir: impl Into<String>) -> Self {
        self.session_dir = dir.into();
        self
    }

    /// Override the session id.
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    /// Link with a pairing code instead of a QR code.
    pub fn with_pairing_code(mut self, phone_number: impl Into<String>) -> Self {
        self.auth_method = AuthMethod::PairingCode {
            phone_number: phone_number.into(),
        };
        self
    }

    /// Override QR expiry and refresh intervals.
    pub fn with_qr_timing(mut self, timeout: Duration, refresh_interval: Duration) -> Self {
        self.qr_timeout = timeout;
        self.qr_refresh_interval = refresh_interval;
        self
    }

    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the reconnect policy.
    pub fn with_retry(mut self, delay: Duration, count: u32) -> Self {
        self.retry_delay = delay;
        self.retry_count = count;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Forward events to a webhook.
    pub fn with_webhook(mut self, webhook: WebhookConfig) -> Self {
        self.webhook = Some(webhook);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint, "wss://web.whatsapp.com/ws/chat");
        assert_eq!(config.qr_timeout, Duration::from_secs(60));
        assert_eq!(config.retry_delay, Duration::from_millis(5000));
        assert_eq!(config.retry_count, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::default()
            .with_endpoint("ws://127.0.0.1:9000")
            .with_session_id("work")
            .with_retry(Duration::from_secs(1), 3)
            .with_pairing_code("+1 234-567-8900");
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.session_id, "work");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::default().with_endpoint("https://x").validate().is_err());
        assert!(ClientConfig::default().with_session_id("").validate().is_err());
        assert!(ClientConfig::default().with_pairing_code("12345").validate().is_err());
        assert!(ClientConfig::default()
            .with_keep_alive_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_json_uses_milliseconds_and_defaults() {
        let json = serde_json::to_value(ClientConfig::default()).unwrap();
        assert_eq!(json["retry_delay"], 5000);
        assert_eq!(json["auth_method"]["type"], "qr");

        let parsed: ClientConfig =
            serde_json::from_str(r#"{"retry_count": 2, "auth_method": {"type": "pairing_code", "phone_number": "15551234567"}}"#)
                .unwrap();
        assert_eq!(parsed.retry_count, 2);
        assert_eq!(parsed.qr_timeout, Duration::from_secs(60));
        assert!(matches!(parsed.auth_method, AuthMethod::PairingCode { .. }));
    }
}
