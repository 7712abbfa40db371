//! Session credential material and its persisted form.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::KeyPair;
use crate::store::{StoreError, StoreResult};

/// Credentials for one linked session.
///
/// Fields are crate-private: outside code reads them through accessors and
/// never gets a mutable reference.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub(crate) client_id: Vec<u8>,
    pub(crate) private_key: [u8; 32],
    pub(crate) public_key: [u8; 32],
    pub(crate) server_token: Option<Vec<u8>>,
    pub(crate) client_token: Option<Vec<u8>>,
    pub(crate) enc_key: Option<[u8; 32]>,
    pub(crate) mac_key: Option<[u8; 32]>,
    pub(crate) wid: Option<String>,
}

impl Credentials {
    /// Fresh credentials: random client id and a new key pair.
    pub fn generate() -> Self {
        let key_pair = KeyPair::generate();
        Self {
            client_id: uuid::Uuid::new_v4().as_bytes().to_vec(),
            private_key: key_pair.private,
            public_key: key_pair.public,
            server_token: None,
            client_token: None,
            enc_key: None,
            mac_key: None,
            wid: None,
        }
    }

    pub fn client_id(&self) -> &[u8] {
        &self.client_id
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn wid(&self) -> Option<&str> {
        self.wid.as_deref()
    }

    pub(crate) fn key_pair(&self) -> KeyPair {
        KeyPair::from_private_key(self.private_key)
    }

    /// True once a handshake has produced both session tokens.
    pub fn can_resume(&self) -> bool {
        self.server_token.is_some() && self.client_token.is_some()
    }

    /// True once both session keys are present.
    pub fn has_session_keys(&self) -> bool {
        self.enc_key.is_some() && self.mac_key.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &hex::encode(&self.client_id))
            .field("public_key", &hex::encode(self.public_key))
            .field("private_key", &"[REDACTED]")
            .field("has_tokens", &self.can_resume())
            .field("has_session_keys", &self.has_session_keys())
            .field("wid", &self.wid)
            .finish()
    }
}

/// Last-known profile of the logged-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Persisted session document.
///
/// Binary fields are base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub client_id: String,
    pub private_key: String,
    pub public_key: String,
    #[serde(default)]
    pub server_token: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub enc_key: Option<String>,
    #[serde(default)]
    pub mac_key: Option<String>,
    #[serde(default)]
    pub wid: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
    pub saved_at: DateTime<Utc>,
}

fn decode_b64(field: &str, value: &str) -> StoreResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| StoreError::SerializationError(format!("{field}: {e}")))
}

fn decode_key(field: &str, value: &str) -> StoreResult<[u8; 32]> {
    decode_b64(field, value)?
        .try_into()
        .map_err(|_| StoreError::SerializationError(format!("{field}: expected 32 bytes")))
}

impl SessionRecord {
    /// Build the persisted form of a session.
    pub fn new(credentials: &Credentials, user: Option<UserProfile>) -> Self {
        Self {
            client_id: BASE64.encode(&credentials.client_id),
            private_key: BASE64.encode(credentials.private_key),
            public_key: BASE64.encode(credentials.public_key),
            server_token: credentials.server_token.as_ref().map(|t| BASE64.encode(t)),
            client_token: credentials.client_token.as_ref().map(|t| BASE64.encode(t)),
            enc_key: credentials.enc_key.map(|k| BASE64.encode(k)),
            mac_key: credentials.mac_key.map(|k| BASE64.encode(k)),
            wid: credentials.wid.clone(),
            user,
            saved_at: Utc::now(),
        }
    }

    /// Restore credentials from the persisted form.
    pub fn credentials(&self) -> StoreResult<Credentials> {
        let private_key = decode_key("privateKey", &self.private_key)?;
        let public_key = decode_key("publicKey", &self.public_key)?;
        if KeyPair::from_private_key(private_key).public != public_key {
            return Err(StoreError::SerializationError(
                "publicKey does not match privateKey".to_string(),
            ));
        }
        Ok(Credentials {
            client_id: decode_b64("clientId", &self.client_id)?,
            private_key,
            public_key,
            server_token: self
                .server_token
                .as_deref()
                .map(|t| decode_b64("serverToken", t))
                .transpose()?,
            client_token: self
                .client_token
                .as_deref()
                .map(|t| decode_b64("clientToken", t))
                .transpose()?,
            enc_key: self.enc_key.as_deref().map(|k| decode_key("encKey", k)).transpose()?,
            mac_key: self.mac_key.as_deref().map(|k| decode_key("macKey", k)).transpose()?,
            wid: self.wid.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_credentials() {
        let creds = Credentials::generate();
        assert_eq!(creds.client_id().len(), 16);
        assert!(!creds.can_resume());
        assert!(!creds.has_session_keys());
        assert_eq!(creds.key_pair().public, *creds.public_key());
    }

    #[test]
    fn test_record_restores_credentials() {
        let mut creds = Credentials::generate();
        creds.server_token = Some(vec![1, 2, 3]);
        creds.client_token = Some(vec![4, 5, 6]);
        creds.enc_key = Some([7; 32]);
        creds.mac_key = Some([8; 32]);
        creds.wid = Some("15551234567@s.whatsapp.net".into());

        let record = SessionRecord::new(&creds, None);
        assert_eq!(record.credentials().unwrap(), creds);
    }

    #[test]
    fn test_record_json_layout() {
        let record = SessionRecord::new(&Credentials::generate(), None);
        let json = serde_json::to_value(&record).unwrap();
        for field in ["clientId", "privateKey", "publicKey", "serverToken", "savedAt"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_record_rejects_mismatched_keys() {
        let mut record = SessionRecord::new(&Credentials::generate(), None);
        record.public_key = BASE64.encode([9u8; 32]);
        assert!(record.credentials().is_err());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let creds = Credentials::generate();
        assert!(!format!("{creds:?}").contains(&hex::encode(creds.private_key)));
    }
}
