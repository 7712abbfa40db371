//! Cryptographic operations used by the handshake and session layer.
//!
//! Symmetric encryption is AES-256-GCM with a fresh random 96-bit nonce
//! prepended to every ciphertext. Key agreement is X25519, signatures are
//! Ed25519 and all digests are HMAC-SHA256.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use super::hkdf::Hkdf;
use super::keypair::KeyPair;
use crate::error::EncryptionError;
use crate::store::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Nonce length prepended to every ciphertext.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;
/// Length of generated session tokens.
pub const TOKEN_LEN: usize = 32;

const SESSION_KEY_INFO: &[u8] = b"WA Web Session Keys";

/// Handshake payload sent to the server.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthPayload {
    pub client_id: Vec<u8>,
    pub public_key: [u8; 32],
    pub server_token: Vec<u8>,
    pub client_token: Vec<u8>,
    pub enc_key: [u8; 32],
    pub mac_key: [u8; 32],
}

impl std::fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPayload")
            .field("client_id", &hex::encode(&self.client_id))
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

/// Generate a fresh key pair from the OS random source.
pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// X25519 shared secret. `derive(a.private, b.public) == derive(b.private, a.public)`.
pub fn derive_shared_secret(our_private: &[u8; 32], their_public: &[u8; 32]) -> [u8; 32] {
    KeyPair::from_private_key(*our_private).dh(their_public)
}

/// Encrypt with AES-256-GCM. Output is `nonce || ciphertext || tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKey)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt the output of [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, EncryptionError> {
    if ciphertext.len() < NONCE_LEN + TAG_LEN {
        return Err(EncryptionError::MalformedCiphertext(ciphertext.len()));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKey)?;
    let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| EncryptionError::AuthenticationFailed)
}

/// Ed25519 public key for a signing seed.
pub fn signing_public_key(private_key: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(private_key).verifying_key().to_bytes()
}

/// Detached Ed25519 signature.
pub fn sign(message: &[u8], private_key: &[u8; 32]) -> [u8; 64] {
    SigningKey::from_bytes(private_key).sign(message).to_bytes()
}

/// Verify a detached signature. Malformed keys or signatures verify as false.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Ok(public_key) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// HMAC-SHA256 digest.
pub fn hmac(message: &[u8], key: &[u8]) -> Result<[u8; 32], EncryptionError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| EncryptionError::InvalidKey)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time HMAC check.
pub fn verify_hmac(message: &[u8], key: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

/// Split HKDF output over a shared secret into `(enc_key, mac_key)`.
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    salt: Option<&[u8]>,
) -> Result<([u8; 32], [u8; 32]), EncryptionError> {
    let derived = Hkdf::derive(salt, shared_secret, SESSION_KEY_INFO, 64)?;
    let mut enc_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    enc_key.copy_from_slice(&derived[..32]);
    mac_key.copy_from_slice(&derived[32..]);
    Ok((enc_key, mac_key))
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Build the handshake payload, filling in any missing tokens or keys.
///
/// Fields already present are kept, so calling this twice yields the same
/// payload.
pub fn derive_auth_payload(credentials: &mut Credentials) -> AuthPayload {
    let server_token = credentials
        .server_token
        .get_or_insert_with(|| random_bytes::<TOKEN_LEN>().to_vec())
        .clone();
    let client_token = credentials
        .client_token
        .get_or_insert_with(|| random_bytes::<TOKEN_LEN>().to_vec())
        .clone();
    let enc_key = *credentials.enc_key.get_or_insert_with(random_bytes::<32>);
    let mac_key = *credentials.mac_key.get_or_insert_with(random_bytes::<32>);

    AuthPayload {
        client_id: credentials.client_id.clone(),
        public_key: credentials.public_key,
        server_token,
        client_token,
        enc_key,
        mac_key,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_key_agreement_commutes() {
        let a = generate_key_pair();
        let b = generate_key_pair();
        assert_eq!(
            derive_shared_secret(&a.private, &b.public),
            derive_shared_secret(&b.private, &a.public)
        );
        assert_eq!(
            derive_shared_secret(&a.private, &b.public),
            derive_shared_secret(&a.private, &b.public)
        );
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0x42; 32];
        for message in [&b""[..], &b"hello"[..], &[0u8; 4096][..]] {
            let sealed = encrypt(message, &key).unwrap();
            assert_eq!(sealed.len(), NONCE_LEN + message.len() + TAG_LEN);
            assert_eq!(decrypt(&sealed, &key).unwrap(), message);
        }
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let key = [0x01; 32];
        assert_ne!(encrypt(b"same", &key).unwrap(), encrypt(b"same", &key).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"secret", &[1; 32]).unwrap();
        assert_eq!(decrypt(&sealed, &[2; 32]), Err(EncryptionError::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [3; 32];
        let mut sealed = encrypt(b"secret", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(decrypt(&sealed, &key), Err(EncryptionError::AuthenticationFailed));
    }

    #[test]
    fn test_short_ciphertext_is_malformed() {
        assert_eq!(
            decrypt(&[0u8; 20], &[0; 32]),
            Err(EncryptionError::MalformedCiphertext(20))
        );
    }

    #[test]
    fn test_sign_verify() {
        let seed = generate_key_pair().private;
        let public = signing_public_key(&seed);
        let signature = sign(b"payload", &seed);

        assert!(verify(b"payload", &signature, &public));
        assert!(!verify(b"other", &signature, &public));
        assert!(!verify(b"payload", &[0u8; 64], &public));
        assert!(!verify(b"payload", &signature[..10], &public));
        assert!(!verify(b"payload", &signature, &[0u8; 5]));
    }

    #[test]
    fn test_hmac_rfc4231_case_2() {
        let tag = hmac(b"what do ya want for nothing?", b"Jefe").unwrap();
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert!(verify_hmac(b"what do ya want for nothing?", b"Jefe", &tag));
        assert!(!verify_hmac(b"tampered", b"Jefe", &tag));
    }

    #[test]
    fn test_session_keys_are_distinct_and_stable() {
        let secret = [9u8; 32];
        let (enc, mac) = derive_session_keys(&secret, None).unwrap();
        assert_ne!(enc, mac);
        assert_eq!(derive_session_keys(&secret, None).unwrap(), (enc, mac));
    }

    #[test]
    fn test_auth_payload_is_idempotent() {
        let mut creds = Credentials::generate();
        let first = derive_auth_payload(&mut creds);
        let second = derive_auth_payload(&mut creds);
        assert_eq!(first, second);
        assert_eq!(first.client_id, creds.client_id);
        assert_eq!(first.server_token.len(), TOKEN_LEN);
        assert!(creds.can_resume());
        assert!(creds.has_session_keys());
    }

    #[test]
    fn test_auth_payload_keeps_present_fields() {
        let mut creds = Credentials::generate();
        creds.server_token = Some(b"server".to_vec());
        creds.enc_key = Some([5; 32]);
        let payload = derive_auth_payload(&mut creds);
        assert_eq!(payload.server_token, b"server");
        assert_eq!(payload.enc_key, [5; 32]);
        assert_eq!(payload.client_token.len(), TOKEN_LEN);
    }

    proptest! {
        #[test]
        fn prop_encrypt_decrypt_roundtrip(
            message in prop::collection::vec(any::<u8>(), 0..4096),
            key in any::<[u8; 32]>(),
        ) {
            let sealed = encrypt(&message, &key).unwrap();
            prop_assert_eq!(decrypt(&sealed, &key).unwrap(), message);
        }

        #[test]
        fn prop_wrong_key_never_decrypts(
            message in prop::collection::vec(any::<u8>(), 0..256),
            key in any::<[u8; 32]>(),
            other in any::<[u8; 32]>(),
        ) {
            prop_assume!(key != other);
            let sealed = encrypt(&message, &key).unwrap();
            prop_assert!(decrypt(&sealed, &other).is_err());
        }
    }
}
