//! Curve25519 key pairs for the handshake.

use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// A Curve25519 key pair used for key agreement with the server.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Public key (32 bytes)
    pub public: [u8; 32],
    /// Private key (32 bytes)
    pub private: [u8; 32],
}

impl KeyPair {
    /// Generate a new random key pair from the OS random source.
    pub fn generate() -> Self {
        let mut private = [0u8; 32];
        OsRng.fill_bytes(&mut private);

        // Curve25519 clamping
        private[0] &= 248;
        private[31] &= 127;
        private[31] |= 64;

        Self::from_private_key(private)
    }

    /// Create a key pair from an existing private key.
    pub fn from_private_key(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);

        Self {
            public: *public.as_bytes(),
            private,
        }
    }

    /// Get the public key as bytes.
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// Get the private key as bytes.
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private
    }

    /// Perform X25519 Diffie-Hellman key agreement.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private);
        let their_key = PublicKey::from(*their_public);
        *secret.diffie_hellman(&their_key).as_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .field("private", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_ne!(kp.public, [0u8; 32]);
        assert_ne!(kp.private, [0u8; 32]);
        assert_ne!(KeyPair::generate().private, kp.private);
    }

    #[test]
    fn test_from_private_key_is_stable() {
        let kp = KeyPair::generate();
        assert_eq!(KeyPair::from_private_key(kp.private), kp);
    }

    #[test]
    fn test_debug_redacts_private() {
        let kp = KeyPair::generate();
        let shown = format!("{kp:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains(&hex::encode(kp.private)));
    }
}
