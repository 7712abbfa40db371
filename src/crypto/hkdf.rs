//! HKDF-SHA256 key derivation.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::EncryptionError;

type HmacSha256 = Hmac<Sha256>;

/// Longest output a single expand can produce (255 blocks).
pub const MAX_OUTPUT: usize = 255 * 32;

/// HKDF-SHA256 key derivation.
pub struct Hkdf {
    prk: [u8; 32],
}

impl Hkdf {
    /// Extract a pseudorandom key from the input key material and salt.
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Result<Self, EncryptionError> {
        let salt = salt.unwrap_or(&[0u8; 32]);
        let mut mac = HmacSha256::new_from_slice(salt).map_err(|_| EncryptionError::InvalidKey)?;
        mac.update(ikm);
        let prk: [u8; 32] = mac.finalize().into_bytes().into();

        Ok(Self { prk })
    }

    /// Expand the key to the desired length with optional info.
    pub fn expand(&self, info: &[u8], length: usize) -> Result<Vec<u8>, EncryptionError> {
        if length > MAX_OUTPUT {
            return Err(EncryptionError::InvalidKey);
        }
        let mut output = Vec::with_capacity(length);
        let mut t = Vec::new();
        let mut counter = 1u8;

        while output.len() < length {
            let mut mac =
                HmacSha256::new_from_slice(&self.prk).map_err(|_| EncryptionError::InvalidKey)?;
            mac.update(&t);
            mac.update(info);
            mac.update(&[counter]);
            t = mac.finalize().into_bytes().to_vec();

            let to_copy = (length - output.len()).min(t.len());
            output.extend_from_slice(&t[..to_copy]);

            counter = counter.wrapping_add(1);
        }

        Ok(output)
    }

    /// Extract and expand in one call.
    pub fn derive(
        salt: Option<&[u8]>,
        ikm: &[u8],
        info: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, EncryptionError> {
        Self::new(salt, ikm)?.expand(info, length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_rfc5869_case_1() {
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let output = Hkdf::derive(Some(&salt), &ikm, &info, 42).unwrap();
        assert_eq!(
            hex::encode(output),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_hkdf_no_salt() {
        let output = Hkdf::derive(None, b"input key material", b"info", 32).unwrap();
        assert_eq!(output.len(), 32);
    }

    #[test]
    fn test_hkdf_rejects_oversized_output() {
        assert!(Hkdf::derive(None, b"ikm", b"", MAX_OUTPUT + 1).is_err());
    }
}
