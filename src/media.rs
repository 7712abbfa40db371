//! Media upload collaborator.
//!
//! Blob storage lives outside this crate. Callers that want to send media
//! plug in a [`MediaUploader`]; the message stanza only carries the
//! reference it returns.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where an uploaded blob can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    pub direct_path: String,
    /// Base64 media key.
    pub media_key: String,
    /// Hex SHA-256 of the plaintext blob.
    pub sha256: String,
    pub length: u64,
}

impl MediaRef {
    /// Hex SHA-256 digest in the form carried by [`MediaRef::sha256`].
    pub fn digest(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }
}

/// Uploads blobs for media messages.
pub trait MediaUploader: Send + Sync {
    fn upload(&self, data: Vec<u8>, mime_type: String) -> BoxFuture<'static, Result<MediaRef, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest() {
        assert_eq!(
            MediaRef::digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
