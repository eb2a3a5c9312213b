//! Credential envelope encryption using AES-256-GCM
//!
//! This module seals and opens the versioned credential envelopes persisted
//! by the vault, using AES-256-GCM with additional authenticated data (AAD)
//! binding each envelope to its connection. Consumers must reject unknown
//! version or algorithm values rather than guess.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Envelope format version this build writes and accepts.
pub const ENVELOPE_VERSION: u32 = 1;

/// The only algorithm this build writes and accepts.
pub const ENVELOPE_ALGORITHM: &str = "aes-256-gcm";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("key material is not valid base64: {0}")]
    InvalidKeyEncoding(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: authentication tag did not verify")]
    DecryptionFailed,
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported envelope algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Secure wrapper for the operator-supplied key material, zeroized on drop.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey(Vec<u8>);

impl VaultKey {
    /// Create a key from raw bytes; must be exactly 32 bytes.
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(VaultKey(bytes))
    }

    /// Create a key from a base64-encoded string.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Self::new(bytes)
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The persisted envelope: every byte field is base64-encoded.
///
/// Serialized form: `{"version": 1, "algorithm": "aes-256-gcm", "iv": …,
/// "authTag": …, "ciphertext": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEnvelope {
    pub version: u32,
    pub algorithm: String,
    pub iv: String,
    pub auth_tag: String,
    pub ciphertext: String,
}

/// Encrypt a secret into a fresh envelope.
///
/// A new random 12-byte nonce is generated per call. The AAD binds the
/// envelope to its context (the connection id), so an envelope copied onto a
/// different connection fails to open.
pub fn seal(
    key: &VaultKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<CredentialEnvelope, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut sealed = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // aes-gcm appends the tag; the envelope stores it separately
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(CredentialEnvelope {
        version: ENVELOPE_VERSION,
        algorithm: ENVELOPE_ALGORITHM.to_string(),
        iv: BASE64.encode(nonce),
        auth_tag: BASE64.encode(tag),
        ciphertext: BASE64.encode(sealed),
    })
}

/// Decrypt an envelope back into the secret.
///
/// Fails with `UnsupportedVersion`/`UnsupportedAlgorithm` for declarations
/// this build does not understand, and with `DecryptionFailed` when the
/// authentication tag does not verify (tamper, corruption, or wrong key).
pub fn open(
    key: &VaultKey,
    aad: &[u8],
    envelope: &CredentialEnvelope,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::UnsupportedVersion(envelope.version));
    }
    if envelope.algorithm != ENVELOPE_ALGORITHM {
        return Err(CryptoError::UnsupportedAlgorithm(envelope.algorithm.clone()));
    }

    let iv = BASE64
        .decode(&envelope.iv)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("iv: {}", e)))?;
    if iv.len() != NONCE_LEN {
        return Err(CryptoError::MalformedEnvelope(format!(
            "iv must be {} bytes, got {}",
            NONCE_LEN,
            iv.len()
        )));
    }

    let tag = BASE64
        .decode(&envelope.auth_tag)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("authTag: {}", e)))?;
    if tag.len() != TAG_LEN {
        return Err(CryptoError::MalformedEnvelope(format!(
            "authTag must be {} bytes, got {}",
            TAG_LEN,
            tag.len()
        )));
    }

    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("ciphertext: {}", e)))?;

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&tag);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Non-reversible preview of a secret for display: the last four characters
/// prefixed with `****`. Secrets too short to safely expose a tail mask
/// entirely.
pub fn mask_preview(secret: &str) -> String {
    const VISIBLE: usize = 4;
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() >= 2 * VISIBLE {
        let tail: String = chars[chars.len() - VISIBLE..].iter().collect();
        format!("****{}", tail)
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> VaultKey {
        VaultKey::new(vec![7u8; 32]).expect("valid test key")
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let aad = b"connection-aad";
        let plaintext = b"super-secret-token";

        let envelope = seal(&key, aad, plaintext).expect("seal succeeds");
        let opened = open(&key, aad, &envelope).expect("open succeeds");

        assert_eq!(opened.as_slice(), plaintext);
        assert_eq!(envelope.version, ENVELOPE_VERSION);
        assert_eq!(envelope.algorithm, ENVELOPE_ALGORITHM);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key();
        let other_key = VaultKey::new(vec![8u8; 32]).expect("valid key");
        let aad = b"connection-aad";

        let envelope = seal(&key, aad, b"secret").expect("seal succeeds");
        let result = open(&other_key, aad, &envelope);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_different_aad_fails() {
        let key = test_key();

        let envelope = seal(&key, b"aad-1", b"secret").expect("seal succeeds");
        let result = open(&key, b"aad-2", &envelope);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let aad = b"connection-aad";

        let mut envelope = seal(&key, aad, b"secret message").expect("seal succeeds");
        let mut raw = BASE64.decode(&envelope.ciphertext).expect("valid base64");
        raw[0] ^= 0x01;
        envelope.ciphertext = BASE64.encode(raw);

        let result = open(&key, aad, &envelope);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = test_key();
        let aad = b"connection-aad";

        let mut envelope = seal(&key, aad, b"secret message").expect("seal succeeds");
        let mut raw = BASE64.decode(&envelope.auth_tag).expect("valid base64");
        raw[0] ^= 0x01;
        envelope.auth_tag = BASE64.encode(raw);

        let result = open(&key, aad, &envelope);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let key = test_key();
        let aad = b"connection-aad";

        let mut envelope = seal(&key, aad, b"secret").expect("seal succeeds");
        envelope.version = 2;

        let result = open(&key, aad, &envelope);
        assert!(matches!(result, Err(CryptoError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let key = test_key();
        let aad = b"connection-aad";

        let mut envelope = seal(&key, aad, b"secret").expect("seal succeeds");
        envelope.algorithm = "chacha20-poly1305".to_string();

        let result = open(&key, aad, &envelope);
        assert!(matches!(result, Err(CryptoError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_malformed_base64_rejected() {
        let key = test_key();
        let aad = b"connection-aad";

        let mut envelope = seal(&key, aad, b"secret").expect("seal succeeds");
        envelope.iv = "not base64!!".to_string();

        let result = open(&key, aad, &envelope);
        assert!(matches!(result, Err(CryptoError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let aad = b"connection-aad";

        let first = seal(&key, aad, b"secret").expect("seal succeeds");
        let second = seal(&key, aad, b"secret").expect("seal succeeds");

        assert_ne!(first.iv, second.iv);
        assert_eq!(
            open(&key, aad, &first).expect("open succeeds").as_slice(),
            b"secret"
        );
        assert_eq!(
            open(&key, aad, &second).expect("open succeeds").as_slice(),
            b"secret"
        );
    }

    #[test]
    fn test_empty_plaintext_works() {
        let key = test_key();
        let aad = b"connection-aad";

        let envelope = seal(&key, aad, b"").expect("seal succeeds");
        let opened = open(&key, aad, &envelope).expect("open succeeds");

        assert!(opened.is_empty());
    }

    #[test]
    fn test_envelope_serializes_with_camel_case_fields() {
        let key = test_key();
        let envelope = seal(&key, b"aad", b"secret").expect("seal succeeds");

        let json = serde_json::to_value(&envelope).expect("serializes");
        assert_eq!(json["version"], 1);
        assert_eq!(json["algorithm"], "aes-256-gcm");
        assert!(json.get("iv").is_some());
        assert!(json.get("authTag").is_some());
        assert!(json.get("ciphertext").is_some());
        assert!(json.get("auth_tag").is_none());
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(matches!(
            VaultKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(matches!(
            VaultKey::new(vec![0u8; 64]),
            Err(CryptoError::InvalidKeyLength(64))
        ));
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = BASE64.encode([3u8; 32]);
        let key = VaultKey::from_base64(&encoded).expect("valid key");
        assert_eq!(key.as_bytes(), &[3u8; 32]);

        assert!(matches!(
            VaultKey::from_base64("%%%"),
            Err(CryptoError::InvalidKeyEncoding(_))
        ));
        let short = BASE64.encode([3u8; 8]);
        assert!(matches!(
            VaultKey::from_base64(&short),
            Err(CryptoError::InvalidKeyLength(8))
        ));
    }

    #[test]
    fn test_mask_preview() {
        assert_eq!(mask_preview("tok_1234abcd7f3a"), "****7f3a");
        assert_eq!(mask_preview("short"), "****");
        assert_eq!(mask_preview(""), "****");
        assert_eq!(mask_preview("exactly8"), "****tly8");
    }
}
