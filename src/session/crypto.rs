//! Symmetric encryption of persisted session records.
//!
//! ChaCha20-Poly1305 with a fresh random 96-bit nonce per call. The
//! authentication tag makes any tampering or wrong key surface as
//! [`SessionCryptoError::Integrity`].

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::SessionRecord;
use crate::secret::{ExposeSecret, SecretString};

const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SessionCryptoError {
    #[error("session key is invalid: {0}")]
    InvalidKey(String),

    #[error("failed to encrypt session record")]
    Encrypt,

    #[error("session record failed integrity check (wrong key or tampered data)")]
    Integrity,

    #[error("session record encoding is invalid: {0}")]
    Encoding(String),
}

/// 256-bit session encryption key, wiped on drop.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; 32]>);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Accept base64 (standard or URL-safe) of exactly 32 bytes; anything
    /// else is treated as a passphrase and stretched with SHA-256.
    pub fn from_secret(secret: &SecretString) -> Result<Self, SessionCryptoError> {
        let raw = secret.expose_secret().trim();
        if raw.is_empty() {
            return Err(SessionCryptoError::InvalidKey("empty".to_string()));
        }

        let decoded = URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .or_else(|_| STANDARD.decode(raw.as_bytes()))
            .ok()
            .map(Zeroizing::new);
        if let Some(bytes) = decoded.filter(|bytes| bytes.len() == 32) {
            let mut material = [0u8; 32];
            material.copy_from_slice(bytes.as_slice());
            return Ok(Self::from_bytes(material));
        }

        tracing::debug!("session key is not 32-byte base64; deriving from passphrase");
        let digest = Sha256::digest(raw.as_bytes());
        let mut material = [0u8; 32];
        material.copy_from_slice(digest.as_slice());
        Ok(Self::from_bytes(material))
    }

    /// Fresh random key.
    pub fn generate() -> Self {
        let mut material = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut material);
        Self::from_bytes(material)
    }

    /// Standard base64 of the key, as accepted by [`from_secret`](Self::from_secret).
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.as_slice())
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.0.as_slice()))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// On-disk envelope: base64 ciphertext and nonce plus a format version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSessionRecord {
    #[serde(default = "envelope_version")]
    pub version: u8,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

fn envelope_version() -> u8 {
    ENVELOPE_VERSION
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

pub fn encrypt_session(
    record: &SessionRecord,
    key: &SessionKey,
) -> Result<EncryptedSessionRecord, SessionCryptoError> {
    let plaintext = Zeroizing::new(
        serde_json::to_vec(record).map_err(|e| SessionCryptoError::Encoding(e.to_string()))?,
    );

    let mut iv = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
        .map_err(|_| SessionCryptoError::Encrypt)?;

    Ok(EncryptedSessionRecord {
        version: ENVELOPE_VERSION,
        iv: iv.to_vec(),
        ciphertext,
    })
}

pub fn decrypt_session(
    encrypted: &EncryptedSessionRecord,
    key: &SessionKey,
) -> Result<SessionRecord, SessionCryptoError> {
    if encrypted.version != ENVELOPE_VERSION {
        return Err(SessionCryptoError::Encoding(format!(
            "unsupported envelope version {}",
            encrypted.version
        )));
    }
    if encrypted.iv.len() != NONCE_LEN {
        return Err(SessionCryptoError::Integrity);
    }

    let plaintext = Zeroizing::new(
        key.cipher()
            .decrypt(Nonce::from_slice(&encrypted.iv), encrypted.ciphertext.as_slice())
            .map_err(|_| SessionCryptoError::Integrity)?,
    );
    serde_json::from_slice(&plaintext).map_err(|e| SessionCryptoError::Encoding(e.to_string()))
}
