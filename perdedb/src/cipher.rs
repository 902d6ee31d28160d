//! The string cipher: AES-256-GCM over a versioned, dot-separated envelope.
//!
//! Serialized ciphertext is self-describing:
//!
//! ```text
//! v1.aesgcm256.<key fingerprint>.<base64 nonce>.<base64 ciphertext+tag>
//! ```
//!
//! The fingerprint selects the decryption key from the keychain, so rotated
//! ciphertext stays readable as long as its key is still configured.

use crate::error::CipherError;
use crate::keys::{Keychain, ParsedKey, FINGERPRINT_LENGTH};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::Arc;

/// Ciphertext version and algorithm prefix.
pub const CIPHERTEXT_PREFIX: &str = "v1.aesgcm256.";

const VERSION: &str = "v1";
const ALGORITHM: &str = "aesgcm256";

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
const TAG_SIZE: usize = 16;

/// A parsed ciphertext envelope.
#[derive(Debug)]
pub struct CiphertextEnvelope {
    /// Fingerprint of the key that produced the ciphertext.
    pub fingerprint: String,
    /// Per-message nonce.
    pub nonce: Vec<u8>,
    /// Ciphertext with the trailing authentication tag.
    pub payload: Vec<u8>,
}

impl CiphertextEnvelope {
    /// Parses the serialized dot-separated form.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::UnsupportedVersion`] for an unknown version
    /// tag and [`CipherError::MalformedCiphertext`] for any other structural
    /// problem.
    pub fn parse(serialized: &str) -> Result<Self, CipherError> {
        let parts: Vec<&str> = serialized.split('.').collect();
        let [version, algorithm, fingerprint, nonce, payload] = parts[..] else {
            return Err(CipherError::MalformedCiphertext(format!(
                "expected 5 dot-separated parts, got {}",
                parts.len()
            )));
        };
        if version != VERSION {
            return Err(CipherError::UnsupportedVersion {
                version: version.to_string(),
                supported: VERSION,
            });
        }
        if algorithm != ALGORITHM {
            return Err(CipherError::MalformedCiphertext(format!(
                "unknown algorithm `{algorithm}`"
            )));
        }
        if fingerprint.len() != FINGERPRINT_LENGTH {
            return Err(CipherError::MalformedCiphertext(format!(
                "fingerprint must be {FINGERPRINT_LENGTH} characters"
            )));
        }
        let nonce = STANDARD
            .decode(nonce)
            .map_err(|e| CipherError::MalformedCiphertext(format!("invalid nonce: {e}")))?;
        if nonce.len() != NONCE_SIZE {
            return Err(CipherError::MalformedCiphertext(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce.len()
            )));
        }
        let payload = STANDARD
            .decode(payload)
            .map_err(|e| CipherError::MalformedCiphertext(format!("invalid payload: {e}")))?;
        if payload.len() < TAG_SIZE {
            return Err(CipherError::MalformedCiphertext(
                "payload shorter than the authentication tag".to_string(),
            ));
        }
        Ok(Self { fingerprint: fingerprint.to_string(), nonce, payload })
    }

    /// Renders the serialized dot-separated form.
    #[must_use]
    pub fn serialize(&self) -> String {
        format!(
            "{VERSION}.{ALGORITHM}.{}.{}.{}",
            self.fingerprint,
            STANDARD.encode(&self.nonce),
            STANDARD.encode(&self.payload)
        )
    }
}

/// Encrypts a cleartext string under the given key with a fresh nonce.
///
/// # Errors
///
/// Returns [`CipherError::EncryptionFailed`] when the underlying AEAD
/// primitive fails.
pub fn encrypt_string(cleartext: &str, key: &ParsedKey) -> Result<String, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(key.material())
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let payload = cipher
        .encrypt(Nonce::from_slice(&nonce), cleartext.as_bytes())
        .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;
    let envelope = CiphertextEnvelope {
        fingerprint: key.fingerprint().to_string(),
        nonce: nonce.to_vec(),
        payload,
    };
    Ok(envelope.serialize())
}

/// Decrypts a serialized ciphertext envelope with the given key.
///
/// # Errors
///
/// Returns [`CipherError::AuthenticationFailed`] when the tag does not
/// verify (wrong key, corruption or tampering) and
/// [`CipherError::DecryptionFailed`] when the recovered bytes are not valid
/// UTF-8.
pub fn decrypt_string(serialized: &str, key: &ParsedKey) -> Result<String, CipherError> {
    let envelope = CiphertextEnvelope::parse(serialized)?;
    let cipher = Aes256Gcm::new_from_slice(key.material())
        .map_err(|e| CipherError::DecryptionFailed(e.to_string()))?;
    let cleartext = cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), envelope.payload.as_ref())
        .map_err(|_| CipherError::AuthenticationFailed)?;
    String::from_utf8(cleartext)
        .map_err(|e| CipherError::DecryptionFailed(format!("cleartext is not valid UTF-8: {e}")))
}

/// Whether a stored value is a well-formed ciphertext envelope.
///
/// Legacy cleartext written before encryption was enabled fails this check
/// and is passed through unmodified on read.
#[must_use]
pub fn is_ciphertext(value: &str) -> bool {
    value.starts_with("v1.") && CiphertextEnvelope::parse(value).is_ok()
}

/// Looks up the decryption key named by a ciphertext's fingerprint.
///
/// # Errors
///
/// Returns [`CipherError::UnknownKeyFingerprint`] when no keychain entry
/// matches, and a parse error when the envelope itself is malformed.
pub fn find_key_for_ciphertext<'a>(
    serialized: &str,
    keychain: &'a Keychain,
) -> Result<&'a Arc<ParsedKey>, CipherError> {
    let envelope = CiphertextEnvelope::parse(serialized)?;
    keychain
        .get(&envelope.fingerprint)
        .ok_or(CipherError::UnknownKeyFingerprint(envelope.fingerprint))
}
