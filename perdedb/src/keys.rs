//! Key parsing, fingerprinting and keychain construction.
//!
//! The keychain is built once at setup and treated as immutable read-only
//! shared state for the process lifetime. It always contains the active
//! encryption key plus any number of retired decryption keys, so ciphertext
//! written before a rotation stays decryptable by fingerprint lookup.

use crate::config::{Configuration, DECRYPTION_KEYS_ENV, ENCRYPTION_KEY_ENV};
use crate::error::Error;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretVec};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroize;

/// Serialized key prefix: version tag and cipher algorithm.
pub const KEY_PREFIX: &str = "k1.aesgcm256.";

/// Raw key material size in bytes (256 bits).
pub const KEY_MATERIAL_SIZE: usize = 32;

/// Length of a key fingerprint in characters.
pub const FINGERPRINT_LENGTH: usize = 8;

/// A parsed encryption or decryption key.
///
/// The raw material is held in a [`SecretVec`] and is never serialized or
/// printed; only the fingerprint identifies the key in logs and ciphertext.
pub struct ParsedKey {
    raw: SecretVec<u8>,
    fingerprint: String,
}

impl ParsedKey {
    /// Parses a serialized key of the form `k1.aesgcm256.<base64 material>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKey`] if the prefix, base64 payload or
    /// material length is wrong. Key parsing failures are fatal at setup.
    pub fn parse(serialized: &str) -> Result<Self, Error> {
        let material = serialized
            .strip_prefix(KEY_PREFIX)
            .ok_or_else(|| Error::MalformedKey(format!("expected `{KEY_PREFIX}` prefix")))?;
        let mut raw = STANDARD
            .decode(material)
            .map_err(|e| Error::MalformedKey(format!("invalid base64 key material: {e}")))?;
        if raw.len() != KEY_MATERIAL_SIZE {
            let got = raw.len();
            raw.zeroize();
            return Err(Error::MalformedKey(format!(
                "expected {KEY_MATERIAL_SIZE} bytes of key material, got {got}"
            )));
        }
        Ok(Self { raw: SecretVec::new(raw), fingerprint: key_fingerprint(serialized) })
    }

    /// Returns the key fingerprint used for keychain lookup.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn material(&self) -> &[u8] {
        self.raw.expose_secret()
    }
}

impl fmt::Debug for ParsedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedKey")
            .field("fingerprint", &self.fingerprint)
            .field("raw", &"[REDACTED]")
            .finish()
    }
}

/// Computes the fingerprint of a serialized key.
///
/// The fingerprint is the first [`FINGERPRINT_LENGTH`] characters of the
/// url-safe base64 SHA-256 digest of the serialized key string. It is
/// embedded in every ciphertext envelope to select the decryption key.
#[must_use]
pub fn key_fingerprint(serialized: &str) -> String {
    let digest = Sha256::digest(serialized.as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(FINGERPRINT_LENGTH);
    encoded
}

/// Generates a fresh random key in serialized form.
#[must_use]
pub fn generate_key() -> String {
    use aes_gcm::aead::{rand_core::RngCore, OsRng};

    let mut material = [0u8; KEY_MATERIAL_SIZE];
    OsRng.fill_bytes(&mut material);
    let serialized = format!("{KEY_PREFIX}{}", STANDARD.encode(material));
    material.zeroize();
    serialized
}

/// All trusted decryption keys, indexed by fingerprint.
pub type Keychain = HashMap<String, Arc<ParsedKey>>;

/// The resolved key material for the default cipher method.
#[derive(Debug)]
pub struct KeysConfiguration {
    /// The single active key used for all new ciphertext.
    pub encryption_key: Arc<ParsedKey>,
    /// Superset of the active key plus retired rotation keys.
    pub keychain: Keychain,
}

/// Builds the active key and decryption keychain from configuration,
/// falling back to environment-sourced secrets.
///
/// # Errors
///
/// Returns [`Error::NoEncryptionKey`] when neither the configuration nor
/// the environment provides an active key, and [`Error::MalformedKey`] when
/// any provided key fails to parse.
pub fn configure_keys(config: &Configuration) -> Result<KeysConfiguration, Error> {
    let serialized = match &config.encryption_key {
        Some(key) => key.clone(),
        None => std::env::var(ENCRYPTION_KEY_ENV)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or(Error::NoEncryptionKey)?,
    };
    let encryption_key = Arc::new(ParsedKey::parse(&serialized)?);

    let decryption_keys: Vec<String> = match &config.decryption_keys {
        Some(keys) => keys.clone(),
        None => std::env::var(DECRYPTION_KEYS_ENV)
            .map(|raw| raw.split(',').filter(|k| !k.is_empty()).map(str::to_string).collect())
            .unwrap_or_default(),
    };

    let mut keychain = Keychain::new();
    keychain.insert(encryption_key.fingerprint().to_string(), Arc::clone(&encryption_key));
    for serialized in decryption_keys {
        let key = ParsedKey::parse(&serialized)?;
        // Duplicate keys collapse by fingerprint.
        keychain.entry(key.fingerprint().to_string()).or_insert_with(|| Arc::new(key));
    }

    Ok(KeysConfiguration { encryption_key, keychain })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests that read or mutate the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const TEST_KEY: &str = "k1.aesgcm256.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
    const ROTATED_KEYS: [&str; 2] = [
        "k1.aesgcm256.AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=",
        "k1.aesgcm256.AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=",
    ];

    #[test]
    fn parse_valid_key() {
        let key = ParsedKey::parse(TEST_KEY).expect("key should parse");
        assert_eq!(key.material().len(), KEY_MATERIAL_SIZE);
        assert_eq!(key.fingerprint().len(), FINGERPRINT_LENGTH);
    }

    #[test]
    fn parse_rejects_bad_prefix() {
        let result = ParsedKey::parse("k2.aesgcm256.AAAA");
        assert!(matches!(result, Err(Error::MalformedKey(_))));
    }

    #[test]
    fn parse_rejects_bad_base64() {
        let result = ParsedKey::parse("k1.aesgcm256.not!base64!!");
        assert!(matches!(result, Err(Error::MalformedKey(_))));
    }

    #[test]
    fn parse_rejects_short_material() {
        let result = ParsedKey::parse("k1.aesgcm256.AAAA");
        assert!(matches!(result, Err(Error::MalformedKey(_))));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(key_fingerprint(TEST_KEY), key_fingerprint(TEST_KEY));
        assert_ne!(key_fingerprint(TEST_KEY), key_fingerprint(ROTATED_KEYS[0]));
    }

    #[test]
    fn generated_keys_parse_and_differ() {
        let first = generate_key();
        let second = generate_key();
        assert_ne!(first, second);
        assert!(ParsedKey::parse(&first).is_ok());
        assert!(ParsedKey::parse(&second).is_ok());
    }

    #[test]
    fn no_key_source_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        let result = configure_keys(&Configuration::default());
        assert!(matches!(result, Err(Error::NoEncryptionKey)));
    }

    #[test]
    fn active_key_is_in_the_keychain() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config =
            Configuration { encryption_key: Some(TEST_KEY.to_string()), ..Default::default() };
        let keys = configure_keys(&config).unwrap();
        assert!(keys.keychain.contains_key(keys.encryption_key.fingerprint()));
        assert_eq!(keys.keychain.len(), 1);
    }

    #[test]
    fn decryption_keys_extend_the_keychain() {
        let config = Configuration {
            encryption_key: Some(TEST_KEY.to_string()),
            decryption_keys: Some(ROTATED_KEYS.iter().map(ToString::to_string).collect()),
            ..Default::default()
        };
        let keys = configure_keys(&config).unwrap();
        assert_eq!(keys.keychain.len(), 3);
    }

    #[test]
    fn duplicate_decryption_keys_collapse() {
        let config = Configuration {
            encryption_key: Some(TEST_KEY.to_string()),
            decryption_keys: Some(vec![TEST_KEY.to_string(), ROTATED_KEYS[0].to_string()]),
            ..Default::default()
        };
        let keys = configure_keys(&config).unwrap();
        assert_eq!(keys.keychain.len(), 2);
    }

    #[test]
    fn key_from_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENCRYPTION_KEY_ENV, TEST_KEY);
        let keys = configure_keys(&Configuration::default()).unwrap();
        assert_eq!(keys.encryption_key.fingerprint(), key_fingerprint(TEST_KEY));
        std::env::remove_var(ENCRYPTION_KEY_ENV);
    }

    #[test]
    fn decryption_keys_from_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(DECRYPTION_KEYS_ENV, ROTATED_KEYS.join(","));
        let config =
            Configuration { encryption_key: Some(TEST_KEY.to_string()), ..Default::default() };
        let keys = configure_keys(&config).unwrap();
        assert_eq!(keys.keychain.len(), 3);
        std::env::remove_var(DECRYPTION_KEYS_ENV);
    }

    #[test]
    fn debug_never_prints_material() {
        let key = ParsedKey::parse(TEST_KEY).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("AAAA"));
    }
}
