//! Runtime configuration and cipher method resolution.
//!
//! The cipher method is decided exactly once at setup time: either the
//! default keychain-backed AEAD cipher, or a pair of caller-supplied
//! encrypt/decrypt functions. Nothing re-inspects the configuration at
//! call time.

use crate::error::{CipherError, Error};
use crate::keys::{configure_keys, KeysConfiguration};
use std::fmt;
use std::sync::Arc;

/// Environment variable holding the active (serialized) encryption key.
pub const ENCRYPTION_KEY_ENV: &str = "PERDEDB_ENCRYPTION_KEY";

/// Environment variable holding a comma-separated list of decryption keys.
pub const DECRYPTION_KEYS_ENV: &str = "PERDEDB_DECRYPTION_KEYS";

/// Environment variable holding the default salt for hash companion fields.
pub const HASH_SALT_ENV: &str = "PERDEDB_HASH_SALT";

/// A caller-supplied cipher function, applied to one string value at a time.
pub type CipherFn = Arc<dyn Fn(&str) -> Result<String, CipherError> + Send + Sync>;

/// Setup-time configuration.
///
/// Either provide key material (`encryption_key` / `decryption_keys`, with
/// environment fallbacks) or a pair of custom cipher functions. Mixing both
/// is rejected at setup.
#[derive(Default, Clone)]
pub struct Configuration {
    /// Serialized active encryption key (`k1.aesgcm256.<base64>`).
    /// Falls back to [`ENCRYPTION_KEY_ENV`].
    pub encryption_key: Option<String>,
    /// Additional serialized decryption keys for rotation support.
    /// Falls back to [`DECRYPTION_KEYS_ENV`] (comma-separated).
    pub decryption_keys: Option<Vec<String>>,
    /// Custom encryption function (requires `decrypt_fn` as well).
    pub encrypt_fn: Option<CipherFn>,
    /// Custom decryption function (requires `encrypt_fn` as well).
    pub decrypt_fn: Option<CipherFn>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material is never printed in cleartext.
        f.debug_struct("Configuration")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[REDACTED]"))
            .field(
                "decryption_keys",
                &self.decryption_keys.as_ref().map(|keys| format!("[{} REDACTED]", keys.len())),
            )
            .field("encrypt_fn", &self.encrypt_fn.as_ref().map(|_| "Fn"))
            .field("decrypt_fn", &self.decrypt_fn.as_ref().map(|_| "Fn"))
            .finish()
    }
}

/// How string values are transformed, resolved once at setup.
pub enum CipherMethod {
    /// Built-in AEAD cipher backed by a parsed keychain.
    Default(KeysConfiguration),
    /// Caller-supplied cipher functions.
    Custom {
        /// Applied to each cleartext value on write.
        encrypt: CipherFn,
        /// Applied to each matched value on read.
        decrypt: CipherFn,
    },
}

impl CipherMethod {
    /// Resolves the cipher method from a [`Configuration`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when both key material and custom
    /// functions are provided, [`Error::InvalidCipherFunctions`] when only
    /// one of the two custom functions is provided, and any key parsing or
    /// resolution error from [`configure_keys`] otherwise.
    pub fn from_configuration(config: &Configuration) -> Result<Self, Error> {
        let has_keys = config.encryption_key.is_some() || config.decryption_keys.is_some();
        let has_functions = config.encrypt_fn.is_some() || config.decrypt_fn.is_some();
        if has_keys && has_functions {
            return Err(Error::InvalidConfig);
        }
        if has_functions {
            return match (&config.encrypt_fn, &config.decrypt_fn) {
                (Some(encrypt), Some(decrypt)) => Ok(Self::Custom {
                    encrypt: Arc::clone(encrypt),
                    decrypt: Arc::clone(decrypt),
                }),
                _ => Err(Error::InvalidCipherFunctions),
            };
        }
        Ok(Self::Default(configure_keys(config)?))
    }
}

impl fmt::Debug for CipherMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default(keys) => f.debug_tuple("Default").field(keys).finish(),
            Self::Custom { .. } => f.write_str("Custom { .. }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    fn fake_cipher_fn() -> CipherFn {
        Arc::new(|input: &str| Ok(format!("fake-{input}")))
    }

    #[test]
    fn default_method_from_keys() {
        let config = Configuration { encryption_key: Some(generate_key()), ..Default::default() };
        let method = CipherMethod::from_configuration(&config).unwrap();
        assert!(matches!(method, CipherMethod::Default(_)));
    }

    #[test]
    fn custom_method_from_functions() {
        let config = Configuration {
            encrypt_fn: Some(fake_cipher_fn()),
            decrypt_fn: Some(fake_cipher_fn()),
            ..Default::default()
        };
        let method = CipherMethod::from_configuration(&config).unwrap();
        assert!(matches!(method, CipherMethod::Custom { .. }));
    }

    #[test]
    fn mixing_keys_and_functions_fails() {
        let config = Configuration {
            encryption_key: Some(generate_key()),
            encrypt_fn: Some(fake_cipher_fn()),
            decrypt_fn: Some(fake_cipher_fn()),
            ..Default::default()
        };
        let result = CipherMethod::from_configuration(&config);
        assert!(matches!(result, Err(Error::InvalidConfig)));
    }

    #[test]
    fn single_custom_function_fails() {
        let config = Configuration { encrypt_fn: Some(fake_cipher_fn()), ..Default::default() };
        let result = CipherMethod::from_configuration(&config);
        assert!(matches!(result, Err(Error::InvalidCipherFunctions)));
    }

    #[test]
    fn debug_redacts_key_material() {
        let config = Configuration {
            encryption_key: Some(generate_key()),
            decryption_keys: Some(vec![generate_key()]),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("k1.aesgcm256"));
    }
}
