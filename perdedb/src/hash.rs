//! Deterministic digests for hash companion fields.
//!
//! Unlike the cipher, hashing is salted but deterministic: the same input
//! under the same configuration always yields the same digest, which is what
//! makes equality filters on encrypted fields possible.

use crate::annotations::{Encoding, HashAlgorithm, HashConfig, Normalize};
use crate::error::CipherError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256, Sha512};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Computes the digest of a cleartext value per the field's hash
/// configuration.
///
/// # Errors
///
/// Returns [`CipherError::InvalidEncoding`] when the input or salt cannot
/// be decoded under the configured input encoding.
pub fn hash_string(cleartext: &str, config: &HashConfig) -> Result<String, CipherError> {
    let input = decode(cleartext, config.input_encoding, &config.normalize)?;
    let salt = match &config.salt {
        Some(salt) => Some(decode(salt, config.input_encoding, &[])?),
        None => None,
    };
    let digest = match config.algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(&input);
            if let Some(salt) = &salt {
                hasher.update(salt);
            }
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(&input);
            if let Some(salt) = &salt {
                hasher.update(salt);
            }
            hasher.finalize().to_vec()
        }
    };
    Ok(match config.output_encoding {
        Encoding::Hex => hex::encode(digest),
        Encoding::Base64 => STANDARD.encode(digest),
        Encoding::Utf8 => String::from_utf8_lossy(&digest).into_owned(),
    })
}

fn decode(input: &str, encoding: Encoding, normalize: &[Normalize]) -> Result<Vec<u8>, CipherError> {
    match encoding {
        Encoding::Utf8 => Ok(apply_normalization(input, normalize).into_bytes()),
        Encoding::Hex => {
            hex::decode(input).map_err(|e| CipherError::InvalidEncoding(format!("hex: {e}")))
        }
        Encoding::Base64 => STANDARD
            .decode(input)
            .map_err(|e| CipherError::InvalidEncoding(format!("base64: {e}"))),
    }
}

/// Applies normalization flags in a fixed order: case folding first, then
/// whitespace handling, then diacritics removal.
fn apply_normalization(input: &str, flags: &[Normalize]) -> String {
    let mut output = input.to_string();
    if flags.contains(&Normalize::Lowercase) {
        output = output.to_lowercase();
    }
    if flags.contains(&Normalize::Uppercase) {
        output = output.to_uppercase();
    }
    if flags.contains(&Normalize::Trim) {
        output = output.trim().to_string();
    }
    if flags.contains(&Normalize::Spaces) {
        output.retain(|c| !c.is_whitespace());
    }
    if flags.contains(&Normalize::Diacritics) {
        output = output.nfd().filter(|c| !is_combining_mark(*c)).collect();
    }
    output
}
