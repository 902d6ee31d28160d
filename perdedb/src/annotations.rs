//! Field annotation grammar.
//!
//! Field-level behavior is declared in schema documentation comments:
//!
//! ```text
//! /// @encrypted
//! /// @encrypted?mode=strict
//! /// @encryption:hash(email)?algorithm=sha256&normalize=lowercase,trim
//! /// @encryption:cursor
//! ```
//!
//! The two parsers are independent fixed grammars: a missing token yields
//! `None`, never an error. Modifier blocks use a query-string-like syntax
//! (`?key=value&key2`).

use crate::config::HASH_SALT_ENV;
use crate::error::Error;
use tracing::warn;

const ENCRYPTED_TOKEN: &str = "@encrypted";
const HASH_TOKEN: &str = "@encryption:hash(";

/// Marks a field usable for stable full-table iteration during migrations.
pub(crate) const CURSOR_TOKEN: &str = "@encryption:cursor";

/// Digest algorithm for hash companion fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256 (default).
    Sha256,
    /// SHA-512.
    Sha512,
}

impl HashAlgorithm {
    fn parse(input: &str) -> Option<Self> {
        match input {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// Byte-level encoding of hash inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw UTF-8 text (the only encoding where normalization applies).
    Utf8,
    /// Hexadecimal.
    Hex,
    /// Standard base64.
    Base64,
}

impl Encoding {
    fn parse(input: &str) -> Option<Self> {
        match input {
            "utf8" => Some(Self::Utf8),
            "hex" => Some(Self::Hex),
            "base64" => Some(Self::Base64),
            _ => None,
        }
    }
}

/// Text normalization applied before hashing utf8 input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalize {
    /// Lowercase the input.
    Lowercase,
    /// Uppercase the input.
    Uppercase,
    /// Strip leading and trailing whitespace.
    Trim,
    /// Remove all whitespace.
    Spaces,
    /// Strip diacritics (NFD decomposition, combining marks removed).
    Diacritics,
}

impl Normalize {
    fn parse(input: &str) -> Option<Self> {
        match input {
            "lowercase" => Some(Self::Lowercase),
            "uppercase" => Some(Self::Uppercase),
            "trim" => Some(Self::Trim),
            "spaces" => Some(Self::Spaces),
            "diacritics" => Some(Self::Diacritics),
            _ => None,
        }
    }
}

/// Hash companion configuration, attached to the *source* (encrypted) field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashConfig {
    /// Sibling field that stores the digest.
    pub target_field: String,
    /// Digest algorithm.
    pub algorithm: HashAlgorithm,
    /// Optional salt, resolved at analysis time.
    pub salt: Option<String>,
    /// How the cleartext (and salt) are decoded before digesting.
    pub input_encoding: Encoding,
    /// How the digest is encoded for storage.
    pub output_encoding: Encoding,
    /// Normalization flags, applied in declaration order of the enum.
    pub normalize: Vec<Normalize>,
}

/// Per-field encryption behavior.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldConfig {
    /// Encrypt on write. `false` marks a decrypt-only field: never encrypted
    /// on write, still decrypted on read (legacy cleartext tolerance).
    pub encrypt: bool,
    /// Abort the whole read operation when this field fails to decrypt.
    pub strict_decryption: bool,
    /// Hash companion configuration, if any.
    pub hash: Option<HashConfig>,
}

/// Raw output of the hash annotation parser, before the analyzer attaches
/// it to the source field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashAnnotation {
    /// The encrypted field this digest is computed from.
    pub source_field: String,
    /// Digest algorithm.
    pub algorithm: HashAlgorithm,
    /// Optional salt (literal, `saltEnv` lookup, or global fallback).
    pub salt: Option<String>,
    /// Input decoding.
    pub input_encoding: Encoding,
    /// Output encoding.
    pub output_encoding: Encoding,
    /// Normalization flags.
    pub normalize: Vec<Normalize>,
}

/// Splits a `?key=value&flag` modifier block into pairs.
/// The block ends at the first whitespace character.
fn parse_query_block(input: &str) -> impl Iterator<Item = (&str, &str)> {
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    input[..end]
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| part.split_once('=').unwrap_or((part, "")))
}

/// Parses the `@encrypted` annotation out of a field's documentation.
///
/// Returns `None` when the token is absent. Never fails: unknown modes and
/// deprecated flags degrade to warnings.
pub fn parse_encrypted_annotation(
    model: &str,
    field: &str,
    documentation: Option<&str>,
) -> Option<FieldConfig> {
    let documentation = documentation?;
    let start = documentation.find(ENCRYPTED_TOKEN)?;
    let rest = &documentation[start + ENCRYPTED_TOKEN.len()..];

    let mut mode: Option<&str> = None;
    let mut legacy_strict = false;
    let mut legacy_readonly = false;
    if let Some(block) = rest.strip_prefix('?') {
        for (key, value) in parse_query_block(block) {
            match key {
                "mode" => mode = Some(value),
                "strict" => {
                    warn!(model, field, "the `strict` flag is deprecated, use `mode=strict`");
                    legacy_strict = true;
                }
                "readonly" => {
                    warn!(model, field, "the `readonly` flag is deprecated, use `mode=readonly`");
                    legacy_readonly = true;
                }
                // Unknown modifiers are tolerated.
                _ => {}
            }
        }
    }

    let wants_strict = legacy_strict || mode == Some("strict");
    let wants_readonly = legacy_readonly || mode == Some("readonly");
    if let Some(other) = mode {
        if !matches!(other, "default" | "strict" | "readonly") {
            warn!(model, field, mode = other, "unknown encryption mode, treated as `default`");
        }
    }
    if wants_strict && wants_readonly {
        warn!(
            model,
            field,
            "both `strict` and `readonly` are set; strict decryption is disabled in read-only mode"
        );
    }

    Some(FieldConfig {
        encrypt: !wants_readonly,
        strict_decryption: wants_strict && !wants_readonly,
        hash: None,
    })
}

/// Parses the `@encryption:hash(sourceField)` annotation out of a field's
/// documentation.
///
/// Returns `Ok(None)` when the token or its source-field capture is absent.
///
/// # Errors
///
/// Returns a fatal setup error for an unknown algorithm or encoding.
pub fn parse_hash_annotation(
    model: &str,
    field: &str,
    documentation: Option<&str>,
) -> Result<Option<HashAnnotation>, Error> {
    let Some(documentation) = documentation else { return Ok(None) };
    let Some(start) = documentation.find(HASH_TOKEN) else { return Ok(None) };
    let rest = &documentation[start + HASH_TOKEN.len()..];
    let Some(close) = rest.find(')') else { return Ok(None) };
    let source_field = &rest[..close];
    if source_field.is_empty()
        || !source_field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        // Missing or malformed capture group: no match, not an error.
        return Ok(None);
    }

    let mut annotation = HashAnnotation {
        source_field: source_field.to_string(),
        algorithm: HashAlgorithm::Sha256,
        salt: None,
        input_encoding: Encoding::Utf8,
        output_encoding: Encoding::Hex,
        normalize: Vec::new(),
    };

    let rest = &rest[close + 1..];
    if let Some(block) = rest.strip_prefix('?') {
        for (key, value) in parse_query_block(block) {
            match key {
                "algorithm" => {
                    annotation.algorithm = HashAlgorithm::parse(value).ok_or_else(|| {
                        Error::UnsupportedHashAlgorithm {
                            model: model.to_string(),
                            field: field.to_string(),
                            algorithm: value.to_string(),
                        }
                    })?;
                }
                "inputEncoding" => {
                    annotation.input_encoding =
                        Encoding::parse(value).ok_or_else(|| Error::UnsupportedEncoding {
                            model: model.to_string(),
                            field: field.to_string(),
                            encoding: value.to_string(),
                        })?;
                }
                "outputEncoding" => {
                    annotation.output_encoding =
                        Encoding::parse(value).ok_or_else(|| Error::UnsupportedEncoding {
                            model: model.to_string(),
                            field: field.to_string(),
                            encoding: value.to_string(),
                        })?;
                }
                "salt" => annotation.salt = Some(value.to_string()),
                "saltEnv" => annotation.salt = std::env::var(value).ok(),
                "normalize" => {
                    for option in value.split(',').filter(|v| !v.is_empty()) {
                        match Normalize::parse(option) {
                            Some(normalize) if !annotation.normalize.contains(&normalize) => {
                                annotation.normalize.push(normalize);
                            }
                            Some(_) => {}
                            None => warn!(
                                model,
                                field,
                                option,
                                "unknown normalize option, ignored"
                            ),
                        }
                    }
                }
                _ => {}
            }
        }
    }
    if annotation.salt.is_none() {
        annotation.salt = std::env::var(HASH_SALT_ENV).ok();
    }
    Ok(Some(annotation))
}
