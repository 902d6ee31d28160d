//! Error types for `PerdeDB` operations.

use std::fmt;

/// Identity and cause of a single field-level cipher failure.
///
/// Collected during traversal and reported in aggregate, so one bad field
/// neither masks its siblings nor escapes as a raw error from deep inside
/// the tree walk.
#[derive(Debug)]
pub struct FieldError {
    /// Model the field belongs to.
    pub model: String,
    /// Field name as declared in the schema.
    pub field: String,
    /// Dotted path of the leaf within the argument or result tree.
    pub path: String,
    /// Underlying cipher or hash failure.
    pub cause: CipherError,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} at {}: {}", self.model, self.field, self.path, self.cause)
    }
}

fn format_failures(failures: &[FieldError]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  ")
}

/// Main error type for `PerdeDB` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No encryption key could be resolved from configuration or environment
    #[error("no encryption key provided")]
    NoEncryptionKey,

    /// A serialized key string could not be parsed
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// Both key material and custom cipher functions were configured
    #[error("provide either encryption keys or custom cipher functions, not both")]
    InvalidConfig,

    /// Custom cipher configuration is incomplete
    #[error("custom cipher configuration requires both an encrypt and a decrypt function")]
    InvalidCipherFunctions,

    /// Encryption was enabled on a non-string field
    #[error("encryption enabled for field {model}.{field} of unsupported type {ty}: only String fields can be encrypted")]
    UnsupportedFieldType {
        /// Model name
        model: String,
        /// Field name
        field: String,
        /// Declared field type
        ty: String,
    },

    /// A hash companion field is not string-typed
    #[error("hash field {model}.{field} has unsupported type {ty}: only String fields can store a digest")]
    NonStringHashField {
        /// Model name
        model: String,
        /// Field name
        field: String,
        /// Declared field type
        ty: String,
    },

    /// A hash annotation references a source field that does not exist or is
    /// not encrypted
    #[error("hash field {model}.{target_field} references unknown or unencrypted source field {source_field}")]
    HashSourceFieldNotFound {
        /// Model name
        model: String,
        /// The annotated hash field
        target_field: String,
        /// The referenced source field
        source_field: String,
    },

    /// A hash annotation names an algorithm this build cannot compute
    #[error("hash field {model}.{field} uses unsupported algorithm {algorithm}: only sha256 and sha512 are supported")]
    UnsupportedHashAlgorithm {
        /// Model name
        model: String,
        /// Field name
        field: String,
        /// Requested algorithm
        algorithm: String,
    },

    /// A hash annotation names an unknown input or output encoding
    #[error("hash field {model}.{field} uses unsupported encoding {encoding}: only utf8, hex and base64 are supported")]
    UnsupportedEncoding {
        /// Model name
        model: String,
        /// Field name
        field: String,
        /// Requested encoding
        encoding: String,
    },

    /// An explicit cursor annotation targets a non-unique field
    #[error("the cursor field {model}.{field} must be unique")]
    NonUniqueCursor {
        /// Model name
        model: String,
        /// Field name
        field: String,
    },

    /// An explicit cursor annotation targets a field of an unsupported type
    #[error("the cursor field {model}.{field} has an unsupported type {ty}: only Int, String and BigInt cursors are supported")]
    UnsupportedCursorType {
        /// Model name
        model: String,
        /// Field name
        field: String,
        /// Declared field type
        ty: String,
    },

    /// An explicit cursor annotation targets an encrypted field
    #[error("the field {model}.{field} cannot be used as a cursor as it is encrypted")]
    EncryptedCursor {
        /// Model name
        model: String,
        /// Field name
        field: String,
    },

    /// The schema document could not be deserialized
    #[error("invalid schema document: {0}")]
    InvalidSchema(String),

    /// One or more fields failed to encrypt; the write was aborted before
    /// reaching the query boundary
    #[error("encryption error(s) encountered in operation {operation}:\n  {}", format_failures(.failures))]
    EncryptionReport {
        /// `model.action` name of the failed operation
        operation: String,
        /// All collected per-field failures
        failures: Vec<FieldError>,
    },

    /// One or more strict-decryption fields failed to decrypt
    #[error("decryption error(s) encountered in operation {operation}:\n  {}", format_failures(.failures))]
    DecryptionReport {
        /// `model.action` name of the failed operation
        operation: String,
        /// Strict failures only; degraded fields are logged, not collected here
        failures: Vec<FieldError>,
    },

    /// The external query boundary reported a failure
    #[error("query execution failed: {0}")]
    Query(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors produced by the cipher and hash primitives.
#[derive(Debug)]
pub enum CipherError {
    /// Encryption operation failed
    EncryptionFailed(String),

    /// Decryption operation failed
    DecryptionFailed(String),

    /// Authentication tag verification failed (data may be corrupted or tampered)
    AuthenticationFailed,

    /// The ciphertext envelope could not be parsed
    MalformedCiphertext(String),

    /// The ciphertext envelope carries an unknown format version
    UnsupportedVersion {
        /// The version found in the ciphertext
        version: String,
        /// Supported versions
        supported: &'static str,
    },

    /// No keychain entry matches the ciphertext's key fingerprint
    UnknownKeyFingerprint(String),

    /// Hash input, salt or output could not be decoded
    InvalidEncoding(String),
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncryptionFailed(msg) => write!(f, "encryption failed: {msg}"),
            Self::DecryptionFailed(msg) => write!(f, "decryption failed: {msg}"),
            Self::AuthenticationFailed => {
                write!(f, "authentication failed: ciphertext may be corrupted or tampered")
            }
            Self::MalformedCiphertext(msg) => write!(f, "malformed ciphertext: {msg}"),
            Self::UnsupportedVersion { version, supported } => {
                write!(f, "unsupported ciphertext version: {version} (supported: {supported})")
            }
            Self::UnknownKeyFingerprint(fingerprint) => {
                write!(f, "no decryption key in the keychain matches fingerprint {fingerprint}")
            }
            Self::InvalidEncoding(msg) => write!(f, "invalid encoding: {msg}"),
        }
    }
}

impl std::error::Error for CipherError {}
