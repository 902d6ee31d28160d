//! The encryption engine: write-path argument rewriting and read-path
//! result decryption around an opaque query boundary.
//!
//! One engine instance is built per process and shared across concurrent
//! operations. It holds only immutable state (descriptors and resolved
//! cipher method), so no locking is involved: each write clones its own
//! argument tree and each read owns its result tree.

use crate::annotations::HashConfig;
use crate::cipher::{decrypt_string, encrypt_string, find_key_for_ciphertext, is_ciphertext};
use crate::config::{CipherMethod, Configuration};
use crate::error::{CipherError, Error, FieldError};
use crate::hash::hash_string;
use crate::schema::{analyze, ModelDescriptors, SchemaDocument};
use crate::visitor::{visit_input_target_fields, visit_output_target_fields, TargetField};
use crate::walk::{path_to_string, remove_value, set_value, Segment};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, error, warn};

/// Actions whose arguments carry data to persist.
const WRITE_ACTIONS: [&str; 5] = ["create", "createMany", "update", "updateMany", "upsert"];

/// Path segments that mark a filter clause.
const FILTER_SEGMENTS: [&str; 2] = ["where", "connect"];

/// One external operation: the model it addresses, the action verb and the
/// argument tree.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Root model of the operation.
    pub model: String,
    /// Action verb, e.g. `create` or `findMany`.
    pub action: String,
    /// Argument tree as handed to the query boundary.
    pub args: Value,
}

impl Operation {
    /// Builds an operation.
    pub fn new(model: impl Into<String>, action: impl Into<String>, args: Value) -> Self {
        Self { model: model.into(), action: action.into(), args }
    }

    /// The `model.action` name used in logs and error reports.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}.{}", self.model, self.action)
    }
}

/// Transparent field-level encryption around a query boundary.
pub struct EncryptionEngine {
    models: ModelDescriptors,
    method: CipherMethod,
}

impl EncryptionEngine {
    /// Builds an engine from a schema document and runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns any schema analysis or cipher configuration error; both are
    /// fatal at setup.
    pub fn new(document: &SchemaDocument, config: &Configuration) -> Result<Self, Error> {
        let models = analyze(document)?;
        let method = CipherMethod::from_configuration(config)?;
        let encrypted: usize = models.values().map(|d| d.fields.len()).sum();
        debug!(models = models.len(), encrypted_fields = encrypted, "encryption engine ready");
        Ok(Self { models, method })
    }

    /// Builds an engine from pre-analyzed descriptors and a resolved cipher
    /// method.
    #[must_use]
    pub fn from_parts(models: ModelDescriptors, method: CipherMethod) -> Self {
        Self { models, method }
    }

    /// The analyzed model descriptors.
    #[must_use]
    pub fn models(&self) -> &ModelDescriptors {
        &self.models
    }

    fn encrypt_value(&self, cleartext: &str) -> Result<String, CipherError> {
        match &self.method {
            CipherMethod::Default(keys) => encrypt_string(cleartext, &keys.encryption_key),
            CipherMethod::Custom { encrypt, .. } => encrypt(cleartext),
        }
    }

    /// Decrypts one stored value. `Ok(None)` means the value is legacy
    /// cleartext and must be left as-is.
    fn decrypt_value(&self, stored: &str) -> Result<Option<String>, CipherError> {
        match &self.method {
            CipherMethod::Default(keys) => {
                if !is_ciphertext(stored) {
                    return Ok(None);
                }
                let key = find_key_for_ciphertext(stored, &keys.keychain)?;
                decrypt_string(stored, key).map(Some)
            }
            // Custom ciphers define their own wire format; every value goes
            // through the caller's function.
            CipherMethod::Custom { decrypt, .. } => decrypt(stored).map(Some),
        }
    }

    /// Rewrites a write operation's arguments, encrypting configured fields.
    ///
    /// Non-write actions and unknown models pass through as an untouched
    /// clone. The caller's argument tree is never mutated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionReport`] aggregating every field that
    /// failed to encrypt or hash; all fields are attempted before failing.
    pub fn encrypt_on_write(&self, operation: &Operation) -> Result<Value, Error> {
        let mut args = operation.args.clone();
        if !WRITE_ACTIONS.contains(&operation.action.as_str())
            || !self.models.contains_key(&operation.model)
        {
            return Ok(args);
        }

        let mut targets = Vec::new();
        visit_input_target_fields(&self.models, &operation.model, &operation.args, &mut |target| {
            targets.push(target);
        });

        let mut failures = Vec::new();
        for target in targets {
            if !target.field_config.encrypt {
                continue;
            }
            if let Err(cause) = self.rewrite_write_target(&mut args, &target) {
                failures.push(FieldError {
                    model: target.model.clone(),
                    field: target.field.clone(),
                    path: path_to_string(&target.path),
                    cause,
                });
            }
        }
        if failures.is_empty() {
            Ok(args)
        } else {
            Err(Error::EncryptionReport { operation: operation.name(), failures })
        }
    }

    fn rewrite_write_target(&self, args: &mut Value, target: &TargetField) -> Result<(), CipherError> {
        let hash = target.field_config.hash.as_ref();

        if in_filter_clause(&target.path) {
            if let Some(hash) = hash {
                return substitute_hash_filter(args, target, hash);
            }
            warn!(
                model = target.model,
                field = target.field,
                path = path_to_string(&target.path),
                "encrypted field used in a filter clause without a hash companion, \
                 equality matching on ciphertext will not work"
            );
            return Ok(());
        }

        if is_order_by_direction(&target.path, &target.value) {
            // Ciphertext has no meaningful sort order.
            remove_value(args, &target.path);
            error!(
                model = target.model,
                field = target.field,
                path = path_to_string(&target.path),
                "cannot order by an encrypted field, clause removed"
            );
            return Ok(());
        }

        let ciphertext = self.encrypt_value(&target.value)?;
        set_value(args, &target.path, Value::String(ciphertext));
        if let Some(hash) = hash {
            let digest = hash_string(&target.value, hash)?;
            let mut hash_path = target.path.clone();
            rewrite_field_segment(&mut hash_path, &target.field, &hash.target_field);
            set_value(args, &hash_path, Value::String(digest));
        }
        Ok(())
    }

    /// Decrypts a read operation's result tree in place.
    ///
    /// Values that do not look like ciphertext are left untouched. Fields
    /// without strict decryption degrade: their failures are logged and the
    /// ciphertext stays in the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecryptionReport`] when any strict-decryption field
    /// fails; successfully decrypted siblings remain mutated in the
    /// caller-discarded result.
    pub fn decrypt_on_read(&self, operation: &Operation, result: &mut Value) -> Result<(), Error> {
        if self.can_skip_decryption(operation) {
            return Ok(());
        }

        let mut targets = Vec::new();
        visit_output_target_fields(&self.models, &operation.model, result, &mut |target| {
            targets.push(target);
        });

        let mut fatal = Vec::new();
        let mut degraded = Vec::new();
        for target in targets {
            match self.decrypt_value(&target.value) {
                Ok(Some(cleartext)) => {
                    set_value(result, &target.path, Value::String(cleartext));
                }
                Ok(None) => {} // legacy cleartext
                Err(cause) => {
                    let failure = FieldError {
                        model: target.model.clone(),
                        field: target.field.clone(),
                        path: path_to_string(&target.path),
                        cause,
                    };
                    if target.field_config.strict_decryption {
                        fatal.push(failure);
                    } else {
                        degraded.push(failure);
                    }
                }
            }
        }
        if !degraded.is_empty() {
            warn!(
                operation = operation.name(),
                failures = degraded.len(),
                details = %degraded.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
                "some fields could not be decrypted and were left as ciphertext"
            );
        }
        if fatal.is_empty() {
            Ok(())
        } else {
            Err(Error::DecryptionReport { operation: operation.name(), failures: fatal })
        }
    }

    /// A result cannot contain ciphertext when the root model has no
    /// encrypted fields and the query pulled in no relations.
    fn can_skip_decryption(&self, operation: &Operation) -> bool {
        let no_own_fields = self
            .models
            .get(&operation.model)
            .map_or(true, |descriptor| descriptor.fields.is_empty());
        let no_relations = operation.args.get("include").is_none()
            && operation.args.get("select").is_none();
        no_own_fields && no_relations
    }

    /// Runs one full operation: encrypt arguments, await the query boundary
    /// with the rewritten tree, decrypt the result.
    ///
    /// # Errors
    ///
    /// Returns encryption or decryption reports, or [`Error::Query`] from
    /// the boundary itself.
    pub async fn apply<F, Fut>(&self, operation: &Operation, query: F) -> Result<Value, Error>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, Error>>,
    {
        let args = self.encrypt_on_write(operation)?;
        let mut result = query(args).await?;
        self.decrypt_on_read(operation, &mut result)?;
        Ok(result)
    }
}

fn in_filter_clause(path: &[Segment]) -> bool {
    path.iter()
        .filter_map(Segment::as_key)
        .any(|key| FILTER_SEGMENTS.contains(&key))
}

fn is_order_by_direction(path: &[Segment], value: &str) -> bool {
    matches!(value, "asc" | "desc")
        && path.iter().filter_map(Segment::as_key).any(|key| key == "orderBy")
}

/// Replaces the field-name segment closest to the leaf, e.g.
/// `where.email.equals` becomes `where.emailHash.equals`.
fn rewrite_field_segment(path: &mut [Segment], field: &str, replacement: &str) {
    for segment in path.iter_mut().rev() {
        if segment.as_key() == Some(field) {
            *segment = Segment::Key(replacement.to_string());
            return;
        }
    }
}

/// Rewrites a filter clause on an encrypted field to an exact-match filter
/// on its hash companion: the digest replaces the cleartext, and the
/// original encrypted-field subtree is dropped from the clause.
fn substitute_hash_filter(
    args: &mut Value,
    target: &TargetField,
    hash: &HashConfig,
) -> Result<(), CipherError> {
    let digest = hash_string(&target.value, hash)?;
    let mut hash_path = target.path.clone();
    rewrite_field_segment(&mut hash_path, &target.field, &hash.target_field);
    set_value(args, &hash_path, Value::String(digest));

    // Drop the whole original subtree, wrapper objects included.
    let field_depth = target
        .path
        .iter()
        .rposition(|segment| segment.as_key() == Some(target.field.as_str()));
    if let Some(depth) = field_depth {
        remove_value(args, &target.path[..=depth]);
    }
    Ok(())
}
