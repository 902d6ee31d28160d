//! Schema analysis: turning a serialized schema document into the per-model
//! descriptors that drive encryption, hashing and migration.
//!
//! Analysis runs once at setup. All schema-level misconfiguration (encrypted
//! non-string fields, dangling hash sources, invalid cursors) is fatal here,
//! before any record is touched.

use crate::annotations::{
    parse_encrypted_annotation, parse_hash_annotation, Encoding, FieldConfig, HashConfig,
    CURSOR_TOKEN,
};
use crate::error::Error;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Field types usable as a migration cursor.
const CURSOR_TYPES: [&str; 3] = ["Int", "String", "BigInt"];

/// A single field declaration in the schema document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    /// Field name.
    pub name: String,
    /// Declared type name. Model names denote relations.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Whether the field holds a list of values.
    #[serde(default)]
    pub is_list: bool,
    /// Whether the field carries a uniqueness constraint.
    #[serde(default)]
    pub is_unique: bool,
    /// Whether the field is the model's primary identifier.
    #[serde(default)]
    pub is_id: bool,
    /// Attached documentation comment, if any.
    #[serde(default)]
    pub documentation: Option<String>,
}

/// A model declaration in the schema document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaModel {
    /// Model name.
    pub name: String,
    /// Declared fields, in declaration order.
    pub fields: Vec<SchemaField>,
}

/// The deserialized schema document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDocument {
    /// All declared models.
    pub models: Vec<SchemaModel>,
}

impl SchemaDocument {
    /// Deserializes a schema document from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchema`] when the JSON does not match the
    /// expected shape.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSchema(e.to_string()))
    }
}

/// A relation from one model to another, keyed by field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// The model on the other side of the relation.
    pub target_model: String,
    /// Whether the relation holds many records.
    pub is_list: bool,
}

/// Everything the engine needs to know about one model.
#[derive(Debug, Clone, Default)]
pub struct ModelDescriptor {
    /// Encrypted fields and their per-field configuration.
    pub fields: HashMap<String, FieldConfig>,
    /// Relations to other models, keyed by field name.
    pub connections: HashMap<String, Connection>,
    /// The field used for stable full-table iteration, if one qualifies.
    pub cursor: Option<String>,
}

/// Model descriptors keyed by model name.
pub type ModelDescriptors = HashMap<String, ModelDescriptor>;

/// Analyzes a schema document into model descriptors.
///
/// # Errors
///
/// Returns a fatal setup error when an annotation targets a field of the
/// wrong type, a hash annotation references a missing or unencrypted source
/// field, or an explicit cursor annotation is invalid.
pub fn analyze(document: &SchemaDocument) -> Result<ModelDescriptors, Error> {
    let model_names: HashSet<&str> =
        document.models.iter().map(|model| model.name.as_str()).collect();

    let mut descriptors = ModelDescriptors::new();
    for model in &document.models {
        let mut descriptor = ModelDescriptor::default();

        for field in &model.fields {
            if model_names.contains(field.field_type.as_str()) {
                descriptor.connections.insert(
                    field.name.clone(),
                    Connection { target_model: field.field_type.clone(), is_list: field.is_list },
                );
                continue;
            }
            if let Some(config) =
                parse_encrypted_annotation(&model.name, &field.name, field.documentation.as_deref())
            {
                if field.field_type != "String" {
                    return Err(Error::UnsupportedFieldType {
                        model: model.name.clone(),
                        field: field.name.clone(),
                        ty: field.field_type.clone(),
                    });
                }
                descriptor.fields.insert(field.name.clone(), config);
            }
        }

        // Hash companions resolve in a second pass so declaration order of
        // the digest field relative to its source does not matter.
        for field in &model.fields {
            let Some(annotation) =
                parse_hash_annotation(&model.name, &field.name, field.documentation.as_deref())?
            else {
                continue;
            };
            if field.field_type != "String" {
                return Err(Error::NonStringHashField {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    ty: field.field_type.clone(),
                });
            }
            let Some(source) = descriptor.fields.get_mut(&annotation.source_field) else {
                return Err(Error::HashSourceFieldNotFound {
                    model: model.name.clone(),
                    target_field: field.name.clone(),
                    source_field: annotation.source_field,
                });
            };
            if !annotation.normalize.is_empty() && annotation.input_encoding != Encoding::Utf8 {
                warn!(
                    model = model.name,
                    field = field.name,
                    "normalize flags only apply to utf8 input, ignored"
                );
            }
            source.hash = Some(HashConfig {
                target_field: field.name.clone(),
                algorithm: annotation.algorithm,
                salt: annotation.salt,
                input_encoding: annotation.input_encoding,
                output_encoding: annotation.output_encoding,
                normalize: annotation.normalize,
            });
        }

        descriptor.cursor = select_cursor(model, &descriptor.fields)?;
        if descriptor.cursor.is_none() && !descriptor.fields.is_empty() {
            warn!(
                model = model.name,
                "no cursor field available, the model cannot be iterated for key rotation"
            );
        }
        descriptors.insert(model.name.clone(), descriptor);
    }
    Ok(descriptors)
}

/// Picks the cursor field for a model.
///
/// An explicit annotation wins and is validated strictly. Otherwise the
/// primary identifier is preferred, then the first unique field in
/// declaration order; unsuitable fallback candidates are skipped silently.
fn select_cursor(
    model: &SchemaModel,
    encrypted: &HashMap<String, FieldConfig>,
) -> Result<Option<String>, Error> {
    let explicit = model.fields.iter().find(|field| {
        field.documentation.as_deref().is_some_and(|doc| doc.contains(CURSOR_TOKEN))
    });
    if let Some(field) = explicit {
        if !(field.is_unique || field.is_id) {
            return Err(Error::NonUniqueCursor {
                model: model.name.clone(),
                field: field.name.clone(),
            });
        }
        if !CURSOR_TYPES.contains(&field.field_type.as_str()) {
            return Err(Error::UnsupportedCursorType {
                model: model.name.clone(),
                field: field.name.clone(),
                ty: field.field_type.clone(),
            });
        }
        if encrypted.contains_key(&field.name) {
            return Err(Error::EncryptedCursor {
                model: model.name.clone(),
                field: field.name.clone(),
            });
        }
        return Ok(Some(field.name.clone()));
    }

    let suitable = |field: &&SchemaField| {
        CURSOR_TYPES.contains(&field.field_type.as_str()) && !encrypted.contains_key(&field.name)
    };
    let id_field = model.fields.iter().filter(suitable).find(|field| field.is_id);
    if let Some(field) = id_field {
        return Ok(Some(field.name.clone()));
    }
    Ok(model
        .fields
        .iter()
        .filter(suitable)
        .find(|field| field.is_unique)
        .map(|field| field.name.clone()))
}
