//! # PerdeDB
//!
//! Schema-driven transparent field-level encryption for structured records.
//!
//! Fields marked `@encrypted` in a schema document are encrypted with
//! AES-256-GCM before they reach the storage boundary and decrypted when
//! results come back, without the calling code handling ciphertext. Hash
//! companion fields (`@encryption:hash(...)`) keep exact-match filtering
//! working over encrypted data, and fingerprinted ciphertext envelopes make
//! key rotation a configuration change rather than a migration emergency.
//!
//! ## Example
//!
//! ```no_run
//! use perdedb::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), perdedb::Error> {
//! let schema = SchemaDocument::from_json(r#"{
//!     "models": [{
//!         "name": "User",
//!         "fields": [
//!             {"name": "id", "type": "Int", "isId": true},
//!             {"name": "name", "type": "String", "documentation": "@encrypted"}
//!         ]
//!     }]
//! }"#)?;
//! let config = Configuration {
//!     encryption_key: Some(generate_key()),
//!     ..Default::default()
//! };
//! let engine = EncryptionEngine::new(&schema, &config)?;
//!
//! let operation = Operation::new("User", "create", json!({
//!     "data": {"id": 1, "name": "Alice"}
//! }));
//! let result = engine
//!     .apply(&operation, |args| async move {
//!         // hand the encrypted arguments to your datastore here
//!         Ok(args)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod annotations;
pub mod cipher;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod keys;
pub mod schema;
pub mod visitor;
pub mod walk;

pub use config::Configuration;
pub use engine::{EncryptionEngine, Operation};
pub use error::{CipherError, Error};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::annotations::FieldConfig;
    pub use crate::config::{CipherFn, CipherMethod, Configuration};
    pub use crate::engine::{EncryptionEngine, Operation};
    pub use crate::error::{CipherError, Error, FieldError};
    pub use crate::keys::{configure_keys, generate_key, KeysConfiguration};
    pub use crate::schema::{ModelDescriptor, ModelDescriptors, SchemaDocument};
}
