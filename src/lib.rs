//! JSON Schema Registry
//!
//! A versioned schema registry for JSON Schema documents, with the
//! compatibility engine that decides whether a new schema may join a
//! subject's history.
//!
//! ## Features
//!
//! - **Compatibility Checking**: BACKWARD, FORWARD, FULL and their transitive
//!   variants, with stable reason codes on rejection
//! - **Subject Versions**: per-subject append-only history, soft and
//!   permanent deletes, per-subject compatibility overrides
//! - **Checksum Deduplication**: SHA256 over canonical JSON gives identical
//!   content one global schema id
//! - **Codecs**: schema-id tagged wire format with encode-time validation and
//!   projection onto a consumer's schema at decode time
//!
//! ## Architecture
//!
//! ```text
//! producer ──serialize──▶ JsonSchemaSerializer ─┐
//!                                               │ SchemaRegistryClient
//! consumer ◀─deserialize─ JsonSchemaDeserializer ┤ (RetryingClient)
//!                                               ▼
//!                                        RegistryService
//!                                               │ Request / Response
//!                                               ▼
//!                  SchemaRegistry ──▶ CompatibilityChecker
//!                        │
//!                        ▼
//!                 FilePersistence (registry.json)
//! ```

pub mod checksum;
pub mod client;
pub mod codec;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod version;

pub use checksum::Checksum;
pub use client::{RetryPolicy, RetryingClient, SchemaRegistryClient};
pub use codec::{
    DeserializerConfig, JsonSchemaDeserializer, JsonSchemaSerializer, SerializerConfig, SubjectKind,
};
pub use compatibility::{
    CompatibilityChecker, CompatibilityMode, CompatibilityVerdict, Direction, Incompatibility, ReasonCode,
};
pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use persistence::FilePersistence;
pub use protocol::{ErrorKind, ErrorResponse, RegistryService, Request, Response};
pub use registry::SchemaRegistry;
pub use schema::{FieldType, ObjectShape, SchemaDocument, SchemaEntry};
pub use version::{SchemaId, VersionSpec};
