//! Error types for the schema registry

use thiserror::Error;

use crate::compatibility::Incompatibility;
use crate::version::SchemaId;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema registry errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Malformed schema: {0}")]
    MalformedSchema(String),

    #[error("Schema being registered is incompatible with an earlier schema: {0}")]
    IncompatibleSchema(Incompatibility),

    #[error("Subject '{0}' not found")]
    SubjectNotFound(String),

    #[error("Subject '{0}' does not exist or was already deleted")]
    SubjectDeleted(String),

    #[error("Subject '{0}' was not deleted first before being permanently deleted")]
    SubjectNotSoftDeleted(String),

    #[error("Version {version} not found for subject '{subject}'")]
    VersionNotFound { subject: String, version: String },

    #[error("Schema {0} not found")]
    SchemaNotFound(String),

    #[error("Invalid subject name: {0:?}")]
    InvalidSubject(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid compatibility level: {0}")]
    InvalidCompatibilityMode(String),

    #[error("Registry unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Record rejected by schema {schema_id}: {reason}")]
    EncodingRejected { schema_id: SchemaId, reason: String },

    #[error("Payload could not be decoded: {0}")]
    DecodingRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    /// Numeric error code, matching the codes a Confluent-style registry
    /// puts in its error responses.
    pub fn error_code(&self) -> u32 {
        match self {
            SchemaError::SubjectNotFound(_) => 40401,
            SchemaError::VersionNotFound { .. } => 40402,
            SchemaError::SchemaNotFound(_) => 40403,
            SchemaError::SubjectDeleted(_) => 40404,
            SchemaError::SubjectNotSoftDeleted(_) => 40405,
            SchemaError::IncompatibleSchema(_) => 409,
            SchemaError::MalformedSchema(_) => 42201,
            SchemaError::InvalidVersion(_) => 42202,
            SchemaError::InvalidCompatibilityMode(_) => 42203,
            SchemaError::InvalidSubject(_) => 42208,
            SchemaError::EncodingRejected { .. } | SchemaError::DecodingRejected(_) => 42206,
            SchemaError::ServiceUnavailable(_) => 50003,
            SchemaError::Io(_) => 50001,
            SchemaError::Json(_) => 50005,
        }
    }

    /// Only transport-level failures are worth retrying; every domain
    /// answer is authoritative.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchemaError::ServiceUnavailable(_))
    }

    /// True for the whole 404 family.
    pub fn is_not_found(&self) -> bool {
        self.error_code() / 100 == 404
    }

    /// The reject verdict carried by an incompatible registration, if any.
    pub fn incompatibility(&self) -> Option<&Incompatibility> {
        match self {
            SchemaError::IncompatibleSchema(inc) => Some(inc),
            _ => None,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for SchemaError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SchemaError::ServiceUnavailable(format!("registry lock poisoned: {}", err))
    }
}
