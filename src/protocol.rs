//! Registration protocol
//!
//! A synchronous request/response surface over [`SchemaRegistry`]. Requests
//! and responses are plain serde types so the same surface can be served
//! over a network API; errors come back as an [`ErrorResponse`] holding the
//! numeric error code and a message that keeps the reason code verbatim.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compatibility::{CompatibilityMode, CompatibilityVerdict};
use crate::error::SchemaError;
use crate::registry::SchemaRegistry;
use crate::schema::{SchemaDocument, SchemaEntry};
use crate::version::{SchemaId, VersionSpec};

/// Schema type accepted by this registry
pub const SCHEMA_TYPE_JSON: &str = "JSON";

fn default_schema_type() -> String {
    SCHEMA_TYPE_JSON.to_string()
}

/// A registry request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Register {
        subject: String,
        schema: String,
        #[serde(default = "default_schema_type")]
        schema_type: String,
        #[serde(default)]
        references: Vec<String>,
    },
    Lookup {
        subject: String,
        schema: String,
    },
    GetById {
        id: SchemaId,
    },
    GetVersion {
        subject: String,
        version: VersionSpec,
    },
    ListVersions {
        subject: String,
    },
    ListSubjects,
    DeleteSubject {
        subject: String,
        #[serde(default)]
        permanent: bool,
    },
    GetMode {
        subject: Option<String>,
    },
    SetMode {
        subject: Option<String>,
        mode: String,
    },
    TestCompatibility {
        subject: String,
        schema: String,
    },
}

impl Request {
    /// Register a JSON schema with no references
    pub fn register(subject: impl Into<String>, schema: impl Into<String>) -> Self {
        Request::Register {
            subject: subject.into(),
            schema: schema.into(),
            schema_type: default_schema_type(),
            references: Vec::new(),
        }
    }
}

/// A successful registry response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Registered { id: SchemaId },
    Entry { entry: SchemaEntry },
    Schema { id: SchemaId, schema: SchemaDocument },
    Versions { versions: Vec<u32> },
    Subjects { subjects: Vec<String> },
    Deleted { versions: Vec<u32> },
    Mode { mode: CompatibilityMode },
    Compatibility { verdict: CompatibilityVerdict },
}

/// Failure category of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    MalformedInput,
    ServiceUnavailable,
}

/// Error body returned for a failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: u32,
    pub message: String,
}

impl ErrorResponse {
    pub fn kind(&self) -> ErrorKind {
        match self.error_code {
            409 => ErrorKind::Conflict,
            code if code / 100 == 404 => ErrorKind::NotFound,
            code if code / 100 == 422 => ErrorKind::MalformedInput,
            _ => ErrorKind::ServiceUnavailable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ServiceUnavailable
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; error code: {}", self.message, self.error_code)
    }
}

impl std::error::Error for ErrorResponse {}

impl From<&SchemaError> for ErrorResponse {
    fn from(err: &SchemaError) -> Self {
        Self {
            error_code: err.error_code(),
            message: err.to_string(),
        }
    }
}

impl From<SchemaError> for ErrorResponse {
    fn from(err: SchemaError) -> Self {
        Self::from(&err)
    }
}

/// Serves protocol requests against an in-process registry
#[derive(Debug, Clone, Default)]
pub struct RegistryService {
    registry: Arc<SchemaRegistry>,
}

impl RegistryService {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Handle one request
    pub fn handle(&self, request: Request) -> Result<Response, ErrorResponse> {
        self.dispatch(request).map_err(ErrorResponse::from)
    }

    pub(crate) fn dispatch(&self, request: Request) -> Result<Response, SchemaError> {
        let registry = &self.registry;
        match request {
            Request::Register {
                subject,
                schema,
                schema_type,
                references,
            } => {
                if !schema_type.eq_ignore_ascii_case(SCHEMA_TYPE_JSON) {
                    return Err(SchemaError::MalformedSchema(format!(
                        "unsupported schema type '{}'",
                        schema_type
                    )));
                }
                if !references.is_empty() {
                    return Err(SchemaError::MalformedSchema(
                        "schema references are not supported".to_string(),
                    ));
                }
                let id = registry.register(&subject, &schema)?;
                Ok(Response::Registered { id })
            }
            Request::Lookup { subject, schema } => Ok(Response::Entry {
                entry: registry.lookup(&subject, &schema)?,
            }),
            Request::GetById { id } => Ok(Response::Schema {
                id,
                schema: registry.get_schema_by_id(id)?,
            }),
            Request::GetVersion { subject, version } => Ok(Response::Entry {
                entry: registry.get_version(&subject, version)?,
            }),
            Request::ListVersions { subject } => Ok(Response::Versions {
                versions: registry.list_versions(&subject)?,
            }),
            Request::ListSubjects => Ok(Response::Subjects {
                subjects: registry.list_subjects()?,
            }),
            Request::DeleteSubject { subject, permanent } => Ok(Response::Deleted {
                versions: registry.delete_subject(&subject, permanent)?,
            }),
            Request::GetMode { subject } => {
                let mode = match subject {
                    Some(subject) => registry.get_compatibility_mode(&subject)?,
                    None => registry.default_mode()?,
                };
                Ok(Response::Mode { mode })
            }
            Request::SetMode { subject, mode } => {
                let mode: CompatibilityMode = mode.parse()?;
                match subject {
                    Some(subject) => registry.set_compatibility_mode(&subject, mode)?,
                    None => registry.set_default_mode(mode)?,
                }
                Ok(Response::Mode { mode })
            }
            Request::TestCompatibility { subject, schema } => Ok(Response::Compatibility {
                verdict: registry.test_compatibility(&subject, &schema)?,
            }),
        }
    }
}
