//! Registry clients
//!
//! [`SchemaRegistryClient`] is the seam producers, consumers and the CLI talk
//! through. [`RegistryService`] implements it in-process by routing every
//! call through the protocol; [`RetryingClient`] wraps any client and retries
//! transport failures with exponential backoff inside a request deadline.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::compatibility::{CompatibilityMode, CompatibilityVerdict};
use crate::error::{Result, SchemaError};
use crate::protocol::{RegistryService, Request, Response};
use crate::schema::{SchemaDocument, SchemaEntry};
use crate::version::{SchemaId, VersionSpec};

/// Synchronous registry API
pub trait SchemaRegistryClient: Send + Sync {
    fn register(&self, subject: &str, schema: &str) -> Result<SchemaId>;

    fn lookup(&self, subject: &str, schema: &str) -> Result<SchemaEntry>;

    fn get_by_id(&self, id: SchemaId) -> Result<SchemaDocument>;

    fn get_version(&self, subject: &str, version: VersionSpec) -> Result<SchemaEntry>;

    fn list_versions(&self, subject: &str) -> Result<Vec<u32>>;

    fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<u32>>;

    fn get_mode(&self, subject: &str) -> Result<CompatibilityMode>;

    fn set_mode(&self, subject: &str, mode: CompatibilityMode) -> Result<()>;

    fn test_compatibility(&self, subject: &str, schema: &str) -> Result<CompatibilityVerdict>;
}

fn unexpected(response: Response) -> SchemaError {
    SchemaError::ServiceUnavailable(format!("unexpected registry response: {:?}", response))
}

impl SchemaRegistryClient for RegistryService {
    fn register(&self, subject: &str, schema: &str) -> Result<SchemaId> {
        match self.dispatch(Request::register(subject, schema))? {
            Response::Registered { id } => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    fn lookup(&self, subject: &str, schema: &str) -> Result<SchemaEntry> {
        let request = Request::Lookup {
            subject: subject.to_string(),
            schema: schema.to_string(),
        };
        match self.dispatch(request)? {
            Response::Entry { entry } => Ok(entry),
            other => Err(unexpected(other)),
        }
    }

    fn get_by_id(&self, id: SchemaId) -> Result<SchemaDocument> {
        match self.dispatch(Request::GetById { id })? {
            Response::Schema { schema, .. } => Ok(schema),
            other => Err(unexpected(other)),
        }
    }

    fn get_version(&self, subject: &str, version: VersionSpec) -> Result<SchemaEntry> {
        let request = Request::GetVersion {
            subject: subject.to_string(),
            version,
        };
        match self.dispatch(request)? {
            Response::Entry { entry } => Ok(entry),
            other => Err(unexpected(other)),
        }
    }

    fn list_versions(&self, subject: &str) -> Result<Vec<u32>> {
        let request = Request::ListVersions {
            subject: subject.to_string(),
        };
        match self.dispatch(request)? {
            Response::Versions { versions } => Ok(versions),
            other => Err(unexpected(other)),
        }
    }

    fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<u32>> {
        let request = Request::DeleteSubject {
            subject: subject.to_string(),
            permanent,
        };
        match self.dispatch(request)? {
            Response::Deleted { versions } => Ok(versions),
            other => Err(unexpected(other)),
        }
    }

    fn get_mode(&self, subject: &str) -> Result<CompatibilityMode> {
        let request = Request::GetMode {
            subject: Some(subject.to_string()),
        };
        match self.dispatch(request)? {
            Response::Mode { mode } => Ok(mode),
            other => Err(unexpected(other)),
        }
    }

    fn set_mode(&self, subject: &str, mode: CompatibilityMode) -> Result<()> {
        let request = Request::SetMode {
            subject: Some(subject.to_string()),
            mode: mode.to_string(),
        };
        match self.dispatch(request)? {
            Response::Mode { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn test_compatibility(&self, subject: &str, schema: &str) -> Result<CompatibilityVerdict> {
        let request = Request::TestCompatibility {
            subject: subject.to_string(),
            schema: schema.to_string(),
        };
        match self.dispatch(request)? {
            Response::Compatibility { verdict } => Ok(verdict),
            other => Err(unexpected(other)),
        }
    }
}

impl<C: SchemaRegistryClient + ?Sized> SchemaRegistryClient for Arc<C> {
    fn register(&self, subject: &str, schema: &str) -> Result<SchemaId> {
        (**self).register(subject, schema)
    }

    fn lookup(&self, subject: &str, schema: &str) -> Result<SchemaEntry> {
        (**self).lookup(subject, schema)
    }

    fn get_by_id(&self, id: SchemaId) -> Result<SchemaDocument> {
        (**self).get_by_id(id)
    }

    fn get_version(&self, subject: &str, version: VersionSpec) -> Result<SchemaEntry> {
        (**self).get_version(subject, version)
    }

    fn list_versions(&self, subject: &str) -> Result<Vec<u32>> {
        (**self).list_versions(subject)
    }

    fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<u32>> {
        (**self).delete_subject(subject, permanent)
    }

    fn get_mode(&self, subject: &str) -> Result<CompatibilityMode> {
        (**self).get_mode(subject)
    }

    fn set_mode(&self, subject: &str, mode: CompatibilityMode) -> Result<()> {
        (**self).set_mode(subject, mode)
    }

    fn test_compatibility(&self, subject: &str, schema: &str) -> Result<CompatibilityVerdict> {
        (**self).test_compatibility(subject, schema)
    }
}

/// Retry settings for [`RetryingClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on the time spent on one call, retries included
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Retries retryable failures of an inner client.
///
/// Domain answers (rejections, not-found, malformed input) pass through on
/// the first attempt.
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: SchemaRegistryClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn call<T>(&self, op: &str, mut attempt_call: impl FnMut(&C) -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 0;
        loop {
            match attempt_call(&self.inner) {
                Err(err) if err.is_retryable() => {
                    if attempt >= self.policy.max_retries
                        || started.elapsed() + backoff > self.policy.request_timeout
                    {
                        warn!(op, attempts = attempt + 1, error = %err, "giving up on registry call");
                        return Err(SchemaError::ServiceUnavailable(format!(
                            "{} failed after {} attempts: {}",
                            op,
                            attempt + 1,
                            err
                        )));
                    }
                    attempt += 1;
                    warn!(op, attempt, error = %err, "retrying registry call");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                }
                other => return other,
            }
        }
    }
}

impl<C: SchemaRegistryClient> SchemaRegistryClient for RetryingClient<C> {
    fn register(&self, subject: &str, schema: &str) -> Result<SchemaId> {
        self.call("register", |c| c.register(subject, schema))
    }

    fn lookup(&self, subject: &str, schema: &str) -> Result<SchemaEntry> {
        self.call("lookup", |c| c.lookup(subject, schema))
    }

    fn get_by_id(&self, id: SchemaId) -> Result<SchemaDocument> {
        self.call("get_by_id", |c| c.get_by_id(id))
    }

    fn get_version(&self, subject: &str, version: VersionSpec) -> Result<SchemaEntry> {
        self.call("get_version", |c| c.get_version(subject, version))
    }

    fn list_versions(&self, subject: &str) -> Result<Vec<u32>> {
        self.call("list_versions", |c| c.list_versions(subject))
    }

    fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<u32>> {
        self.call("delete_subject", |c| c.delete_subject(subject, permanent))
    }

    fn get_mode(&self, subject: &str) -> Result<CompatibilityMode> {
        self.call("get_mode", |c| c.get_mode(subject))
    }

    fn set_mode(&self, subject: &str, mode: CompatibilityMode) -> Result<()> {
        self.call("set_mode", |c| c.set_mode(subject, mode))
    }

    fn test_compatibility(&self, subject: &str, schema: &str) -> Result<CompatibilityVerdict> {
        self.call("test_compatibility", |c| c.test_compatibility(subject, schema))
    }
}
