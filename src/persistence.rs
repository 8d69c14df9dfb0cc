//! File-backed persistence for the registry
//!
//! The whole registry is stored as one snapshot document:
//!
//! ```text
//! <directory>/
//! └── registry.json
//! ```
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash never leaves a half-written snapshot behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::registry::{RegistrySnapshot, SchemaRegistry};

const SNAPSHOT_FILE: &str = "registry.json";

/// Snapshot storage rooted at a directory
#[derive(Debug, Clone)]
pub struct FilePersistence {
    directory: PathBuf,
}

impl FilePersistence {
    /// Create a store rooted at the given directory, creating it if needed
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.directory.join(SNAPSHOT_FILE)
    }

    /// Persist the entire registry
    pub fn save(&self, registry: &SchemaRegistry) -> Result<()> {
        let snapshot = registry.snapshot()?;
        let content = serde_json::to_string_pretty(&snapshot)?;

        let path = self.snapshot_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        debug!(path = %path.display(), subjects = snapshot.subjects.len(), "saved registry snapshot");
        Ok(())
    }

    /// Load the registry, or an empty one if nothing was saved yet
    pub fn load(&self) -> Result<SchemaRegistry> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(SchemaRegistry::new());
        }
        let content = fs::read_to_string(&path)?;
        let snapshot: RegistrySnapshot = serde_json::from_str(&content)?;
        debug!(path = %path.display(), subjects = snapshot.subjects.len(), "loaded registry snapshot");
        SchemaRegistry::from_snapshot(snapshot)
    }
}
