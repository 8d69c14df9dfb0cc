//! Schema Registry
//!
//! Per-subject, append-only version logs over a global schema-id space.
//!
//! Each subject owns its own mutex, so parsing, checking and appending a new
//! version happen as one unit per subject while different subjects register
//! in parallel. The subject map itself is only write-locked to insert a
//! subject cell the first time a name is seen; cells are never removed, a
//! permanent delete empties them instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityVerdict};
use crate::error::{Result, SchemaError};
use crate::schema::{SchemaDocument, SchemaEntry};
use crate::version::{SchemaId, VersionSpec};

/// One version in a subject's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredVersion {
    pub entry: SchemaEntry,
    /// Set by a soft delete of the subject
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Default)]
struct SubjectState {
    versions: Vec<StoredVersion>,
}

impl SubjectState {
    fn live(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.versions.iter().filter(|v| !v.deleted).map(|v| &v.entry)
    }

    fn exists(&self) -> bool {
        !self.versions.is_empty()
    }

    fn is_soft_deleted(&self) -> bool {
        self.exists() && self.versions.iter().all(|v| v.deleted)
    }

    /// Version numbers keep counting across soft deletes
    fn next_version(&self) -> u32 {
        self.versions.last().map(|v| v.entry.version + 1).unwrap_or(1)
    }
}

/// Global id space: one id per distinct canonical schema
#[derive(Debug, Default)]
struct SchemaIndex {
    by_id: HashMap<SchemaId, SchemaDocument>,
    by_checksum: HashMap<Checksum, SchemaId>,
    next_id: u32,
}

impl SchemaIndex {
    fn assign(&mut self, document: &SchemaDocument) -> SchemaId {
        if let Some(id) = self.by_checksum.get(document.checksum()) {
            return *id;
        }
        self.next_id += 1;
        let id = SchemaId(self.next_id);
        self.by_checksum.insert(document.checksum().clone(), id);
        self.by_id.insert(id, document.clone());
        id
    }
}

/// A schema in the global id space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub id: SchemaId,
    pub schema: SchemaDocument,
}

/// Serializable copy of the whole registry state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub default_mode: CompatibilityMode,
    #[serde(default)]
    pub modes: BTreeMap<String, CompatibilityMode>,
    #[serde(default)]
    pub schemas: Vec<RegisteredSchema>,
    #[serde(default)]
    pub subjects: BTreeMap<String, Vec<StoredVersion>>,
}

/// The subject version store
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    subjects: RwLock<HashMap<String, Arc<Mutex<SubjectState>>>>,
    modes: RwLock<HashMap<String, CompatibilityMode>>,
    default_mode: RwLock<CompatibilityMode>,
    schemas: RwLock<SchemaIndex>,
    checker: CompatibilityChecker,
}

impl SchemaRegistry {
    /// Create an empty registry with the BACKWARD default mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry with a different default mode
    pub fn with_default_mode(mode: CompatibilityMode) -> Self {
        Self {
            default_mode: RwLock::new(mode),
            ..Self::default()
        }
    }

    /// Register a raw schema under a subject, returning its id.
    ///
    /// Registering content that is already live in the subject returns the
    /// existing id and does not create a new version.
    pub fn register(&self, subject: &str, raw: &str) -> Result<SchemaId> {
        let document = SchemaDocument::parse(raw)?;
        self.register_document(subject, document)
    }

    /// Register an already parsed document under a subject
    pub fn register_document(&self, subject: &str, document: SchemaDocument) -> Result<SchemaId> {
        validate_subject(subject)?;
        let cell = self.cell_or_create(subject)?;
        let mut state = cell.lock()?;

        if let Some(existing) = state.live().find(|e| e.document.same_content(&document)) {
            debug!(subject, version = existing.version, id = %existing.id, "schema already registered");
            return Ok(existing.id);
        }

        let mode = self.get_compatibility_mode(subject)?;
        let history: Vec<&SchemaEntry> = state.live().collect();
        if let CompatibilityVerdict::Reject(inc) = self.checker.check(&document, &history, mode) {
            warn!(subject, %mode, reason = inc.code(), "rejected incompatible schema");
            return Err(SchemaError::IncompatibleSchema(inc));
        }

        let id = self.schemas.write()?.assign(&document);
        let version = state.next_version();
        state.versions.push(StoredVersion {
            entry: SchemaEntry::new(id, subject, version, document),
            deleted: false,
        });

        info!(subject, version, id = %id, "registered schema");
        Ok(id)
    }

    /// Find the live version of a subject holding this exact content
    pub fn lookup(&self, subject: &str, raw: &str) -> Result<SchemaEntry> {
        let document = SchemaDocument::parse(raw)?;
        let cell = self.live_cell(subject)?;
        let state = cell.lock()?;
        let found = state.live().find(|e| e.document.same_content(&document)).cloned();
        found.ok_or_else(|| SchemaError::SchemaNotFound(format!("in subject '{}'", subject)))
    }

    /// Evaluate a schema against a subject without registering it
    pub fn test_compatibility(&self, subject: &str, raw: &str) -> Result<CompatibilityVerdict> {
        let document = SchemaDocument::parse(raw)?;
        let mode = self.get_compatibility_mode(subject)?;
        let Some(cell) = self.cell(subject)? else {
            return Ok(CompatibilityVerdict::Accept);
        };
        let state = cell.lock()?;
        let history: Vec<&SchemaEntry> = state.live().collect();
        Ok(self.checker.check(&document, &history, mode))
    }

    /// Resolve a schema by its global id.
    ///
    /// Ids of deleted versions still resolve so that old records stay decodable.
    pub fn get_schema_by_id(&self, id: SchemaId) -> Result<SchemaDocument> {
        self.schemas
            .read()?
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| SchemaError::SchemaNotFound(id.to_string()))
    }

    /// Fetch a live version of a subject
    pub fn get_version(&self, subject: &str, spec: VersionSpec) -> Result<SchemaEntry> {
        let cell = self.live_cell(subject)?;
        let state = cell.lock()?;
        let found = match spec {
            VersionSpec::Latest => state.live().last(),
            VersionSpec::Number(n) => state.live().find(|e| e.version == n),
        };
        let found = found.cloned();
        found.ok_or_else(|| SchemaError::VersionNotFound {
            subject: subject.to_string(),
            version: spec.to_string(),
        })
    }

    /// Live version numbers of a subject, ascending
    pub fn list_versions(&self, subject: &str) -> Result<Vec<u32>> {
        let cell = self.live_cell(subject)?;
        let state = cell.lock()?;
        Ok(state.live().map(|e| e.version).collect())
    }

    /// Subjects with at least one live version, sorted
    pub fn list_subjects(&self) -> Result<Vec<String>> {
        let cells: Vec<(String, Arc<Mutex<SubjectState>>)> = self
            .subjects
            .read()?
            .iter()
            .map(|(name, cell)| (name.clone(), Arc::clone(cell)))
            .collect();

        let mut names = Vec::new();
        for (name, cell) in cells {
            if cell.lock()?.live().next().is_some() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a subject.
    ///
    /// A soft delete hides every version but keeps the version counter, so a
    /// later registration continues numbering. A permanent delete is only
    /// allowed after a soft delete and fully resets the subject name.
    pub fn delete_subject(&self, subject: &str, permanent: bool) -> Result<Vec<u32>> {
        let absent = || SchemaError::SubjectDeleted(subject.to_string());
        let cell = self.cell(subject)?.ok_or_else(absent)?;
        let mut state = cell.lock()?;
        if !state.exists() {
            return Err(absent());
        }

        if permanent {
            if !state.is_soft_deleted() {
                return Err(SchemaError::SubjectNotSoftDeleted(subject.to_string()));
            }
            let removed: Vec<u32> = state.versions.iter().map(|v| v.entry.version).collect();
            state.versions.clear();
            self.modes.write()?.remove(subject);
            info!(subject, versions = ?removed, "permanently deleted subject");
            return Ok(removed);
        }

        if state.is_soft_deleted() {
            return Err(absent());
        }
        let mut deleted = Vec::new();
        for stored in state.versions.iter_mut().filter(|v| !v.deleted) {
            stored.deleted = true;
            deleted.push(stored.entry.version);
        }
        info!(subject, versions = ?deleted, "soft deleted subject");
        Ok(deleted)
    }

    /// Effective mode of a subject: its override, else the global default
    pub fn get_compatibility_mode(&self, subject: &str) -> Result<CompatibilityMode> {
        if let Some(mode) = self.modes.read()?.get(subject) {
            return Ok(*mode);
        }
        self.default_mode()
    }

    /// Override the mode of a subject; allowed before it has any versions
    pub fn set_compatibility_mode(&self, subject: &str, mode: CompatibilityMode) -> Result<()> {
        validate_subject(subject)?;
        self.modes.write()?.insert(subject.to_string(), mode);
        info!(subject, %mode, "set compatibility mode");
        Ok(())
    }

    /// Drop a subject's override, returning it
    pub fn clear_compatibility_mode(&self, subject: &str) -> Result<Option<CompatibilityMode>> {
        Ok(self.modes.write()?.remove(subject))
    }

    pub fn default_mode(&self) -> Result<CompatibilityMode> {
        Ok(*self.default_mode.read()?)
    }

    pub fn set_default_mode(&self, mode: CompatibilityMode) -> Result<()> {
        *self.default_mode.write()? = mode;
        info!(%mode, "set default compatibility mode");
        Ok(())
    }

    /// Copy out the whole state.
    ///
    /// Subject logs are copied before the id index. Ids are assigned before a
    /// version is appended and never removed, so every id a copied log refers
    /// to is already in the index when it is read.
    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        let cells: Vec<(String, Arc<Mutex<SubjectState>>)> = self
            .subjects
            .read()?
            .iter()
            .map(|(name, cell)| (name.clone(), Arc::clone(cell)))
            .collect();
        let mut subjects = BTreeMap::new();
        for (name, cell) in cells {
            let state = cell.lock()?;
            if state.exists() {
                subjects.insert(name, state.versions.clone());
            }
        }

        let mut schemas: Vec<RegisteredSchema> = self
            .schemas
            .read()?
            .by_id
            .iter()
            .map(|(id, schema)| RegisteredSchema {
                id: *id,
                schema: schema.clone(),
            })
            .collect();
        schemas.sort_by_key(|s| s.id);

        Ok(RegistrySnapshot {
            default_mode: self.default_mode()?,
            modes: self.modes.read()?.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            schemas,
            subjects,
        })
    }

    /// Rebuild a registry from a snapshot
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self> {
        let mut index = SchemaIndex::default();
        for registered in snapshot.schemas {
            index.next_id = index.next_id.max(registered.id.0);
            index.by_checksum.insert(registered.schema.checksum().clone(), registered.id);
            index.by_id.insert(registered.id, registered.schema);
        }

        let mut subjects = HashMap::new();
        for (name, versions) in snapshot.subjects {
            for stored in &versions {
                if !index.by_id.contains_key(&stored.entry.id) {
                    return Err(SchemaError::SchemaNotFound(format!(
                        "{} referenced by {}",
                        stored.entry.id,
                        stored.entry.key()
                    )));
                }
            }
            subjects.insert(name, Arc::new(Mutex::new(SubjectState { versions })));
        }

        Ok(Self {
            subjects: RwLock::new(subjects),
            modes: RwLock::new(snapshot.modes.into_iter().collect()),
            default_mode: RwLock::new(snapshot.default_mode),
            schemas: RwLock::new(index),
            checker: CompatibilityChecker::new(),
        })
    }

    fn cell(&self, subject: &str) -> Result<Option<Arc<Mutex<SubjectState>>>> {
        Ok(self.subjects.read()?.get(subject).map(Arc::clone))
    }

    fn cell_or_create(&self, subject: &str) -> Result<Arc<Mutex<SubjectState>>> {
        if let Some(cell) = self.cell(subject)? {
            return Ok(cell);
        }
        let mut subjects = self.subjects.write()?;
        Ok(Arc::clone(subjects.entry(subject.to_string()).or_default()))
    }

    /// Cell of a subject that has live versions
    fn live_cell(&self, subject: &str) -> Result<Arc<Mutex<SubjectState>>> {
        let cell = self
            .cell(subject)?
            .ok_or_else(|| SchemaError::SubjectNotFound(subject.to_string()))?;
        let has_live = cell.lock()?.live().next().is_some();
        if has_live {
            Ok(cell)
        } else {
            Err(SchemaError::SubjectNotFound(subject.to_string()))
        }
    }
}

fn validate_subject(subject: &str) -> Result<()> {
    if subject.trim().is_empty() || subject.chars().any(char::is_control) {
        return Err(SchemaError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const FIRSTNAME: &str = r#"{"type": "object", "additionalProperties": false,
        "properties": {"firstname": {"type": "string"}}}"#;
    const FIRST_AND_LAST: &str = r#"{"type": "object", "additionalProperties": false,
        "properties": {"firstname": {"type": "string"}, "lastname": {"type": "string"}}}"#;
    const LASTNAME: &str = r#"{"type": "object", "additionalProperties": false,
        "properties": {"lastname": {"type": "string"}}}"#;

    #[test]
    fn test_create_registry() {
        let registry = SchemaRegistry::new();
        assert!(registry.list_subjects().unwrap().is_empty());
        assert_eq!(registry.default_mode().unwrap(), CompatibilityMode::Backward);
    }

    #[test]
    fn test_register_versions() {
        let registry = SchemaRegistry::new();
        let id1 = registry.register("persons-value", FIRSTNAME).unwrap();
        let id2 = registry.register("persons-value", FIRST_AND_LAST).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(registry.list_versions("persons-value").unwrap(), vec![1, 2]);

        let latest = registry.get_version("persons-value", VersionSpec::Latest).unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.id, id2);
        assert_eq!(registry.get_schema_by_id(id1).unwrap().shape().properties.len(), 1);
    }

    #[test]
    fn test_rejection_does_not_mutate() {
        let registry = SchemaRegistry::new();
        registry.register("persons-value", FIRSTNAME).unwrap();
        registry.register("persons-value", FIRST_AND_LAST).unwrap();

        let err = registry.register("persons-value", LASTNAME).unwrap_err();
        assert_eq!(err.error_code(), 409);
        assert!(err.to_string().contains("PROPERTY_REMOVED_FROM_CLOSED_CONTENT_MODEL"));
        assert_eq!(registry.list_versions("persons-value").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_idempotent_registration() {
        let registry = SchemaRegistry::new();
        let id = registry.register("persons-value", FIRSTNAME).unwrap();
        let reordered = r#"{"properties": {"firstname": {"type": "string"}},
            "additionalProperties": false, "type": "object"}"#;
        assert_eq!(registry.register("persons-value", reordered).unwrap(), id);
        assert_eq!(registry.list_versions("persons-value").unwrap(), vec![1]);
    }

    #[test]
    fn test_ids_are_shared_across_subjects() {
        let registry = SchemaRegistry::new();
        let a = registry.register("a-value", FIRSTNAME).unwrap();
        let b = registry.register("b-value", FIRSTNAME).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.list_subjects().unwrap(), vec!["a-value", "b-value"]);
    }

    #[test]
    fn test_soft_delete_keeps_numbering() {
        let registry = SchemaRegistry::new();
        registry.register("persons-value", FIRSTNAME).unwrap();
        registry.register("persons-value", FIRST_AND_LAST).unwrap();

        assert_eq!(registry.delete_subject("persons-value", false).unwrap(), vec![1, 2]);
        let err = registry.delete_subject("persons-value", false).unwrap_err();
        assert_eq!(err.error_code(), 40404);
        assert!(registry.list_versions("persons-value").unwrap_err().is_not_found());

        // Incompatible with the deleted history, but that history no longer counts
        registry.register("persons-value", LASTNAME).unwrap();
        assert_eq!(registry.list_versions("persons-value").unwrap(), vec![3]);
    }

    #[test]
    fn test_permanent_delete_requires_soft_delete() {
        let registry = SchemaRegistry::new();
        registry.register("persons-value", FIRSTNAME).unwrap();
        registry.set_compatibility_mode("persons-value", CompatibilityMode::Forward).unwrap();

        let err = registry.delete_subject("persons-value", true).unwrap_err();
        assert_eq!(err.error_code(), 40405);

        registry.delete_subject("persons-value", false).unwrap();
        assert_eq!(registry.delete_subject("persons-value", true).unwrap(), vec![1]);
        assert_eq!(
            registry.get_compatibility_mode("persons-value").unwrap(),
            CompatibilityMode::Backward
        );

        registry.register("persons-value", LASTNAME).unwrap();
        assert_eq!(registry.list_versions("persons-value").unwrap(), vec![1]);
    }

    #[test]
    fn test_delete_absent_subject() {
        let registry = SchemaRegistry::new();
        for permanent in [false, true] {
            let err = registry.delete_subject("nobody-value", permanent).unwrap_err();
            assert!(matches!(err, SchemaError::SubjectDeleted(_)));
            assert_eq!(err.error_code(), 40404);
        }

        registry.register("persons-value", FIRSTNAME).unwrap();
        registry.delete_subject("persons-value", false).unwrap();
        registry.delete_subject("persons-value", true).unwrap();
        for permanent in [false, true] {
            let err = registry.delete_subject("persons-value", permanent).unwrap_err();
            assert_eq!(err.error_code(), 40404);
        }

        // Reads keep reporting a plain missing subject
        assert_eq!(registry.list_versions("nobody-value").unwrap_err().error_code(), 40401);
    }

    #[test]
    fn test_mode_override_before_first_version() {
        let registry = SchemaRegistry::new();
        registry.set_compatibility_mode("persons-value", CompatibilityMode::Forward).unwrap();
        assert_eq!(
            registry.get_compatibility_mode("persons-value").unwrap(),
            CompatibilityMode::Forward
        );
        assert_eq!(
            registry.clear_compatibility_mode("persons-value").unwrap(),
            Some(CompatibilityMode::Forward)
        );
        assert_eq!(
            registry.get_compatibility_mode("persons-value").unwrap(),
            CompatibilityMode::Backward
        );
    }

    #[test]
    fn test_lookup_and_test_compatibility() {
        let registry = SchemaRegistry::new();
        let id = registry.register("persons-value", FIRST_AND_LAST).unwrap();
        assert_eq!(registry.lookup("persons-value", FIRST_AND_LAST).unwrap().id, id);
        assert!(registry.lookup("persons-value", FIRSTNAME).unwrap_err().is_not_found());

        assert!(!registry.test_compatibility("persons-value", LASTNAME).unwrap().is_accept());
        assert!(registry.test_compatibility("fresh-value", LASTNAME).unwrap().is_accept());
        assert_eq!(registry.list_versions("persons-value").unwrap(), vec![1]);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let registry = SchemaRegistry::new();
        registry.register("persons-value", FIRSTNAME).unwrap();
        registry.register("persons-value", FIRST_AND_LAST).unwrap();
        registry.set_compatibility_mode("persons-value", CompatibilityMode::Full).unwrap();

        let restored = SchemaRegistry::from_snapshot(registry.snapshot().unwrap()).unwrap();
        assert_eq!(restored.list_versions("persons-value").unwrap(), vec![1, 2]);
        assert_eq!(
            restored.get_compatibility_mode("persons-value").unwrap(),
            CompatibilityMode::Full
        );
        let id = restored.register("other-value", LASTNAME).unwrap();
        assert_eq!(id, SchemaId(3));
    }

    #[test]
    fn test_concurrent_registration_same_subject() {
        let registry = Arc::new(SchemaRegistry::with_default_mode(CompatibilityMode::None));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let raw = format!(
                        r#"{{"type": "object", "properties": {{"field{}": {{"type": "string"}}}}}}"#,
                        i
                    );
                    registry.register("shared-value", &raw).unwrap()
                })
            })
            .collect();
        let mut ids: Vec<SchemaId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(registry.list_versions("shared-value").unwrap(), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_snapshot_during_registration_restores() {
        let registry = Arc::new(SchemaRegistry::with_default_mode(CompatibilityMode::None));
        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..200 {
                    let raw = format!(
                        r#"{{"type": "object", "properties": {{"field{}": {{"type": "string"}}}}}}"#,
                        i
                    );
                    registry.register(&format!("subject-{}-value", i % 7), &raw).unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let snapshot = registry.snapshot().unwrap();
            SchemaRegistry::from_snapshot(snapshot).unwrap();
        }
        writer.join().unwrap();

        let restored = SchemaRegistry::from_snapshot(registry.snapshot().unwrap()).unwrap();
        assert_eq!(restored.list_subjects().unwrap().len(), 7);
    }
}
