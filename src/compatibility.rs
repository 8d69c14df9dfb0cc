//! Schema compatibility checking
//!
//! Decides whether a proposed schema may follow a subject's history under a
//! [`CompatibilityMode`]. Every pairwise check reduces to one question: can a
//! reader holding one schema consume data written under another?
//!
//! * BACKWARD: the newer schema reads data written with the older one.
//! * FORWARD: the older schema reads data written with the newer one.
//! * FULL: both.
//!
//! Rejections carry a [`ReasonCode`] whose string form is a stable contract;
//! callers match on it as a substring of the error message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use crate::error::SchemaError;
use crate::schema::{FieldType, ObjectShape, SchemaDocument, SchemaEntry};

/// Which prior versions a subject checks new schemas against, and how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    None,
    #[default]
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
}

impl CompatibilityMode {
    pub const ALL: [CompatibilityMode; 7] = [
        CompatibilityMode::None,
        CompatibilityMode::Backward,
        CompatibilityMode::BackwardTransitive,
        CompatibilityMode::Forward,
        CompatibilityMode::ForwardTransitive,
        CompatibilityMode::Full,
        CompatibilityMode::FullTransitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityMode::None => "NONE",
            CompatibilityMode::Backward => "BACKWARD",
            CompatibilityMode::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityMode::Forward => "FORWARD",
            CompatibilityMode::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityMode::Full => "FULL",
            CompatibilityMode::FullTransitive => "FULL_TRANSITIVE",
        }
    }

    /// Checked against every prior version rather than only the latest
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::BackwardTransitive
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }

    /// Directions evaluated per prior version, in evaluation order
    pub fn directions(&self) -> &'static [Direction] {
        match self {
            CompatibilityMode::None => &[],
            CompatibilityMode::Backward | CompatibilityMode::BackwardTransitive => &[Direction::Backward],
            CompatibilityMode::Forward | CompatibilityMode::ForwardTransitive => &[Direction::Forward],
            CompatibilityMode::Full | CompatibilityMode::FullTransitive => {
                &[Direction::Backward, Direction::Forward]
            }
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| SchemaError::InvalidCompatibilityMode(s.to_string()))
    }
}

/// Direction of a single pairwise check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// The newer schema reads data written with the older one
    Backward,
    /// The older schema reads data written with the newer one
    Forward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Backward => f.write_str("BACKWARD"),
            Direction::Forward => f.write_str("FORWARD"),
        }
    }
}

/// Stable machine-readable reason for a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// The writer declares a property that the reader's closed content model does not
    PropertyRemovedFromClosedContentModel,
    /// Both declare the property, but the reader type is strictly narrower
    TypeNarrowed,
    /// Both declare the property with unrelated types
    TypeChanged,
    /// The reader requires a property the writer does not guarantee
    RequiredPropertyAdded,
    /// The writer is open, the reader is closed
    AdditionalPropertiesRemoved,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::PropertyRemovedFromClosedContentModel => "PROPERTY_REMOVED_FROM_CLOSED_CONTENT_MODEL",
            ReasonCode::TypeNarrowed => "TYPE_NARROWED",
            ReasonCode::TypeChanged => "TYPE_CHANGED",
            ReasonCode::RequiredPropertyAdded => "REQUIRED_PROPERTY_ADDED",
            ReasonCode::AdditionalPropertiesRemoved => "ADDITIONAL_PROPERTIES_REMOVED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a REJECT verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incompatibility {
    pub reason: ReasonCode,
    /// Dotted path of the offending property, where one exists
    pub field: Option<String>,
    /// Version of the subject the candidate failed against
    pub version: Option<u32>,
    pub direction: Direction,
    pub detail: String,
}

impl Incompatibility {
    fn new(reason: ReasonCode, field: Option<String>, direction: Direction, detail: String) -> Self {
        Self {
            reason,
            field,
            version: None,
            direction,
            detail,
        }
    }

    /// Symbolic reason code
    pub fn code(&self) -> &'static str {
        self.reason.as_str()
    }
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(field) = &self.field {
            write!(f, " at '{}'", field)?;
        }
        write!(f, ": {} ({} check", self.detail, self.direction)?;
        if let Some(version) = self.version {
            write!(f, " against version {}", version)?;
        }
        write!(f, ")")
    }
}

/// Outcome of a compatibility check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityVerdict {
    Accept,
    Reject(Incompatibility),
}

impl CompatibilityVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, CompatibilityVerdict::Accept)
    }

    pub fn incompatibility(&self) -> Option<&Incompatibility> {
        match self {
            CompatibilityVerdict::Accept => None,
            CompatibilityVerdict::Reject(inc) => Some(inc),
        }
    }

    /// Turn a rejection into the error surfaced by registration
    pub fn into_result(self) -> Result<(), SchemaError> {
        match self {
            CompatibilityVerdict::Accept => Ok(()),
            CompatibilityVerdict::Reject(inc) => Err(SchemaError::IncompatibleSchema(inc)),
        }
    }
}

/// Compatibility checker for subject histories
#[derive(Debug, Clone, Copy, Default)]
pub struct CompatibilityChecker;

impl CompatibilityChecker {
    pub fn new() -> Self {
        Self
    }

    /// Check a candidate against a subject's live history (oldest first).
    ///
    /// Non-transitive modes look only at the latest entry; transitive modes
    /// scan every entry oldest-to-newest and stop at the first failure.
    pub fn check(
        &self,
        candidate: &SchemaDocument,
        history: &[&SchemaEntry],
        mode: CompatibilityMode,
    ) -> CompatibilityVerdict {
        if mode == CompatibilityMode::None || history.is_empty() {
            return CompatibilityVerdict::Accept;
        }

        let against: &[&SchemaEntry] = if mode.is_transitive() {
            history
        } else {
            &history[history.len() - 1..]
        };

        for prior in against {
            for &direction in mode.directions() {
                debug!(subject = %prior.subject, version = prior.version, %direction, "checking compatibility");
                if let CompatibilityVerdict::Reject(mut inc) =
                    self.compatible(&prior.document, candidate, direction)
                {
                    inc.version = Some(prior.version);
                    return CompatibilityVerdict::Reject(inc);
                }
            }
        }

        CompatibilityVerdict::Accept
    }

    /// Pairwise rule between an older and a newer schema
    pub fn compatible(
        &self,
        older: &SchemaDocument,
        newer: &SchemaDocument,
        direction: Direction,
    ) -> CompatibilityVerdict {
        let (writer, reader) = match direction {
            Direction::Backward => (older.shape(), newer.shape()),
            Direction::Forward => (newer.shape(), older.shape()),
        };
        match readable(writer, reader, "", direction) {
            Ok(()) => CompatibilityVerdict::Accept,
            Err(inc) => CompatibilityVerdict::Reject(inc),
        }
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

/// Can data valid under `writer` be consumed by `reader`?
fn readable(
    writer: &ObjectShape,
    reader: &ObjectShape,
    path: &str,
    direction: Direction,
) -> Result<(), Incompatibility> {
    for (name, writer_type) in &writer.properties {
        let field = join_path(path, name);
        match reader.properties.get(name) {
            None if reader.is_closed() => {
                return Err(Incompatibility::new(
                    ReasonCode::PropertyRemovedFromClosedContentModel,
                    Some(field),
                    direction,
                    format!("property '{}' is not allowed by the reader's closed content model", name),
                ));
            }
            None => {}
            Some(reader_type) => field_readable(writer_type, reader_type, &field, direction)?,
        }
    }

    for name in &reader.required {
        if !writer.is_required(name) {
            return Err(Incompatibility::new(
                ReasonCode::RequiredPropertyAdded,
                Some(join_path(path, name)),
                direction,
                format!("reader requires '{}' but the writer does not guarantee it", name),
            ));
        }
    }

    if !writer.is_closed() && reader.is_closed() {
        return Err(Incompatibility::new(
            ReasonCode::AdditionalPropertiesRemoved,
            (!path.is_empty()).then(|| path.to_string()),
            direction,
            "writer allows additional properties that the reader rejects".to_string(),
        ));
    }

    Ok(())
}

fn field_readable(
    writer: &FieldType,
    reader: &FieldType,
    field: &str,
    direction: Direction,
) -> Result<(), Incompatibility> {
    match (writer, reader) {
        (FieldType::Object(w), FieldType::Object(r)) => readable(w, r, field, direction),
        (FieldType::Array(w), FieldType::Array(r)) => field_readable(w, r, &format!("{}[]", field), direction),
        _ if accepts(reader, writer) => Ok(()),
        _ => {
            let reason = if accepts(writer, reader) {
                ReasonCode::TypeNarrowed
            } else {
                ReasonCode::TypeChanged
            };
            Err(Incompatibility::new(
                reason,
                Some(field.to_string()),
                direction,
                format!("writer type {} cannot be read as {}", writer, reader),
            ))
        }
    }
}

/// Conservative widening table: does `reader` accept every value of `writer`?
///
/// Identical types, `any`, integer-to-number, and union membership widen;
/// nothing else does.
pub fn accepts(reader: &FieldType, writer: &FieldType) -> bool {
    match (reader, writer) {
        (FieldType::Any, _) => true,
        (_, FieldType::Union(members)) => members.iter().all(|m| accepts(reader, m)),
        (FieldType::Union(members), w) => members.iter().any(|m| accepts(m, w)),
        (FieldType::Number, FieldType::Integer) => true,
        (FieldType::Array(r), FieldType::Array(w)) => accepts(r, w),
        (FieldType::Object(r), FieldType::Object(w)) => {
            readable(w, r, "", Direction::Backward).is_ok()
        }
        (r, w) => r == w,
    }
}

/// Line diff of two schema documents, pretty-printed with sorted keys.
///
/// Unchanged lines are prefixed with two spaces, removals with `- ` and
/// additions with `+ `.
pub fn text_diff(older: &SchemaDocument, newer: &SchemaDocument) -> Result<String, SchemaError> {
    let old_text = serde_json::to_string_pretty(older.raw())?;
    let new_text = serde_json::to_string_pretty(newer.raw())?;

    let diff = TextDiff::from_lines(&old_text, &new_text);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "- ",
            ChangeTag::Insert => "+ ",
            ChangeTag::Equal => "  ",
        };
        out.push_str(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    Ok(out)
}
