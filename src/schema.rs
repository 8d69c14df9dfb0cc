//! Schema model
//!
//! Extracts the structural shape of a JSON Schema document: the property to
//! type mapping, the required set and the content model (open or closed).
//! Nothing here validates instance documents; [`CompiledSchema`] delegates
//! that to the `jsonschema` crate.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::{canonical_json, Checksum};
use crate::error::{Result, SchemaError};
use crate::version::SchemaId;

/// Declared type of a single property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Null,
    Array(Box<FieldType>),
    Object(Box<ObjectShape>),
    Union(Vec<FieldType>),
    /// No type constraint at all (missing `type`, `true`, or an unresolved `$ref`)
    Any,
}

impl FieldType {
    /// Short name used in diagnostics
    pub fn name(&self) -> String {
        match self {
            FieldType::String => "string".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Null => "null".to_string(),
            FieldType::Array(items) => format!("array<{}>", items.name()),
            FieldType::Object(_) => "object".to_string(),
            FieldType::Union(types) => types.iter().map(FieldType::name).collect::<Vec<_>>().join("|"),
            FieldType::Any => "any".to_string(),
        }
    }

    /// Whether `null` is an acceptable value for this type
    pub fn is_nullable(&self) -> bool {
        match self {
            FieldType::Null | FieldType::Any => true,
            FieldType::Union(types) => types.iter().any(FieldType::is_nullable),
            _ => false,
        }
    }

    /// Build a union, flattening nested unions and dropping duplicates.
    /// A single remaining member is returned unwrapped.
    fn union(members: Vec<FieldType>) -> FieldType {
        let mut flat: Vec<FieldType> = Vec::new();
        for member in members {
            let parts = match member {
                FieldType::Union(inner) => inner,
                other => vec![other],
            };
            for part in parts {
                if part == FieldType::Any {
                    return FieldType::Any;
                }
                if !flat.contains(&part) {
                    flat.push(part);
                }
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            FieldType::Union(flat)
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Structural shape of an object schema
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectShape {
    pub properties: BTreeMap<String, FieldType>,
    pub required: BTreeSet<String>,
    /// `additionalProperties`; `false` makes the content model closed
    pub additional_properties: bool,
}

impl ObjectShape {
    pub fn is_closed(&self) -> bool {
        !self.additional_properties
    }

    pub fn declares(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }
}

/// A parsed JSON Schema document.
///
/// Serializes as the raw document; deserializing re-parses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SchemaDocument {
    raw: Value,
    shape: ObjectShape,
    checksum: Checksum,
}

impl SchemaDocument {
    /// Parse a raw schema string
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| SchemaError::MalformedSchema(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Parse an already decoded JSON value
    pub fn from_value(raw: Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(SchemaError::MalformedSchema(
                "top-level schema must be a JSON object".to_string(),
            ));
        }
        match raw.get("type") {
            None => {}
            Some(Value::String(t)) if t == "object" => {}
            Some(other) => {
                return Err(SchemaError::MalformedSchema(format!(
                    "top-level schema must describe an object, found type {}",
                    other
                )))
            }
        }

        let shape = parse_object(&raw, "")?;

        // The validator must be able to compile whatever we accept
        JSONSchema::compile(&raw).map_err(|e| SchemaError::MalformedSchema(e.to_string()))?;

        let checksum = Checksum::from_json(&raw);
        Ok(Self { raw, shape, checksum })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn shape(&self) -> &ObjectShape {
        &self.shape
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// The `title` keyword, if present
    pub fn title(&self) -> Option<&str> {
        self.raw.get("title").and_then(Value::as_str)
    }

    /// Canonical string form (sorted keys, compact)
    pub fn canonical(&self) -> String {
        canonical_json(&self.raw)
    }

    /// Same canonical content as another document
    pub fn same_content(&self, other: &SchemaDocument) -> bool {
        self.checksum == other.checksum
    }

    /// Compile the document for instance validation
    pub fn compile(&self) -> Result<CompiledSchema> {
        JSONSchema::compile(&self.raw)
            .map(CompiledSchema)
            .map_err(|e| SchemaError::MalformedSchema(e.to_string()))
    }
}

impl TryFrom<Value> for SchemaDocument {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<SchemaDocument> for Value {
    fn from(doc: SchemaDocument) -> Self {
        doc.raw
    }
}

/// Parse a raw schema string into a [`SchemaDocument`]
pub fn parse(raw: &str) -> Result<SchemaDocument> {
    SchemaDocument::parse(raw)
}

/// A schema compiled for validating record instances
pub struct CompiledSchema(JSONSchema);

impl CompiledSchema {
    /// Validate an instance, collecting every violation as text
    pub fn validate(&self, instance: &Value) -> std::result::Result<(), Vec<String>> {
        self.0.validate(instance).map_err(|errors| {
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect()
        })
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}

/// A schema registered under a subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub id: SchemaId,
    pub subject: String,
    /// 1-based, contiguous within the subject
    pub version: u32,
    pub document: SchemaDocument,
    pub registered_at: DateTime<Utc>,
}

impl SchemaEntry {
    pub fn new(id: SchemaId, subject: impl Into<String>, version: u32, document: SchemaDocument) -> Self {
        Self {
            id,
            subject: subject.into(),
            version,
            document,
            registered_at: Utc::now(),
        }
    }

    /// Get a unique key for this entry
    pub fn key(&self) -> String {
        format!("{}/v{}", self.subject, self.version)
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn describe(path: &str) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        format!("property '{}'", path)
    }
}

fn parse_object(node: &Value, path: &str) -> Result<ObjectShape> {
    let mut shape = ObjectShape {
        additional_properties: true,
        ..ObjectShape::default()
    };

    match node.get("properties") {
        None => {}
        Some(Value::Object(props)) => {
            for (name, prop) in props {
                let field = parse_field(prop, &join_path(path, name))?;
                shape.properties.insert(name.clone(), field);
            }
        }
        Some(_) => {
            return Err(SchemaError::MalformedSchema(format!(
                "'properties' of {} must be an object",
                describe(path)
            )))
        }
    }

    match node.get("required") {
        None => {}
        Some(Value::Array(names)) => {
            for name in names {
                let name = name.as_str().ok_or_else(|| {
                    SchemaError::MalformedSchema(format!(
                        "'required' of {} must only contain strings",
                        describe(path)
                    ))
                })?;
                shape.required.insert(name.to_string());
            }
        }
        Some(_) => {
            return Err(SchemaError::MalformedSchema(format!(
                "'required' of {} must be an array",
                describe(path)
            )))
        }
    }

    shape.additional_properties = match node.get("additionalProperties") {
        None => true,
        Some(Value::Bool(allowed)) => *allowed,
        // A schema for extra properties still admits them
        Some(Value::Object(_)) => true,
        Some(_) => {
            return Err(SchemaError::MalformedSchema(format!(
                "'additionalProperties' of {} must be a boolean or a schema",
                describe(path)
            )))
        }
    };

    Ok(shape)
}

fn parse_field(node: &Value, path: &str) -> Result<FieldType> {
    let obj = match node {
        Value::Bool(true) => return Ok(FieldType::Any),
        Value::Object(obj) => obj,
        _ => {
            return Err(SchemaError::MalformedSchema(format!(
                "{} must be a schema object",
                describe(path)
            )))
        }
    };

    if let Some(declared) = obj.get("type") {
        return match declared {
            Value::String(name) => parse_named(name, node, path),
            Value::Array(names) if !names.is_empty() => {
                let mut members = Vec::with_capacity(names.len());
                for name in names {
                    let name = name.as_str().ok_or_else(|| {
                        SchemaError::MalformedSchema(format!("'type' of {} must list strings", describe(path)))
                    })?;
                    members.push(parse_named(name, node, path)?);
                }
                Ok(FieldType::union(members))
            }
            _ => Err(SchemaError::MalformedSchema(format!(
                "'type' of {} must be a string or a non-empty array",
                describe(path)
            ))),
        };
    }

    for keyword in ["oneOf", "anyOf"] {
        if let Some(branches) = obj.get(keyword) {
            let branches = branches.as_array().filter(|b| !b.is_empty()).ok_or_else(|| {
                SchemaError::MalformedSchema(format!("'{}' of {} must be a non-empty array", keyword, describe(path)))
            })?;
            let members = branches
                .iter()
                .map(|branch| parse_field(branch, path))
                .collect::<Result<Vec<_>>>()?;
            return Ok(FieldType::union(members));
        }
    }

    if obj.contains_key("properties") {
        return Ok(FieldType::Object(Box::new(parse_object(node, path)?)));
    }

    Ok(FieldType::Any)
}

fn parse_named(name: &str, node: &Value, path: &str) -> Result<FieldType> {
    match name {
        "string" => Ok(FieldType::String),
        "integer" => Ok(FieldType::Integer),
        "number" => Ok(FieldType::Number),
        "boolean" => Ok(FieldType::Boolean),
        "null" => Ok(FieldType::Null),
        "object" => Ok(FieldType::Object(Box::new(parse_object(node, path)?))),
        "array" => {
            let items = match node.get("items") {
                Some(items @ Value::Object(_)) => parse_field(items, &format!("{}[]", path))?,
                _ => FieldType::Any,
            };
            Ok(FieldType::Array(Box::new(items)))
        }
        other => Err(SchemaError::MalformedSchema(format!(
            "unknown type '{}' for {}",
            other,
            describe(path)
        ))),
    }
}
