//! Codec adapter
//!
//! Binds registered schemas to the record wire format:
//!
//! ```text
//! +------+----------------------+---------------------+
//! | 0x00 | schema id (u32, BE)  | UTF-8 JSON payload  |
//! +------+----------------------+---------------------+
//! ```
//!
//! The serializer checks a record against the writer schema before any bytes
//! are produced. The deserializer resolves the writer schema from the
//! embedded id and projects the payload onto the consumer's target shape:
//! absent properties become `null`, unknown ones are dropped or rejected
//! depending on `fail_unknown_properties`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::SchemaRegistryClient;
use crate::error::{Result, SchemaError};
use crate::schema::{CompiledSchema, FieldType, ObjectShape, SchemaDocument};
use crate::version::SchemaId;

/// First byte of every encoded record
pub const MAGIC_BYTE: u8 = 0x00;

/// Magic byte plus the 4-byte schema id
pub const HEADER_LEN: usize = 5;

/// Prefix a payload with the wire header
pub fn write_header(schema_id: SchemaId, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.value().to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split an encoded record into its schema id and payload
pub fn read_header(bytes: &[u8]) -> Result<(SchemaId, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(SchemaError::DecodingRejected(format!(
            "record is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(SchemaError::DecodingRejected(format!(
            "unknown magic byte 0x{:02x}",
            bytes[0]
        )));
    }
    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((SchemaId(id), &bytes[HEADER_LEN..]))
}

/// Which half of a topic record a subject describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Key,
    #[default]
    Value,
}

impl SubjectKind {
    /// Topic-name strategy: `<topic>-key` or `<topic>-value`
    pub fn subject_for(&self, topic: &str) -> String {
        match self {
            SubjectKind::Key => format!("{}-key", topic),
            SubjectKind::Value => format!("{}-value", topic),
        }
    }
}

/// Producer-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Register unknown schemas on first use instead of requiring them
    pub auto_register: bool,
    /// Leave `null` optional properties out of the payload
    pub omit_null_optionals: bool,
    pub subject_kind: SubjectKind,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            auto_register: true,
            omit_null_optionals: true,
            subject_kind: SubjectKind::Value,
        }
    }
}

/// Consumer-side settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeserializerConfig {
    /// Reject payload properties the target shape does not declare
    pub fail_unknown_properties: bool,
}

struct ResolvedSchema {
    document: SchemaDocument,
    validator: CompiledSchema,
}

/// Compiled validators keyed by schema id
#[derive(Default)]
struct SchemaCache {
    entries: RwLock<HashMap<SchemaId, Arc<ResolvedSchema>>>,
}

impl SchemaCache {
    fn resolve(&self, client: &dyn SchemaRegistryClient, id: SchemaId) -> Result<Arc<ResolvedSchema>> {
        if let Some(found) = self.entries.read()?.get(&id) {
            return Ok(Arc::clone(found));
        }

        let document = client.get_by_id(id)?;
        let validator = document.compile()?;
        debug!(schema_id = %id, "compiled schema validator");

        let mut entries = self.entries.write()?;
        let resolved = entries
            .entry(id)
            .or_insert_with(|| Arc::new(ResolvedSchema { document, validator }));
        Ok(Arc::clone(resolved))
    }
}

/// Encodes records under registered schemas
pub struct JsonSchemaSerializer {
    client: Arc<dyn SchemaRegistryClient>,
    config: SerializerConfig,
    cache: SchemaCache,
}

impl JsonSchemaSerializer {
    pub fn new(client: Arc<dyn SchemaRegistryClient>, config: SerializerConfig) -> Self {
        Self {
            client,
            config,
            cache: SchemaCache::default(),
        }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Encode a record under an already registered schema
    pub fn encode(&self, record: &Value, schema_id: SchemaId) -> Result<Vec<u8>> {
        let schema = self.cache.resolve(self.client.as_ref(), schema_id)?;
        let reject = |reason: String| {
            warn!(schema_id = %schema_id, %reason, "record rejected");
            SchemaError::EncodingRejected { schema_id, reason }
        };

        let fields = record
            .as_object()
            .ok_or_else(|| reject(format!("record must be a JSON object, found {}", kind_of(record))))?;
        let shape = schema.document.shape();

        if shape.is_closed() {
            if let Some(extra) = fields.keys().find(|name| !shape.declares(name)) {
                return Err(reject(format!(
                    "property '{}' is not allowed by the closed schema",
                    extra
                )));
            }
        }
        if let Some(missing) = shape.required.iter().find(|name| !fields.contains_key(*name)) {
            return Err(reject(format!("required property '{}' is missing", missing)));
        }

        let payload = if self.config.omit_null_optionals {
            Value::Object(strip_null_optionals(fields, shape))
        } else {
            record.clone()
        };

        schema.validator.validate(&payload).map_err(|errors| reject(errors.join("; ")))?;

        Ok(write_header(schema_id, &serde_json::to_vec(&payload)?))
    }

    /// Resolve the subject for a topic, obtain the schema id and encode
    pub fn serialize<T: Serialize>(&self, topic: &str, record: &T, schema: &str) -> Result<Vec<u8>> {
        let subject = self.config.subject_kind.subject_for(topic);
        let schema_id = if self.config.auto_register {
            self.client.register(&subject, schema)?
        } else {
            self.client.lookup(&subject, schema)?.id
        };
        let value = serde_json::to_value(record)?;
        self.encode(&value, schema_id)
    }
}

/// Decodes records, projecting them onto a target shape
pub struct JsonSchemaDeserializer {
    client: Arc<dyn SchemaRegistryClient>,
    config: DeserializerConfig,
    reader: Option<SchemaDocument>,
    cache: SchemaCache,
}

impl JsonSchemaDeserializer {
    pub fn new(client: Arc<dyn SchemaRegistryClient>, config: DeserializerConfig) -> Self {
        Self {
            client,
            config,
            reader: None,
            cache: SchemaCache::default(),
        }
    }

    /// Project every record onto this schema instead of the writer's
    pub fn with_reader_schema(mut self, reader: SchemaDocument) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn config(&self) -> &DeserializerConfig {
        &self.config
    }

    /// Decode a record and report which schema wrote it
    pub fn decode(&self, bytes: &[u8]) -> Result<(Value, SchemaId)> {
        let (schema_id, payload) = read_header(bytes)?;
        let writer = self.cache.resolve(self.client.as_ref(), schema_id)?;

        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| SchemaError::DecodingRejected(format!("payload is not valid JSON: {}", e)))?;
        writer.validator.validate(&value).map_err(|errors| {
            SchemaError::DecodingRejected(format!(
                "payload does not match writer schema {}: {}",
                schema_id,
                errors.join("; ")
            ))
        })?;
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(SchemaError::DecodingRejected(format!(
                    "payload must be a JSON object, found {}",
                    kind_of(&other)
                )))
            }
        };

        let target = match &self.reader {
            Some(reader) => reader.shape(),
            None => writer.document.shape(),
        };
        let record = project(fields, target, "", self.config.fail_unknown_properties)?;
        Ok((Value::Object(record), schema_id))
    }

    /// Decode straight into an application type
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let (value, schema_id) = self.decode(bytes)?;
        serde_json::from_value(value).map_err(|e| {
            SchemaError::DecodingRejected(format!("record from schema {} does not fit target type: {}", schema_id, e))
        })
    }
}

/// Drop `null` values of optional properties, descending into nested objects
fn strip_null_optionals(fields: &Map<String, Value>, shape: &ObjectShape) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in fields {
        match (value, shape.properties.get(name)) {
            (Value::Null, _) if !shape.is_required(name) => {}
            (Value::Object(inner), Some(FieldType::Object(nested))) => {
                out.insert(name.clone(), Value::Object(strip_null_optionals(inner, nested)));
            }
            _ => {
                out.insert(name.clone(), value.clone());
            }
        }
    }
    out
}

fn project(fields: Map<String, Value>, target: &ObjectShape, path: &str, strict: bool) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (name, value) in fields {
        match target.properties.get(&name) {
            Some(FieldType::Object(nested)) => {
                let value = match value {
                    Value::Object(inner) => Value::Object(project(inner, nested, &join(path, &name), strict)?),
                    other => other,
                };
                out.insert(name, value);
            }
            Some(_) => {
                out.insert(name, value);
            }
            None if strict => {
                return Err(SchemaError::DecodingRejected(format!(
                    "unknown property '{}'",
                    join(path, &name)
                )))
            }
            None if target.is_closed() => {
                debug!(property = %join(path, &name), "dropping unknown property");
            }
            None => {
                out.insert(name, value);
            }
        }
    }
    for name in target.properties.keys() {
        if !out.contains_key(name) {
            out.insert(name.clone(), Value::Null);
        }
    }
    Ok(out)
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
