//! Conversion between stored file bytes and records.

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use thiserror::Error;

use super::record::{Record, ID_FIELD};

/// Indentation used when none is configured.
pub const DEFAULT_INDENT: usize = 2;

/// Errors raised while decoding or encoding records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bytes are not valid in the codec's format.
    #[error("invalid {format} content: {message}")]
    Syntax {
        format: &'static str,
        message: String,
    },

    /// The content is well-formed but not shaped like records.
    #[error("unexpected content: {0}")]
    Shape(String),

    /// A record could not be serialized.
    #[error("failed to encode record: {0}")]
    Encode(String),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// A file format for records.
pub trait RecordCodec: Send + Sync {
    /// File extension, without the dot, of single-record files.
    fn extension(&self) -> &str;

    /// Parse a file holding a whole collection.
    fn decode_collection(&self, bytes: &[u8]) -> Result<Vec<Record>>;

    /// Serialize a whole collection into one file.
    fn encode_collection(&self, records: &[Record]) -> Result<Vec<u8>>;

    /// Parse a single-record file. `id` comes from the file name and takes
    /// precedence over any id stored in the content.
    fn decode_record(&self, id: &str, bytes: &[u8]) -> Result<Record>;

    /// Serialize a single record. The id is left out, since it is carried by
    /// the file name.
    fn encode_record(&self, record: &Record) -> Result<Vec<u8>>;
}

// =============================================================================
// JsonCodec
// =============================================================================

/// Records as JSON, pretty-printed with a configurable indent.
///
/// An indent of zero writes compact JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonCodec {
    indent: usize,
}

impl JsonCodec {
    pub fn new(indent: usize) -> Self {
        Self { indent }
    }

    pub fn indent(&self) -> usize {
        self.indent
    }

    fn parse(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Syntax {
            format: "JSON",
            message: e.to_string(),
        })
    }

    fn write<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        if self.indent == 0 {
            return serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()));
        }
        let indent = vec![b' '; self.indent];
        let mut out = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(&indent));
        value
            .serialize(&mut serializer)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(out)
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(DEFAULT_INDENT)
    }
}

impl RecordCodec for JsonCodec {
    fn extension(&self) -> &str {
        "json"
    }

    fn decode_collection(&self, bytes: &[u8]) -> Result<Vec<Record>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        match self.parse(bytes)? {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    Record::from_value(item).ok_or_else(|| {
                        CodecError::Shape(format!("item {} is not an object", index))
                    })
                })
                .collect(),
            Value::Object(members) => members
                .into_iter()
                .map(|(key, item)| {
                    let mut record = Record::from_value(item).ok_or_else(|| {
                        CodecError::Shape(format!("member {} is not an object", key))
                    })?;
                    if record.get(ID_FIELD).is_none() {
                        record.set_id(key);
                    }
                    Ok(record)
                })
                .collect(),
            _ => Err(CodecError::Shape(
                "expected an array or object of records".to_string(),
            )),
        }
    }

    fn encode_collection(&self, records: &[Record]) -> Result<Vec<u8>> {
        self.write(records)
    }

    fn decode_record(&self, id: &str, bytes: &[u8]) -> Result<Record> {
        let content = match self.parse(bytes)? {
            Value::Object(map) => map,
            _ => return Err(CodecError::Shape(format!("record {} is not an object", id))),
        };
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        for (field, value) in content {
            if field != ID_FIELD {
                fields.insert(field, value);
            }
        }
        Ok(Record::from(fields))
    }

    fn encode_record(&self, record: &Record) -> Result<Vec<u8>> {
        self.write(&record.without_id())
    }
}
