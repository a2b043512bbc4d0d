//! The record type stored in collections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the identifying field.
pub const ID_FIELD: &str = "id";

/// One entity of a collection: a JSON object with an `id` member.
///
/// Ids may be strings or numbers in the stored JSON; they are compared by
/// their string form, so `1` and `"1"` name the same record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// A record holding only an id.
    pub fn with_id(id: impl Into<Value>) -> Self {
        let mut record = Self::new();
        record.set_id(id);
        record
    }

    /// Interpret a JSON value as a record. Only objects are records.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The id in string form, if the record has a string or numeric id.
    pub fn id(&self) -> Option<String> {
        self.0.get(ID_FIELD).and_then(id_string)
    }

    /// Whether the record's id equals `id` by string form.
    pub fn has_id(&self, id: &str) -> bool {
        self.id().as_deref() == Some(id)
    }

    pub fn set_id(&mut self, id: impl Into<Value>) {
        self.0.insert(ID_FIELD.to_string(), id.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Overwrite this record's fields with those of `patch`.
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in &patch.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// A copy of the record without its `id` member.
    pub fn without_id(&self) -> Record {
        let mut fields = self.0.clone();
        fields.shift_remove(ID_FIELD);
        Record(fields)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// String form of an id value.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
