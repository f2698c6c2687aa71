//! Records and the shape-based classifier.
//!
//! Every value coming out of the decoder lands in exactly one of three bins:
//!
//! - a map with a `debug` key is a diagnostic message from the firmware,
//! - any other string-keyed map is a measurement,
//! - everything else is rejected.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

use crate::codec::Value;

/// Key that marks a record as a firmware diagnostic.
pub const DEBUG_KEY: &str = "debug";

/// An ordered, string-keyed mapping decoded from the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any existing value in place or appending at the end.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys in wire order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a record from a decoded map, or hand the value back if it is not one.
    ///
    /// Maps with any non-string key are not records.
    pub fn from_value(value: Value) -> Result<Self, Value> {
        let entries = match value {
            Value::Map(entries) => entries,
            other => return Err(other),
        };
        if !entries.iter().all(|(k, _)| matches!(k, Value::Str(_))) {
            return Err(Value::Map(entries));
        }
        let mut record = Record::new();
        for (key, value) in entries {
            if let Value::Str(key) = key {
                record.insert(key, value);
            }
        }
        Ok(record)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (n, (key, value)) in self.fields.iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key:?}: {value}")?;
        }
        write!(f, "}}")
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Outcome of classifying one decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Firmware diagnostic; shown to the operator, never stored.
    Diagnostic(Record),
    /// Measurement row for the capture log.
    Measurement(Record),
    /// Not a string-keyed map.
    Rejected(Value),
}

/// Route a decoded value by its shape.
pub fn classify(value: Value) -> Classified {
    match Record::from_value(value) {
        Ok(record) if record.contains_key(DEBUG_KEY) => Classified::Diagnostic(record),
        Ok(record) => Classified::Measurement(record),
        Err(value) => Classified::Rejected(value),
    }
}
