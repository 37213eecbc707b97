// src/snapshot.rs
//! One poll's worth of source state.
//!
//! A [`Snapshot`] holds the fields of a source-type record (serialized into a
//! flat map) plus a side table of derived fields added by
//! `SnapshotSource::process_result`. Typed views deserialize the merged map
//! back into the record type.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// Field names starting with this prefix are never persisted.
pub const INTERNAL_PREFIX: char = '_';

/// A single snapshot field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Plain JSON data.
    Json(Value),
    /// A value with no JSON form. Persisted as `<<TypeName>>`.
    Opaque { type_name: String, display: String },
}

impl Field {
    pub fn opaque(type_name: impl Into<String>, display: impl fmt::Display) -> Self {
        Field::Opaque {
            type_name: type_name.into(),
            display: display.to_string(),
        }
    }

    /// The value written to the cache file.
    pub fn to_persisted(&self) -> Value {
        match self {
            Field::Json(v) => v.clone(),
            Field::Opaque { type_name, .. } => Value::String(format!("<<{type_name}>>")),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Field::Json(v) => Some(v),
            Field::Opaque { .. } => None,
        }
    }
}

impl From<Value> for Field {
    fn from(v: Value) -> Self {
        Field::Json(v)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    record: BTreeMap<String, Field>,
    derived: BTreeMap<String, Field>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a source record into a snapshot. The record must serialize to
    /// a JSON object.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        let value = serde_json::to_value(record).context("serialize source record")?;
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => anyhow::bail!("source record is not an object: {other}"),
        }
    }

    /// Build a snapshot from a plain field map (e.g. a cache file).
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            record: map.into_iter().map(|(k, v)| (k, Field::Json(v))).collect(),
            derived: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty() && self.derived.is_empty()
    }

    /// Look up a field; derived fields shadow record fields.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.derived.get(name).or_else(|| self.record.get(name))
    }

    pub fn get_json(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Field::as_json)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get_json(name).and_then(Value::as_str)
    }

    /// Record a derived field.
    pub fn derive(&mut self, name: impl Into<String>, value: impl Into<Field>) {
        self.derived.insert(name.into(), value.into());
    }

    pub fn derived(&self) -> &BTreeMap<String, Field> {
        &self.derived
    }

    /// All fields, derived values taking precedence.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.record
            .iter()
            .filter(|(k, _)| !self.derived.contains_key(*k))
            .chain(self.derived.iter())
            .map(|(k, v)| (k.as_str(), v))
    }

    /// The persisted form: internal fields dropped, opaque values replaced by
    /// their type marker.
    pub fn to_persisted(&self) -> Map<String, Value> {
        self.fields()
            .filter(|(k, _)| !k.starts_with(INTERNAL_PREFIX))
            .map(|(k, v)| (k.to_string(), v.to_persisted()))
            .collect()
    }

    /// Deserialize the JSON fields into a typed record. Opaque fields are
    /// skipped so they fall back to the record's defaults.
    pub fn view<T: DeserializeOwned>(&self) -> Result<T> {
        let map: Map<String, Value> = self
            .fields()
            .filter_map(|(k, v)| v.as_json().map(|j| (k.to_string(), j.clone())))
            .collect();
        serde_json::from_value(Value::Object(map)).context("read snapshot as record")
    }
}

/// Text used for report fields and template placeholders.
pub fn display_value(field: &Field) -> String {
    match field {
        Field::Json(Value::String(s)) => s.clone(),
        Field::Json(Value::Null) => String::new(),
        Field::Json(other) => other.to_string(),
        Field::Opaque { display, .. } => display.clone(),
    }
}
