//! Payload types moved through the storage layer.
//!
//! [`Value`] is a self-describing object graph (the "pickle" payload),
//! [`Payload`] is what a backend saves and returns, and [`Metadata`] is the
//! side record stored next to an artifact.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use arrow::record_batch::RecordBatch;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StowError;
use crate::Result;

/// A dynamically typed object graph.
///
/// Values encode with the binary codecs (`pickle`, `joblib`) and convert
/// to and from [`serde_json::Value`], which gives a bridge to any serde type
/// via [`Value::from_serialize`] and [`Value::deserialize_into`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// An ordered sequence.
    List(Vec<Value>),
    /// A string-keyed mapping with deterministic ordering.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Convert any serde-serializable value.
    ///
    /// The conversion goes through `serde_json`, so it inherits its data
    /// model: byte buffers become integer lists and integers beyond `i64`
    /// become floats.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Value::from)
            .map_err(|e| StowError::codec("Failed to convert value", e))
    }

    /// Convert back into a concrete serde type.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(serde_json::Value::from(self.clone()))
            .map_err(|e| StowError::codec("Failed to convert value", e))
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Borrow the inner map, if this is a [`Value::Map`].
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::from(b),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

/// Key/value record stored next to an artifact as `<key>.metadata`.
pub type Metadata = BTreeMap<String, Value>;

/// What a backend saves and loads.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// An arbitrary object graph.
    Object(Value),
    /// Tabular data.
    Table(RecordBatch),
    /// A file on the local filesystem.
    File(PathBuf),
}

impl Payload {
    /// Short name of the payload kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Object(_) => "object",
            Payload::Table(_) => "table",
            Payload::File(_) => "file path",
        }
    }

    /// Take the object graph out of the payload.
    pub fn into_object(self) -> Result<Value> {
        match self {
            Payload::Object(value) => Ok(value),
            other => Err(mismatch("object", &other)),
        }
    }

    /// Take the table out of the payload.
    pub fn into_table(self) -> Result<RecordBatch> {
        match self {
            Payload::Table(batch) => Ok(batch),
            other => Err(mismatch("table", &other)),
        }
    }

    /// Take the file path out of the payload.
    pub fn into_file(self) -> Result<PathBuf> {
        match self {
            Payload::File(path) => Ok(path),
            other => Err(mismatch("file path", &other)),
        }
    }
}

fn mismatch(expected: &str, found: &Payload) -> StowError {
    StowError::TypeMismatch {
        format: "payload".to_string(),
        expected: expected.to_string(),
        found: found.kind().to_string(),
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Object(value)
    }
}

impl From<RecordBatch> for Payload {
    fn from(batch: RecordBatch) -> Self {
        Payload::Table(batch)
    }
}

impl From<PathBuf> for Payload {
    fn from(path: PathBuf) -> Self {
        Payload::File(path)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Object(v) => write!(f, "object<{}>", v.type_name()),
            Payload::Table(b) => write!(f, "table<{} rows x {} cols>", b.num_rows(), b.num_columns()),
            Payload::File(p) => write!(f, "file<{}>", p.display()),
        }
    }
}
