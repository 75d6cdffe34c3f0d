//! Dynamic value model for the cache.
//!
//! A stored value is either a raw byte string or a structured value from a
//! JSON-like domain: booleans, integers, doubles, strings, ordered sequences
//! and string-keyed mappings. Structured values are persisted as canonical
//! JSON text; raw bytes and plain strings are persisted verbatim as bytes.
//!
//! Because a plain string is stored as its UTF-8 bytes, it reads back as
//! [`Value::Bytes`]. Equality treats `Text(s)` and `Bytes(s.as_bytes())` as
//! the same value, so round-trips compare equal in either form.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// A value storable in the cache.
#[derive(Clone, Debug)]
pub enum Value {
    /// Raw byte string, stored without encoding.
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i64),
    Float(f64),
    /// UTF-8 text. Stored as raw bytes at the top level, as a JSON string
    /// when nested inside a list or map.
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Encodes a structured value as canonical JSON text.
    ///
    /// Raw bytes cannot nest inside a structured value and non-finite floats
    /// have no JSON representation; both fail with [`Error::BadValue`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = self.to_json()?;
        serde_json::to_vec(&json).map_err(|err| Error::Codec(err.to_string()))
    }

    /// Decodes canonical JSON text back into a structured value.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let json: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|err| Error::Codec(err.to_string()))?;
        Self::from_json(json)
    }

    /// Returns the underlying bytes for `Bytes` and `Text` values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            Value::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            Value::Bytes(_) => Err(Error::BadValue(
                "raw bytes cannot nest inside a structured value".into(),
            )),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Int(i) => Ok(serde_json::Value::Number((*i).into())),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| Error::BadValue("non-finite float".into())),
            Value::Text(s) => Ok(serde_json::Value::String(s.clone())),
            Value::List(items) => {
                let items = items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(serde_json::Value::Array(items))
            }
            Value::Map(entries) => {
                let entries = entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), value.to_json()?)))
                    .collect::<Result<serde_json::Map<_, _>>>()?;
                Ok(serde_json::Value::Object(entries))
            }
        }
    }

    fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Err(Error::Codec("null is not representable".into())),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| Error::Codec(format!("unrepresentable number {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            serde_json::Value::Array(items) => {
                let items = items
                    .into_iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            serde_json::Value::Object(entries) => {
                let entries = entries
                    .into_iter()
                    .map(|(key, value)| Ok((key, Value::from_json(value)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(Value::Map(entries))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Text(b)) | (Value::Text(b), Value::Bytes(a)) => {
                a.as_slice() == b.as_bytes()
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
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

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}
