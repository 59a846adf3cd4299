//! Item values
//!
//! A `Value` is what a read produces and what a write consumes. Integer
//! widths are capped at 64 bits; INT reads produce `Int`, UINT reads produce
//! `UInt`, and conversions are free to return any variant.

use rustc_hash::FxHashMap;
use serde_json::json;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Block(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer view used by the write path
    ///
    /// Floats truncate toward zero; strings accept decimal or `0x` hex.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(i128::from(*v)),
            Value::UInt(v) => Some(i128::from(*v)),
            Value::Float(v) if v.is_finite() => Some(v.trunc() as i128),
            Value::String(s) => parse_integer(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<Cow<'_, [u8]>> {
        match self {
            Value::Block(b) => Some(Cow::Borrowed(b)),
            Value::String(s) => Some(Cow::Borrowed(s.as_bytes())),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Equality that treats numerically equal Int/UInt/Float as the same
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                i128::from(*a) == i128::from(*b)
            },
            (Value::Float(a), b) | (b, Value::Float(a)) if b.is_numeric() => {
                b.as_f64().is_some_and(|b| b == *a)
            },
            (Value::String(a), Value::Block(b)) | (Value::Block(b), Value::String(a)) => {
                a.as_bytes() == b.as_slice()
            },
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            },
            _ => self == other,
        }
    }

    /// JSON form published on the bus
    ///
    /// Blocks become `{"raw": [bytes...]}` so they stay distinguishable from arrays.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int(v) => json!(v),
            Value::UInt(v) => json!(v),
            Value::Float(v) => {
                if v.is_finite() {
                    json!(v)
                } else {
                    json!(v.to_string())
                }
            },
            Value::String(s) => json!(s),
            Value::Block(b) => json!({ "raw": b }),
            Value::Array(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            },
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::UInt(u64::from(*b)),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(values) => {
                Value::Array(values.iter().map(Value::from_json).collect())
            },
            serde_json::Value::Object(map) => match map.get("raw") {
                Some(serde_json::Value::Array(bytes)) => Value::Block(
                    bytes
                        .iter()
                        .filter_map(|b| b.as_u64().map(|b| b as u8))
                        .collect(),
                ),
                _ => Value::Null,
            },
        }
    }
}

/// Parse a decimal, `0x` hex or `0b` binary integer literal
pub fn parse_integer(s: &str) -> Option<i128> {
    let trimmed = s.trim().replace('_', "");
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, trimmed),
    };
    let lower = digits.to_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        i128::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i128::from_str_radix(bin, 2).ok()
    } else {
        lower.parse::<i128>().ok()
    }?;
    Some(if negative { -parsed } else { parsed })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            },
            Value::String(s) => f.write_str(s),
            Value::Block(b) => write!(f, "0x{}", common::hex::encode_upper(b)),
            Value::Array(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match v {
                        Value::String(s) => write!(f, "\"{}\"", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("]")
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Block(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// Helper for building `name -> value` maps in tests and conversions
pub type ValueMap = FxHashMap<String, Value>;
