//! Channel values and inbound commands

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed value of one device field / channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Numeric reading or setpoint
    Number(f64),
    /// On/off, open/closed
    Bool(bool),
    /// Enumerations reported as strings ("HEAT", "COOL", ...)
    Text(String),
    /// Device reported the field as unavailable
    Undefined,
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// True when both values carry the same variant.
    pub fn same_type(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

// NaN readings compare equal to each other so a device stuck on NaN does not
// produce an update on every poll.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Undefined, Value::Undefined) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(true) => write!(f, "ON"),
            Value::Bool(false) => write!(f, "OFF"),
            Value::Text(s) => write!(f, "{}", s),
            Value::Undefined => write!(f, "UNDEF"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Undefined)
    }
}

/// Command delivered by the host runtime for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Re-read the device instead of writing anything
    Refresh,
    /// Write a new value
    Set(Value),
}

impl Command {
    pub fn is_refresh(&self) -> bool {
        matches!(self, Command::Refresh)
    }
}

impl From<Value> for Command {
    fn from(value: Value) -> Self {
        Command::Set(value)
    }
}
