//! Device snapshots
//!
//! A snapshot is produced by exactly one `fetch_state` call and is never
//! modified afterwards. Field order is the order the transport declared the
//! fields in, which is also the order change notifications are emitted in.

use crate::Value;
use serde::{Deserialize, Serialize};

/// One complete, atomically fetched set of a device's field values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    fields: Vec<(String, Value)>,
}

impl DeviceSnapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Snapshot with no fields
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Iterate fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for DeviceSnapshot
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(SnapshotBuilder::default(), |builder, (name, value)| {
                builder.field(name, value)
            })
            .build()
    }
}

/// Assembles a [`DeviceSnapshot`] field by field.
///
/// Setting a field twice keeps its original position and the latest value.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    fields: Vec<(String, Value)>,
}

impl SnapshotBuilder {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();

        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    /// Mark a field as present but unavailable
    pub fn undefined(self, name: impl Into<String>) -> Self {
        self.field(name, Value::Undefined)
    }

    pub fn build(self) -> DeviceSnapshot {
        DeviceSnapshot { fields: self.fields }
    }
}
