use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Identity of one device instance, stable for the lifetime of its binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(Arc<str>);

impl DeviceHandle {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Hashes and compares exactly like the inner str, so maps can be queried by id
impl Borrow<str> for DeviceHandle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceHandle {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl Serialize for DeviceHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(DeviceHandle::from)
    }
}
