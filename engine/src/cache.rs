//! Last known device state, used to decide what changed

use devpoll_transport::{DeviceSnapshot, Value};

/// A field whose value differs from the cached snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedField {
    pub channel: String,
    pub value: Value,
}

/// Holds the last successfully fetched snapshot of one device
#[derive(Debug, Default)]
pub struct SnapshotCache {
    current: Option<DeviceSnapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&DeviceSnapshot> {
        self.current.as_ref()
    }

    /// Replace the cached snapshot and return the fields that changed.
    ///
    /// With `full` set, or when nothing is cached yet, every field of the new
    /// snapshot is reported. Fields that disappeared since the last snapshot
    /// are reported as [`Value::Undefined`] after the new snapshot's fields.
    pub fn apply_snapshot(&mut self, snapshot: DeviceSnapshot, full: bool) -> Vec<ChangedField> {
        let changed = match (&self.current, full) {
            (Some(previous), false) => diff(previous, &snapshot),
            (previous, _) => {
                let mut all: Vec<_> = snapshot
                    .iter()
                    .map(|(channel, value)| ChangedField {
                        channel: channel.to_string(),
                        value: value.clone(),
                    })
                    .collect();
                if let Some(previous) = previous {
                    all.extend(removed(previous, &snapshot));
                }
                all
            }
        };

        self.current = Some(snapshot);
        changed
    }

    /// Drop the cached snapshot so the next one is reported in full
    pub fn invalidate(&mut self) {
        self.current = None;
    }
}

fn diff(previous: &DeviceSnapshot, next: &DeviceSnapshot) -> Vec<ChangedField> {
    let updated = next
        .iter()
        .filter(|(channel, value)| previous.get(channel) != Some(*value))
        .map(|(channel, value)| ChangedField {
            channel: channel.to_string(),
            value: value.clone(),
        });

    updated.chain(removed(previous, next)).collect()
}

/// Fields of `previous` that `next` no longer carries
fn removed<'a>(
    previous: &'a DeviceSnapshot,
    next: &'a DeviceSnapshot,
) -> impl Iterator<Item = ChangedField> + 'a {
    previous
        .iter()
        .filter(move |(channel, value)| !value.is_undefined() && !next.contains(channel))
        .map(|(channel, _)| ChangedField {
            channel: channel.to_string(),
            value: Value::Undefined,
        })
}
