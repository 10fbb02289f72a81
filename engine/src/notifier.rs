use crate::cache::{ChangedField, SnapshotCache};
use crate::{DeviceHandle, StateSink};
use devpoll_transport::DeviceSnapshot;

/// Turns fetched snapshots into per-channel state updates.
///
/// Fields are emitted in snapshot declaration order, one `StateSink::update`
/// per changed field.
#[derive(Debug, Default)]
pub struct StateDiffNotifier {
    cache: SnapshotCache,
}

impl StateDiffNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `snapshot` against the cache, emit the changes and store it.
    ///
    /// `full` forces every field out, used when the device just became
    /// available and consumers may hold stale values.
    pub fn publish(
        &mut self,
        device: &DeviceHandle,
        snapshot: DeviceSnapshot,
        full: bool,
        sink: &dyn StateSink,
    ) -> Vec<ChangedField> {
        let changed = self.cache.apply_snapshot(snapshot, full);

        for field in &changed {
            sink.update(device, &field.channel, &field.value);
        }

        if !changed.is_empty() {
            tracing::debug!(device = %device, changed = changed.len(), full, "Published state changes");
        }
        changed
    }

    pub fn last_snapshot(&self) -> Option<&DeviceSnapshot> {
        self.cache.current()
    }

    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }
}
