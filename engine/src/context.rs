//! Per-device shared state
//!
//! Everything a device's scheduler and coordinator share lives behind one
//! mutex. Holding it is what makes a fetch result, its availability
//! transition and its state updates one indivisible step, and what lets
//! `stop()` act as a barrier against late notifications.

use crate::availability::{AvailabilityTracker, OfflineReason};
use crate::notifier::StateDiffNotifier;
use crate::{DeviceHandle, PollingConfig, Sinks, WorkerPool};
use devpoll_transport::{DeviceSnapshot, DeviceTransport, TransportError};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub transport_timeout: Duration,
    pub command_refresh_delay: Duration,
}

impl From<&PollingConfig> for Timing {
    fn from(config: &PollingConfig) -> Self {
        Self {
            transport_timeout: config.transport_timeout(),
            command_refresh_delay: config.command_refresh_delay(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    /// Polling has been started and not stopped since
    pub active: bool,
    /// Bumped on every stop; results from an older session are discarded
    pub session: u64,
    /// Bumped whenever the timer is replaced or cancelled
    pub timer_generation: u64,
    /// Single-flight token: a fetch is running or about to run
    pub fetch_in_flight: bool,
    /// An immediate refresh arrived while a fetch was running
    pub rerun_requested: bool,
    pub notifier: StateDiffNotifier,
    pub availability: AvailabilityTracker,
}

pub(crate) struct DeviceContext {
    pub handle: DeviceHandle,
    pub transport: Arc<dyn DeviceTransport>,
    pub sinks: Sinks,
    pub pool: WorkerPool,
    timing: Mutex<Timing>,
    state: Mutex<DeviceState>,
}

impl DeviceContext {
    pub fn new(
        handle: DeviceHandle,
        transport: Arc<dyn DeviceTransport>,
        sinks: Sinks,
        pool: WorkerPool,
    ) -> Self {
        Self {
            handle,
            transport,
            sinks,
            pool,
            timing: Mutex::new(Timing::from(&PollingConfig::default())),
            state: Mutex::new(DeviceState::default()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timing(&self) -> Timing {
        *self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_timing(&self, timing: Timing) {
        *self.timing.lock().unwrap_or_else(PoisonError::into_inner) = timing;
    }

    /// Whether a result obtained during `session` may still be published
    pub fn accepts(&self, state: &DeviceState, session: u64) -> bool {
        state.active && state.session == session
    }

    /// Run one transport call under the configured timeout.
    ///
    /// Timeouts and panics come back as failures like any transport error.
    pub async fn call<T, F>(&self, operation: &str, call: F) -> Result<T, OfflineReason>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        let limit = self.timing().transport_timeout;

        match AssertUnwindSafe(tokio::time::timeout(limit, call))
            .catch_unwind()
            .await
        {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(OfflineReason::from(err)),
            Ok(Err(_elapsed)) => {
                tracing::debug!(device = %self.handle, operation, ?limit, "Transport call timed out");
                Err(OfflineReason::from(TransportError::Timeout))
            }
            Err(panic) => Err(OfflineReason::internal(format!(
                "{} panicked: {}",
                operation,
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Apply a successful fetch: availability first, then the state diff
    pub fn publish_snapshot(&self, state: &mut DeviceState, snapshot: DeviceSnapshot) {
        let transition = state.availability.report_success();
        if let Some(status) = &transition {
            tracing::info!(device = %self.handle, "Device is online");
            self.sinks.status.update_availability(&self.handle, status);
        }

        // Consumers may hold stale values after UNKNOWN or OFFLINE
        state
            .notifier
            .publish(&self.handle, snapshot, transition.is_some(), &*self.sinks.state);
    }

    /// Apply a failed exchange; channel values are left untouched
    pub fn publish_failure(&self, state: &mut DeviceState, reason: OfflineReason) {
        match state.availability.report_failure(reason) {
            Some(status) => {
                tracing::warn!(device = %self.handle, "Device went offline: {}", status);
                self.sinks.status.update_availability(&self.handle, &status);
            }
            None => tracing::debug!(device = %self.handle, "Device still offline"),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
