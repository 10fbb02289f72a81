//! One polled device
//!
//! Composes the scheduler, command coordinator, diff notifier and
//! availability tracker around an injected transport. Vendor bindings
//! provide the transport; everything else is shared.

use crate::context::{DeviceContext, Timing};
use crate::coordinator::{CommandCoordinator, CommandOutcome};
use crate::scheduler::{RefreshScheduler, TriggerOutcome};
use crate::{AvailabilityState, DeviceHandle, PollingConfig, Result, Sinks, WorkerPool};
use devpoll_transport::{Command, DeviceSnapshot, DeviceTransport};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct PolledDevice {
    ctx: Arc<DeviceContext>,
    scheduler: RefreshScheduler,
    coordinator: CommandCoordinator,
}

impl std::fmt::Debug for PolledDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolledDevice")
            .field("handle", &self.ctx.handle)
            .finish_non_exhaustive()
    }
}

impl PolledDevice {
    pub fn new(
        handle: DeviceHandle,
        transport: Arc<dyn DeviceTransport>,
        sinks: Sinks,
        pool: WorkerPool,
    ) -> Self {
        let ctx = Arc::new(DeviceContext::new(handle, transport, sinks, pool));
        let scheduler = RefreshScheduler::new(ctx.clone());
        let coordinator = CommandCoordinator::new(ctx.clone(), scheduler.clone());

        Self {
            ctx,
            scheduler,
            coordinator,
        }
    }

    /// Apply `config` and start polling.
    ///
    /// Invalid configuration fails before anything changes; the device then
    /// stays unscheduled (or keeps its previous schedule) until reconfigured.
    pub fn initialize(&self, config: &PollingConfig) -> Result<()> {
        if let Err(err) = config.validate() {
            tracing::error!(device = %self.ctx.handle, "Refusing configuration: {}", err);
            return Err(err);
        }

        self.ctx.set_timing(Timing::from(config));
        self.scheduler
            .start(config.refresh_interval_secs, config.initial_delay_secs)
    }

    /// Stop polling and forget cached state.
    ///
    /// Safe to call repeatedly. Does not wait for a fetch in progress; its
    /// result is discarded.
    pub fn dispose(&self) {
        self.scheduler.stop();

        let mut state = self.ctx.lock();
        state.notifier.invalidate();
        state.availability.reset();
        tracing::debug!(device = %self.ctx.handle, "Device disposed");
    }

    /// Forward a runtime command
    pub fn handle_command(&self, channel: impl Into<String>, command: Command) -> JoinHandle<CommandOutcome> {
        self.coordinator.handle(channel, command)
    }

    pub fn refresh(&self) -> TriggerOutcome {
        self.scheduler.trigger_immediate()
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.ctx.handle
    }

    pub fn availability(&self) -> AvailabilityState {
        self.ctx.lock().availability.state().clone()
    }

    pub fn last_snapshot(&self) -> Option<DeviceSnapshot> {
        self.ctx.lock().notifier.last_snapshot().cloned()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.is_scheduled()
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &CommandCoordinator {
        &self.coordinator
    }
}

impl Drop for PolledDevice {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}
