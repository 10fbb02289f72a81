//! Device fleet
//!
//! Owns every [`PolledDevice`] of one engine instance. All devices share the
//! manager's worker pool and sinks; nothing else is shared between them.

use crate::coordinator::CommandOutcome;
use crate::scheduler::TriggerOutcome;
use crate::{
    AvailabilityState, DeviceHandle, EngineError, PollingConfig, PolledDevice, Result, Sinks,
    WorkerPool,
};
use devpoll_transport::{Command, DeviceTransport};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;

pub struct DeviceManager {
    pool: WorkerPool,
    sinks: Sinks,
    devices: RwLock<HashMap<DeviceHandle, Arc<PolledDevice>>>,
}

impl DeviceManager {
    pub fn new(pool: WorkerPool, sinks: Sinks) -> Self {
        Self {
            pool,
            sinks,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Register a device and start polling it.
    ///
    /// A device whose configuration is rejected is not registered.
    pub fn add_device(
        &self,
        handle: DeviceHandle,
        transport: Arc<dyn DeviceTransport>,
        config: &PollingConfig,
    ) -> Result<Arc<PolledDevice>> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if devices.contains_key(&handle) {
            return Err(EngineError::DuplicateDevice(handle.to_string()));
        }

        let device = Arc::new(PolledDevice::new(
            handle.clone(),
            transport,
            self.sinks.clone(),
            self.pool.clone(),
        ));
        device.initialize(config)?;

        tracing::info!(device = %handle, "Device registered");
        devices.insert(handle, device.clone());
        Ok(device)
    }

    /// Dispose a device and drop it from the fleet
    pub fn remove_device(&self, id: &str) -> Result<()> {
        let device = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| EngineError::UnknownDevice(id.to_string()))?;

        device.dispose();
        tracing::info!(device = %device.handle(), "Device removed");
        Ok(())
    }

    pub fn device(&self, id: &str) -> Option<Arc<PolledDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Route a command to a device
    pub fn command(
        &self,
        id: &str,
        channel: impl Into<String>,
        command: Command,
    ) -> Result<JoinHandle<CommandOutcome>> {
        let device = self
            .device(id)
            .ok_or_else(|| EngineError::UnknownDevice(id.to_string()))?;
        Ok(device.handle_command(channel, command))
    }

    /// Request an immediate refresh of every device; returns how many were started or queued
    pub fn refresh_all(&self) -> usize {
        self.all_devices()
            .iter()
            .map(|device| device.refresh())
            .filter(|outcome| matches!(outcome, TriggerOutcome::Started | TriggerOutcome::Queued))
            .count()
    }

    pub fn availability(&self, id: &str) -> Option<AvailabilityState> {
        self.device(id).map(|device| device.availability())
    }

    /// Registered device handles, sorted
    pub fn device_ids(&self) -> Vec<DeviceHandle> {
        let mut ids: Vec<_> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every device
    pub fn shutdown(&self) {
        let devices: Vec<_> = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, device)| device)
            .collect();

        for device in &devices {
            device.dispose();
        }
        tracing::info!("Device manager shut down ({} devices disposed)", devices.len());
    }

    fn all_devices(&self) -> Vec<Arc<PolledDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.shutdown();
        }
    }
}
