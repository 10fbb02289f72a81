//! Downstream consumers of state and status updates
//!
//! Sinks are called while the device's state lock is held, which is what
//! keeps notifications ordered per device. Implementations must return
//! quickly and must not call back into the same device.

use crate::{AvailabilityState, DeviceHandle};
use chrono::{DateTime, Utc};
use devpoll_transport::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives one call per changed field per completed fetch
pub trait StateSink: Send + Sync {
    fn update(&self, device: &DeviceHandle, channel: &str, value: &Value);
}

/// Receives every availability transition
pub trait StatusSink: Send + Sync {
    fn update_availability(&self, device: &DeviceHandle, state: &AvailabilityState);
}

/// The pair of sinks a device publishes to
#[derive(Clone)]
pub struct Sinks {
    pub state: Arc<dyn StateSink>,
    pub status: Arc<dyn StatusSink>,
}

impl Sinks {
    pub fn new(state: Arc<dyn StateSink>, status: Arc<dyn StatusSink>) -> Self {
        Self { state, status }
    }

    /// Use one value for both roles
    pub fn shared<S>(sink: Arc<S>) -> Self
    where
        S: StateSink + StatusSink + 'static,
    {
        Self {
            state: sink.clone(),
            status: sink,
        }
    }
}

/// A state or status update, as carried over channels and stored by the recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    StateChanged {
        device: DeviceHandle,
        channel: String,
        value: Value,
        at: DateTime<Utc>,
    },
    StatusChanged {
        device: DeviceHandle,
        status: AvailabilityState,
        at: DateTime<Utc>,
    },
}

impl DeviceEvent {
    pub fn device(&self) -> &DeviceHandle {
        match self {
            DeviceEvent::StateChanged { device, .. } | DeviceEvent::StatusChanged { device, .. } => {
                device
            }
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            DeviceEvent::StateChanged { at, .. } | DeviceEvent::StatusChanged { at, .. } => *at,
        }
    }

    /// Replay the event into a pair of sinks
    pub fn dispatch(&self, state: &dyn StateSink, status: &dyn StatusSink) {
        match self {
            DeviceEvent::StateChanged { device, channel, value, .. } => {
                state.update(device, channel, value)
            }
            DeviceEvent::StatusChanged { device, status: availability, .. } => {
                status.update_availability(device, availability)
            }
        }
    }
}

/// Logs every update
pub struct LoggingSink;

impl StateSink for LoggingSink {
    fn update(&self, device: &DeviceHandle, channel: &str, value: &Value) {
        tracing::info!(device = %device, channel, %value, "State updated: {}.{} = {}", device, channel, value);
    }
}

impl StatusSink for LoggingSink {
    fn update_availability(&self, device: &DeviceHandle, state: &AvailabilityState) {
        match state {
            AvailabilityState::Offline(reason) => {
                tracing::warn!(device = %device, kind = ?reason.kind, "Device offline: {} ({})", device, reason)
            }
            _ => tracing::info!(device = %device, "Device {}: {}", device, state),
        }
    }
}

/// Forwards updates into an unbounded channel.
///
/// Sinks run under the device lock and cannot wait for the receiver, and a
/// dropped update would never be re-sent once the diff cache has moved on.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: DeviceEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event channel closed");
        }
    }
}

impl StateSink for ChannelSink {
    fn update(&self, device: &DeviceHandle, channel: &str, value: &Value) {
        self.forward(DeviceEvent::StateChanged {
            device: device.clone(),
            channel: channel.to_string(),
            value: value.clone(),
            at: Utc::now(),
        });
    }
}

impl StatusSink for ChannelSink {
    fn update_availability(&self, device: &DeviceHandle, state: &AvailabilityState) {
        self.forward(DeviceEvent::StatusChanged {
            device: device.clone(),
            status: state.clone(),
            at: Utc::now(),
        });
    }
}
