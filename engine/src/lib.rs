//! devpoll engine
//!
//! Keeps a fleet of polled devices current. Each device gets a repeating
//! refresh, a single-flight gate around `fetch_state`, snapshot diffing and
//! an availability state machine. Vendor code only implements
//! [`DeviceTransport`](devpoll_transport::DeviceTransport).
//!
//! # Modules
//!
//! - [`scheduler`] - periodic and immediate refresh, single-flight
//! - [`coordinator`] - runtime commands and the refresh that follows them
//! - [`availability`] - UNKNOWN / ONLINE / OFFLINE tracking
//! - [`cache`] and [`notifier`] - snapshot diffing and state updates
//! - [`manager`] - the device fleet
//! - [`recording`] - JSON Lines event sessions
//!
//! # Example
//!
//! ```rust,no_run
//! use devpoll_engine::{DeviceHandle, DeviceManager, EngineConfig, LoggingSink, PollingConfig, Sinks, WorkerPool};
//! use devpoll_transport::{SimulatedDevice, SimulatedProfile};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::current(&EngineConfig::default());
//!     let manager = DeviceManager::new(pool, Sinks::shared(Arc::new(LoggingSink)));
//!
//!     let plug = Arc::new(SimulatedDevice::new("plug", SimulatedProfile::smart_plug()));
//!     manager
//!         .add_device(DeviceHandle::new("plug"), plug, &PollingConfig::every(30, 0))
//!         .unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     manager.shutdown();
//! }
//! ```

pub mod availability;
pub mod cache;
pub mod config;
mod context;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod handle;
pub mod manager;
pub mod notifier;
pub mod pool;
pub mod recording;
pub mod scheduler;
pub mod sink;

pub use availability::{AvailabilityState, AvailabilityTracker, FailureKind, OfflineReason, StatusDetail};
pub use cache::{ChangedField, SnapshotCache};
pub use config::{EngineConfig, PollingConfig};
pub use coordinator::{CommandCoordinator, CommandOutcome};
pub use device::PolledDevice;
pub use error::{EngineError, Result};
pub use handle::DeviceHandle;
pub use manager::DeviceManager;
pub use notifier::StateDiffNotifier;
pub use pool::WorkerPool;
pub use recording::{EventRecorder, RecordingSession};
pub use scheduler::{RefreshScheduler, TriggerOutcome};
pub use sink::{ChannelSink, DeviceEvent, LoggingSink, Sinks, StateSink, StatusSink};

pub use devpoll_transport::{
    Command, CommandRejection, DeviceSnapshot, DeviceTransport, TransportError, TransportErrorKind, Value,
};
