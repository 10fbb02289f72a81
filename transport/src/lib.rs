//! devpoll Device Transport Layer
//!
//! Contracts between the polling engine and the code that actually talks to
//! a device. Vendor protocols (HTTP/JSON, raw TCP, Modbus, BLE...) live behind
//! [`DeviceTransport`]; the engine only ever sees [`DeviceSnapshot`]s and
//! [`TransportError`]s.
//!
//! # Modules
//!
//! - [`value`] - channel values and inbound commands
//! - [`snapshot`] - immutable, atomically fetched device state
//! - [`simulated`] - in-memory device with latency and failure injection
//!
//! # Example
//!
//! ```rust,no_run
//! use devpoll_transport::{DeviceTransport, SimulatedDevice, SimulatedProfile, Value};
//!
//! #[tokio::main]
//! async fn main() {
//!     let profile = SimulatedProfile::thermostat();
//!     let device = SimulatedDevice::new("living-room", profile);
//!
//!     device.send_command("power", &Value::Bool(true)).await.unwrap();
//!     let snapshot = device.fetch_state().await.unwrap();
//!     for (field, value) in snapshot.iter() {
//!         println!("{}: {}", field, value);
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod simulated;
pub mod snapshot;
pub mod value;

pub use simulated::{SimulatedDevice, SimulatedField, SimulatedProfile};
pub use snapshot::{DeviceSnapshot, SnapshotBuilder};
pub use value::{Command, Value};

/// I/O against one physical or logical device.
///
/// Both async operations may block on the network for an arbitrary time; the
/// engine bounds them with its own timeout and never calls them concurrently
/// for `fetch_state` on the same device.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &str;

    /// Fetch one complete snapshot of the device state.
    async fn fetch_state(&self) -> Result<DeviceSnapshot, TransportError>;

    /// Write `value` to `channel` on the device.
    async fn send_command(&self, channel: &str, value: &Value) -> Result<(), TransportError>;

    /// Check that `channel` accepts `value` before anything goes on the wire.
    ///
    /// Rejections are configuration or programming problems and never affect
    /// device availability. The default accepts everything.
    fn validate_command(&self, channel: &str, value: &Value) -> Result<(), CommandRejection> {
        let _ = (channel, value);
        Ok(())
    }
}

/// Communication failures. All of them are recoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Timed out waiting for device")]
    Timeout,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),
}

impl TransportError {
    /// Build an error of the given kind with a message.
    ///
    /// `Timeout` carries no message and ignores it.
    pub fn from_kind(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        match kind {
            TransportErrorKind::Timeout => TransportError::Timeout,
            TransportErrorKind::ConnectionRefused => TransportError::ConnectionRefused(message.into()),
            TransportErrorKind::MalformedResponse => TransportError::MalformedResponse(message.into()),
            TransportErrorKind::AuthFailure => TransportError::AuthFailure(message.into()),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Timeout => TransportErrorKind::Timeout,
            TransportError::ConnectionRefused(_) => TransportErrorKind::ConnectionRefused,
            TransportError::MalformedResponse(_) => TransportErrorKind::MalformedResponse,
            TransportError::AuthFailure(_) => TransportErrorKind::AuthFailure,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                TransportError::MalformedResponse(err.to_string())
            }
            ErrorKind::PermissionDenied => TransportError::AuthFailure(err.to_string()),
            _ => TransportError::ConnectionRefused(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::MalformedResponse(err.to_string())
    }
}

/// Discriminant of [`TransportError`], used to de-duplicate status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    ConnectionRefused,
    MalformedResponse,
    AuthFailure,
}

/// Command refused before it reached the device
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandRejection {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Channel is read-only: {0}")]
    ReadOnly(String),

    #[error("Unsupported value {value} for channel {channel}")]
    UnsupportedValue { channel: String, value: Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_transport_kinds() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(TransportError::from(timeout), TransportError::Timeout);

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(
            TransportError::from(refused).kind(),
            TransportErrorKind::ConnectionRefused
        );

        let garbage = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad frame");
        assert_eq!(
            TransportError::from(garbage).kind(),
            TransportErrorKind::MalformedResponse
        );
    }

    #[test]
    fn json_errors_are_malformed_responses() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(
            TransportError::from(err).kind(),
            TransportErrorKind::MalformedResponse
        );
    }

    #[test]
    fn from_kind_keeps_message() {
        let err = TransportError::from_kind(TransportErrorKind::AuthFailure, "token expired");
        assert_eq!(err, TransportError::AuthFailure("token expired".to_string()));
        assert_eq!(err.to_string(), "Authentication failed: token expired");
        assert_eq!(
            TransportError::from_kind(TransportErrorKind::Timeout, "ignored"),
            TransportError::Timeout
        );
    }
}
