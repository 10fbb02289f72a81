//! Device availability
//!
//! Maps the outcome of every transport call onto a small state machine:
//!
//! ```text
//! UNKNOWN --success--> ONLINE --failure--> OFFLINE(reason)
//!    |                   ^                      |
//!    +-----failure-------|----------------------+
//!                        +------success---------+
//! ```
//!
//! Only real transitions are reported. A failure of the same kind while
//! already offline refreshes the stored message without producing an event.

use devpoll_transport::{TransportError, TransportErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What went wrong, at the granularity status events are de-duplicated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    MalformedResponse,
    AuthFailure,
    /// A transport or sink panicked inside a refresh cycle
    Internal,
}

impl From<TransportErrorKind> for FailureKind {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Timeout => FailureKind::Timeout,
            TransportErrorKind::ConnectionRefused => FailureKind::ConnectionRefused,
            TransportErrorKind::MalformedResponse => FailureKind::MalformedResponse,
            TransportErrorKind::AuthFailure => FailureKind::AuthFailure,
        }
    }
}

/// Coarse classification shown next to an OFFLINE status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusDetail {
    /// The device could not be reached or answered garbage
    CommunicationError,
    /// The device answered but refused our credentials
    ConfigurationError,
}

impl From<FailureKind> for StatusDetail {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::AuthFailure => StatusDetail::ConfigurationError,
            _ => StatusDetail::CommunicationError,
        }
    }
}

/// Why a device is offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineReason {
    pub kind: FailureKind,
    pub detail: StatusDetail,
    pub message: String,
}

impl OfflineReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            detail: kind.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl From<&TransportError> for OfflineReason {
    fn from(err: &TransportError) -> Self {
        Self::new(err.kind().into(), err.to_string())
    }
}

impl From<TransportError> for OfflineReason {
    fn from(err: TransportError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.detail, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AvailabilityState {
    #[default]
    Unknown,
    Online,
    Offline(OfflineReason),
}

impl AvailabilityState {
    pub fn is_online(&self) -> bool {
        matches!(self, AvailabilityState::Online)
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, AvailabilityState::Offline(_))
    }
}

impl fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityState::Unknown => write!(f, "UNKNOWN"),
            AvailabilityState::Online => write!(f, "ONLINE"),
            AvailabilityState::Offline(reason) => write!(f, "OFFLINE ({})", reason),
        }
    }
}

/// Availability state machine of one device
#[derive(Debug, Default)]
pub struct AvailabilityTracker {
    state: AvailabilityState,
}

impl AvailabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AvailabilityState {
        &self.state
    }

    /// Record a successful exchange.
    ///
    /// Returns the new state if this was a transition (UNKNOWN or OFFLINE to ONLINE).
    pub fn report_success(&mut self) -> Option<AvailabilityState> {
        if self.state.is_online() {
            return None;
        }
        self.state = AvailabilityState::Online;
        Some(self.state.clone())
    }

    /// Record a failed exchange.
    ///
    /// Returns the new state unless the device was already offline for the
    /// same kind of failure.
    pub fn report_failure(&mut self, reason: OfflineReason) -> Option<AvailabilityState> {
        if let AvailabilityState::Offline(current) = &mut self.state {
            if current.kind == reason.kind {
                current.message = reason.message;
                return None;
            }
        }
        self.state = AvailabilityState::Offline(reason);
        Some(self.state.clone())
    }

    /// Forget everything; only used when the device is disposed
    pub fn reset(&mut self) {
        self.state = AvailabilityState::Unknown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> OfflineReason {
        OfflineReason::from(TransportError::Timeout)
    }

    #[test]
    fn repeated_failures_of_one_kind_emit_once() {
        let mut tracker = AvailabilityTracker::new();
        let mut events = Vec::new();

        events.extend(tracker.report_success());
        events.extend(tracker.report_failure(timeout()));
        events.extend(tracker.report_failure(timeout()));
        events.extend(tracker.report_success());

        assert_eq!(
            events,
            vec![
                AvailabilityState::Online,
                AvailabilityState::Offline(timeout()),
                AvailabilityState::Online,
            ]
        );
    }

    #[test]
    fn changing_failure_kind_emits_again() {
        let mut tracker = AvailabilityTracker::new();
        assert!(tracker.report_failure(timeout()).is_some());

        let refused = OfflineReason::from(TransportError::ConnectionRefused("reset".into()));
        assert_eq!(
            tracker.report_failure(refused.clone()),
            Some(AvailabilityState::Offline(refused))
        );
    }

    #[test]
    fn same_kind_updates_message_silently() {
        let mut tracker = AvailabilityTracker::new();
        tracker.report_failure(OfflineReason::new(FailureKind::ConnectionRefused, "first"));
        assert!(tracker
            .report_failure(OfflineReason::new(FailureKind::ConnectionRefused, "second"))
            .is_none());

        match tracker.state() {
            AvailabilityState::Offline(reason) => assert_eq!(reason.message, "second"),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn unknown_goes_straight_to_offline() {
        let mut tracker = AvailabilityTracker::new();
        assert_eq!(tracker.state(), &AvailabilityState::Unknown);
        assert!(tracker.report_failure(timeout()).is_some());
        assert!(tracker.state().is_offline());
    }

    #[test]
    fn online_success_is_silent() {
        let mut tracker = AvailabilityTracker::new();
        assert!(tracker.report_success().is_some());
        assert!(tracker.report_success().is_none());
    }

    #[test]
    fn auth_failures_are_configuration_errors() {
        let reason = OfflineReason::from(TransportError::AuthFailure("bad token".into()));
        assert_eq!(reason.kind, FailureKind::AuthFailure);
        assert_eq!(reason.detail, StatusDetail::ConfigurationError);

        let reason = OfflineReason::from(TransportError::MalformedResponse("eof".into()));
        assert_eq!(reason.detail, StatusDetail::CommunicationError);
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(AvailabilityState::Offline(timeout())).unwrap();
        assert_eq!(json["status"], "offline");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["detail"], "communication_error");
    }
}
