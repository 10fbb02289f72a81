//! Polling and engine configuration

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-device polling parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between periodic refreshes, must be > 0
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Delay before the first periodic refresh
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// Settle time before the refresh that follows a successful command
    #[serde(default)]
    pub command_refresh_delay_ms: u64,

    /// Upper bound for a single fetch or command, must be > 0
    #[serde(default = "default_transport_timeout")]
    pub transport_timeout_ms: u64,
}

fn default_refresh_interval() -> u64 { 30 }
fn default_transport_timeout() -> u64 { 5000 }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            initial_delay_secs: 0,
            command_refresh_delay_ms: 0,
            transport_timeout_ms: default_transport_timeout(),
        }
    }
}

impl PollingConfig {
    /// Config with the given interval and initial delay, other fields default
    pub fn every(refresh_interval_secs: u64, initial_delay_secs: u64) -> Self {
        Self {
            refresh_interval_secs,
            initial_delay_secs,
            ..Default::default()
        }
    }

    pub fn with_command_refresh_delay(mut self, delay: Duration) -> Self {
        self.command_refresh_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Reject values that would leave the device unpolled or unbounded
    pub fn validate(&self) -> Result<()> {
        validate_schedule(self.refresh_interval_secs, self.initial_delay_secs)?;

        if self.transport_timeout_ms == 0 {
            return Err(EngineError::Configuration(
                "transport_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn command_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.command_refresh_delay_ms)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }
}

/// Check scheduling parameters before anything is installed
pub(crate) fn validate_schedule(interval_secs: u64, initial_delay_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        return Err(EngineError::Configuration(
            "refresh interval must be greater than 0 seconds".to_string(),
        ));
    }
    // Duration arithmetic on the timer would overflow past this
    if interval_secs > u32::MAX as u64 || initial_delay_secs > u32::MAX as u64 {
        return Err(EngineError::Configuration(format!(
            "schedule out of range: interval {}s, initial delay {}s",
            interval_secs, initial_delay_secs
        )));
    }
    Ok(())
}

/// Settings shared by every device of one engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fetches and commands allowed to run at once across all devices
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_fetches: usize,
}

fn default_max_concurrent() -> usize { 16 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(EngineError::Configuration(
                "max_concurrent_fetches must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
