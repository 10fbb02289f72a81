//! Simulated device
//!
//! An in-memory device with a field table, writable channels, network
//! latency and failure injection. Used by the application to run a fleet
//! without hardware, and by tests to drive the engine.

use crate::{
    CommandRejection, DeviceSnapshot, DeviceTransport, TransportError, TransportErrorKind, Value,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One field of a simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedField {
    pub name: String,
    pub value: Value,
    /// Accepts commands
    #[serde(default)]
    pub writable: bool,
    /// Maximum random walk applied to numeric values on each fetch
    #[serde(default)]
    pub drift: f64,
}

impl SimulatedField {
    pub fn new(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            writable: false,
            drift: 0.0,
        }
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }
}

/// Behaviour of a simulated device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedProfile {
    #[serde(default)]
    pub fields: Vec<SimulatedField>,
    /// Simulated round trip per request
    #[serde(default)]
    pub latency_ms: u64,
    /// Probability (0.0 - 1.0) that a fetch fails with a connection error
    #[serde(default)]
    pub failure_rate: f64,
}

impl SimulatedProfile {
    /// Heating thermostat with power, setpoint and mode channels
    pub fn thermostat() -> Self {
        Self {
            fields: vec![
                SimulatedField::new("power", false).writable(),
                SimulatedField::new("setpoint", 21.0).writable(),
                SimulatedField::new("temperature", 19.5).with_drift(0.2),
                SimulatedField::new("mode", "HEAT").writable(),
                SimulatedField::new("outdoor_temperature", Value::Undefined),
            ],
            latency_ms: 50,
            failure_rate: 0.0,
        }
    }

    /// Smart plug reporting power draw
    pub fn smart_plug() -> Self {
        Self {
            fields: vec![
                SimulatedField::new("power", true).writable(),
                SimulatedField::new("watts", 42.0).with_drift(1.5),
                SimulatedField::new("energy_kwh", 1.25),
            ],
            latency_ms: 20,
            failure_rate: 0.0,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }
}

struct SimulatedState {
    fields: Vec<SimulatedField>,
    reachable: bool,
    injected: Option<(TransportErrorKind, u32)>,
    rng: u64,
    fetches: u64,
    commands: u64,
}

impl SimulatedState {
    fn next_random(&mut self) -> f64 {
        self.rng = self.rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.rng >> 11) as f64 / (1u64 << 53) as f64
    }

    fn take_injected_failure(&mut self) -> Option<TransportErrorKind> {
        match self.injected.take() {
            Some((kind, remaining)) if remaining > 0 => {
                if remaining > 1 {
                    self.injected = Some((kind, remaining - 1));
                }
                Some(kind)
            }
            _ => None,
        }
    }
}

/// In-memory device implementing [`DeviceTransport`]
pub struct SimulatedDevice {
    name: String,
    latency: Duration,
    failure_rate: f64,
    state: Mutex<SimulatedState>,
}

impl SimulatedDevice {
    pub fn new(name: &str, profile: SimulatedProfile) -> Self {
        let seed = name
            .bytes()
            .fold(0x9E37_79B9_7F4A_7C15u64, |acc, b| acc.rotate_left(5) ^ b as u64);

        Self {
            name: name.to_string(),
            latency: Duration::from_millis(profile.latency_ms),
            failure_rate: profile.failure_rate.clamp(0.0, 1.0),
            state: Mutex::new(SimulatedState {
                fields: profile.fields,
                reachable: true,
                injected: None,
                rng: seed,
                fetches: 0,
                commands: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` requests with `kind`
    pub fn fail_next(&self, kind: TransportErrorKind, count: u32) {
        self.state().injected = Some((kind, count));
    }

    /// Unplug or reconnect the device
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
        tracing::debug!(device = %self.name, reachable, "Simulated reachability changed");
    }

    /// Change a field on the device side, as a user pressing a button would
    pub fn set_field(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut state = self.state();
        match state.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = value,
            None => state.fields.push(SimulatedField::new(name, value)),
        }
    }

    pub fn fetch_count(&self) -> u64 {
        self.state().fetches
    }

    pub fn command_count(&self) -> u64 {
        self.state().commands
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn check_link(&self, state: &mut SimulatedState) -> Result<(), TransportError> {
        if !state.reachable {
            return Err(TransportError::ConnectionRefused(format!(
                "{} is unreachable",
                self.name
            )));
        }
        if let Some(kind) = state.take_injected_failure() {
            return Err(TransportError::from_kind(kind, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceTransport for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_state(&self) -> Result<DeviceSnapshot, TransportError> {
        self.round_trip().await;

        let mut state = self.state();
        state.fetches += 1;
        self.check_link(&mut state)?;

        if self.failure_rate > 0.0 && state.next_random() < self.failure_rate {
            return Err(TransportError::ConnectionRefused(
                "simulated network drop".to_string(),
            ));
        }

        let mut builder = DeviceSnapshot::builder();
        for i in 0..state.fields.len() {
            let drift = state.fields[i].drift;
            if drift > 0.0 {
                let step = (state.next_random() * 2.0 - 1.0) * drift;
                if let Value::Number(n) = &mut state.fields[i].value {
                    *n = ((*n + step) * 100.0).round() / 100.0;
                }
            }
            let field = &state.fields[i];
            builder = builder.field(field.name.clone(), field.value.clone());
        }

        Ok(builder.build())
    }

    async fn send_command(&self, channel: &str, value: &Value) -> Result<(), TransportError> {
        self.round_trip().await;

        let mut state = self.state();
        state.commands += 1;
        self.check_link(&mut state)?;

        let field = state
            .fields
            .iter_mut()
            .find(|f| f.name == channel)
            .ok_or_else(|| TransportError::MalformedResponse(format!("no channel {}", channel)))?;
        field.value = value.clone();

        tracing::debug!(device = %self.name, channel, %value, "Simulated command applied");
        Ok(())
    }

    fn validate_command(&self, channel: &str, value: &Value) -> Result<(), CommandRejection> {
        let state = self.state();
        let field = state
            .fields
            .iter()
            .find(|f| f.name == channel)
            .ok_or_else(|| CommandRejection::UnknownChannel(channel.to_string()))?;

        if !field.writable {
            return Err(CommandRejection::ReadOnly(channel.to_string()));
        }
        if !field.value.is_undefined() && !field.value.same_type(value) {
            return Err(CommandRejection::UnsupportedValue {
                channel: channel.to_string(),
                value: value.clone(),
            });
        }
        Ok(())
    }
}
