//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use devpoll_engine::{
    AvailabilityState, DeviceHandle, DeviceManager, EngineConfig, PolledDevice, Sinks, StateSink,
    StatusSink, WorkerPool,
};
use devpoll_transport::{CommandRejection, DeviceSnapshot, DeviceTransport, TransportError, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One notification, in the order the engine produced it
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    State { channel: String, value: Value },
    Status(AvailabilityState),
}

/// Records every sink call
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Recorded>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn states(&self) -> Vec<(String, Value)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::State { channel, value } => Some((channel, value)),
                Recorded::Status(_) => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<AvailabilityState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Status(status) => Some(status),
                Recorded::State { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl StateSink for MemorySink {
    fn update(&self, _device: &DeviceHandle, channel: &str, value: &Value) {
        self.events.lock().unwrap().push(Recorded::State {
            channel: channel.to_string(),
            value: value.clone(),
        });
    }
}

impl StatusSink for MemorySink {
    fn update_availability(&self, _device: &DeviceHandle, state: &AvailabilityState) {
        self.events.lock().unwrap().push(Recorded::Status(state.clone()));
    }
}

/// Overrides the normal snapshot for one fetch
pub enum Step {
    /// Answer normally
    Deliver,
    Fail(TransportError),
    Panic,
    Hang,
}

struct Script {
    fields: Vec<(String, Value)>,
    steps: VecDeque<Step>,
    command_failure: Option<TransportError>,
    commands: Vec<(String, Value)>,
}

/// Transport whose behaviour is driven by the test.
///
/// Fails the test if `fetch_state` is ever entered while another call is
/// still running.
pub struct ScriptedTransport {
    script: Mutex<Script>,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    latency: Mutex<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new(fields: &[(&str, Value)]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script {
                fields: fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect(),
                steps: VecDeque::new(),
                command_failure: None,
                commands: Vec::new(),
            }),
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            gate: Mutex::new(None),
        })
    }

    pub fn then(&self, step: Step) -> &Self {
        self.script.lock().unwrap().steps.push_back(step);
        self
    }

    pub fn set_field(&self, name: &str, value: Value) {
        let mut script = self.script.lock().unwrap();
        match script.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => script.fields.push((name.to_string(), value)),
        }
    }

    pub fn remove_field(&self, name: &str) {
        self.script.lock().unwrap().fields.retain(|(n, _)| n != name);
    }

    pub fn fail_commands(&self, err: Option<TransportError>) {
        self.script.lock().unwrap().command_failure = err;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Make every fetch wait for a permit of the returned semaphore
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.script.lock().unwrap().commands.clone()
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_state(&self) -> Result<DeviceSnapshot, TransportError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let _guard = InFlight(&self.in_flight);
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let step = self.script.lock().unwrap().steps.pop_front();
        match step {
            Some(Step::Fail(err)) => return Err(err),
            Some(Step::Panic) => panic!("scripted transport exploded"),
            Some(Step::Hang) => std::future::pending::<()>().await,
            Some(Step::Deliver) | None => {}
        }

        let script = self.script.lock().unwrap();
        Ok(script.fields.iter().cloned().collect())
    }

    async fn send_command(&self, channel: &str, value: &Value) -> Result<(), TransportError> {
        let mut script = self.script.lock().unwrap();
        script.commands.push((channel.to_string(), value.clone()));
        if let Some(err) = script.command_failure.clone() {
            return Err(err);
        }
        match script.fields.iter_mut().find(|(n, _)| n == channel) {
            Some((_, v)) => *v = value.clone(),
            None => script.fields.push((channel.to_string(), value.clone())),
        }
        Ok(())
    }

    fn validate_command(&self, channel: &str, value: &Value) -> Result<(), CommandRejection> {
        match channel {
            "firmware" => Err(CommandRejection::ReadOnly(channel.to_string())),
            "bogus" => Err(CommandRejection::UnknownChannel(channel.to_string())),
            "power" if value.as_bool().is_none() => Err(CommandRejection::UnsupportedValue {
                channel: channel.to_string(),
                value: value.clone(),
            }),
            _ => Ok(()),
        }
    }
}

pub fn pool() -> WorkerPool {
    WorkerPool::current(&EngineConfig::default())
}

pub fn device(transport: Arc<ScriptedTransport>, sink: Arc<MemorySink>) -> PolledDevice {
    PolledDevice::new(DeviceHandle::new("test-device"), transport, Sinks::shared(sink), pool())
}

pub fn manager(sink: Arc<MemorySink>) -> DeviceManager {
    DeviceManager::new(pool(), Sinks::shared(sink))
}

/// Let spawned work run to completion without moving the clock by much
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}
