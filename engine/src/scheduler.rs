//! Refresh scheduling
//!
//! One repeating timer per device plus a single-flight gate in front of
//! `fetch_state`. Triggers that arrive while a fetch is running are merged:
//!
//! - a periodic tick is dropped, the running fetch already serves it
//! - an immediate request is queued and runs once right after
//!
//! Fetches for one device therefore never overlap, and their results are
//! published in the order they completed.

use crate::availability::OfflineReason;
use crate::config::validate_schedule;
use crate::context::{panic_message, DeviceContext};
use crate::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What happened to a refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A fetch was started for this request
    Started,
    /// A fetch is running; one more will run right after it
    Queued,
    /// A fetch is running and already covers this request
    Coalesced,
    /// Polling is stopped, nothing was done
    Inactive,
}

#[derive(Debug, Clone, Copy)]
enum TriggerSource {
    Periodic { generation: u64 },
    Immediate,
}

/// The single outstanding timer registration of a device
struct ScheduledRefresh {
    interval: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduledRefresh {
    fn cancel(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

struct SchedulerInner {
    ctx: Arc<DeviceContext>,
    slot: Mutex<Option<ScheduledRefresh>>,
}

/// Periodic and on-demand refresh of one device
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub(crate) fn new(ctx: Arc<DeviceContext>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                ctx,
                slot: Mutex::new(None),
            }),
        }
    }

    /// Install the repeating refresh, replacing any previous one.
    ///
    /// Fails with [`EngineError::Configuration`](crate::EngineError::Configuration)
    /// when `interval_secs` is zero; an existing schedule is left alone in that case.
    pub fn start(&self, interval_secs: u64, initial_delay_secs: u64) -> Result<()> {
        validate_schedule(interval_secs, initial_delay_secs)?;

        let interval = Duration::from_secs(interval_secs);
        let initial_delay = Duration::from_secs(initial_delay_secs);
        let ctx = &self.inner.ctx;

        let mut slot = self.inner.slot();
        let generation = {
            let mut state = ctx.lock();
            // Ticks of the previous timer are stale from here on
            state.timer_generation += 1;
            state.active = true;
            state.timer_generation
        };

        if let Some(previous) = slot.take() {
            tracing::debug!(device = %ctx.handle, old = ?previous.interval, new = ?interval, "Replacing refresh schedule");
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        let task = ctx.pool.schedule(run_timer(
            Arc::downgrade(&self.inner),
            generation,
            interval,
            initial_delay,
            cancel.clone(),
        ));
        *slot = Some(ScheduledRefresh {
            interval,
            cancel,
            task,
        });

        tracing::info!(
            device = %ctx.handle,
            "Polling every {:?} (first refresh in {:?})",
            interval,
            initial_delay
        );
        Ok(())
    }

    /// Cancel the timer and stop accepting results.
    ///
    /// A fetch already in progress may finish, but nothing it returns is
    /// published after this returns, and it does not start another one.
    pub fn stop(&self) {
        let ctx = &self.inner.ctx;
        let mut slot = self.inner.slot();
        {
            // Taking the state lock waits out a publication in progress
            let mut state = ctx.lock();
            state.timer_generation += 1;
            state.rerun_requested = false;
            if state.active {
                state.active = false;
                state.session += 1;
            }
        }

        if let Some(previous) = slot.take() {
            previous.cancel();
            tracing::info!(device = %ctx.handle, "Polling stopped");
        }
    }

    /// Refresh as soon as possible, after any fetch that is already running
    pub fn trigger_immediate(&self) -> TriggerOutcome {
        self.inner.request(TriggerSource::Immediate)
    }

    /// Interval of the installed timer
    pub fn interval(&self) -> Option<Duration> {
        self.inner.slot().as_ref().map(|s| s.interval)
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner.slot().is_some()
    }
}

impl SchedulerInner {
    fn slot(&self) -> MutexGuard<'_, Option<ScheduledRefresh>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(self: &Arc<Self>, source: TriggerSource) -> TriggerOutcome {
        {
            let mut state = self.ctx.lock();
            if !state.active {
                return TriggerOutcome::Inactive;
            }
            if let TriggerSource::Periodic { generation } = source {
                if generation != state.timer_generation {
                    return TriggerOutcome::Inactive;
                }
            }

            if state.fetch_in_flight {
                return match source {
                    TriggerSource::Immediate => {
                        state.rerun_requested = true;
                        TriggerOutcome::Queued
                    }
                    TriggerSource::Periodic { .. } => TriggerOutcome::Coalesced,
                };
            }
            state.fetch_in_flight = true;
        }

        let inner = self.clone();
        self.ctx.pool.submit(async move { inner.run_flight().await });
        TriggerOutcome::Started
    }

    /// Owns the single-flight token until no rerun is pending
    async fn run_flight(self: Arc<Self>) {
        loop {
            let session = {
                let mut state = self.ctx.lock();
                if !state.active {
                    state.fetch_in_flight = false;
                    state.rerun_requested = false;
                    return;
                }
                state.session
            };

            let cycle = AssertUnwindSafe(self.refresh_cycle(session)).catch_unwind().await;
            if let Err(panic) = cycle {
                let reason = OfflineReason::internal(format!(
                    "refresh panicked: {}",
                    panic_message(panic.as_ref())
                ));
                tracing::error!(device = %self.ctx.handle, "{}", reason.message);

                let mut state = self.ctx.lock();
                if self.ctx.accepts(&state, session) {
                    self.ctx.publish_failure(&mut state, reason);
                }
            }

            let again = {
                let mut state = self.ctx.lock();
                if state.active && state.session != session {
                    // Restarted while this fetch ran; its result was discarded
                    // and the new timer's first tick was coalesced into it
                    state.rerun_requested = false;
                    true
                } else if state.rerun_requested {
                    state.rerun_requested = false;
                    true
                } else {
                    state.fetch_in_flight = false;
                    false
                }
            };
            if !again {
                return;
            }
        }
    }

    async fn refresh_cycle(&self, session: u64) {
        let ctx = &self.ctx;
        let result = ctx.call("fetch", ctx.transport.fetch_state()).await;

        let mut state = ctx.lock();
        if !ctx.accepts(&state, session) {
            tracing::debug!(device = %ctx.handle, "Discarding refresh result of stopped device");
            return;
        }

        match result {
            Ok(snapshot) => ctx.publish_snapshot(&mut state, snapshot),
            Err(reason) => ctx.publish_failure(&mut state, reason),
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(previous) = self.slot().take() {
            previous.cancel();
        }
    }
}

async fn run_timer(
    scheduler: Weak<SchedulerInner>,
    generation: u64,
    interval: Duration,
    initial_delay: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let inner = match scheduler.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                match inner.request(TriggerSource::Periodic { generation }) {
                    TriggerOutcome::Inactive => break,
                    TriggerOutcome::Coalesced => {
                        tracing::debug!(device = %inner.ctx.handle, "Previous refresh still running, skipping tick");
                    }
                    TriggerOutcome::Started | TriggerOutcome::Queued => {}
                }
            }
        }
    }
}
