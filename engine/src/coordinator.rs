//! Inbound command handling

use crate::availability::OfflineReason;
use crate::context::DeviceContext;
use crate::scheduler::{RefreshScheduler, TriggerOutcome};
use devpoll_transport::{Command, CommandRejection, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Result of one command, for callers that care to look
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Refresh sentinel: a refresh was requested instead of a write
    RefreshRequested(TriggerOutcome),
    /// The device accepted the write; a refresh follows
    Sent,
    /// The transport does not support this channel or value
    Rejected(CommandRejection),
    /// The write failed and was reported to availability tracking
    Failed(OfflineReason),
    /// Polling is stopped, nothing was sent
    Inactive,
}

/// Translates runtime commands into transport writes
#[derive(Clone)]
pub struct CommandCoordinator {
    ctx: Arc<DeviceContext>,
    scheduler: RefreshScheduler,
}

impl CommandCoordinator {
    pub(crate) fn new(ctx: Arc<DeviceContext>, scheduler: RefreshScheduler) -> Self {
        Self { ctx, scheduler }
    }

    /// Handle a command on the shared worker pool.
    ///
    /// Never fails from the caller's point of view; the returned handle only
    /// reports what happened.
    pub fn handle(&self, channel: impl Into<String>, command: Command) -> JoinHandle<CommandOutcome> {
        let channel = channel.into();

        if command.is_refresh() {
            let outcome = self.scheduler.trigger_immediate();
            tracing::debug!(device = %self.ctx.handle, channel = %channel, ?outcome, "Refresh requested");
            return self
                .ctx
                .pool
                .schedule(async move { CommandOutcome::RefreshRequested(outcome) });
        }

        let this = self.clone();
        self.ctx
            .pool
            .submit(async move { this.execute(&channel, command).await })
    }

    /// Write a value without building a [`Command`]
    pub fn set(&self, channel: impl Into<String>, value: impl Into<Value>) -> JoinHandle<CommandOutcome> {
        self.handle(channel, Command::Set(value.into()))
    }

    async fn execute(&self, channel: &str, command: Command) -> CommandOutcome {
        let value = match command {
            Command::Refresh => {
                return CommandOutcome::RefreshRequested(self.scheduler.trigger_immediate())
            }
            Command::Set(value) => value,
        };
        let ctx = &self.ctx;

        let session = {
            let state = ctx.lock();
            if !state.active {
                tracing::debug!(device = %ctx.handle, channel, "Dropping command for stopped device");
                return CommandOutcome::Inactive;
            }
            state.session
        };

        if let Err(rejection) = ctx.transport.validate_command(channel, &value) {
            tracing::warn!(device = %ctx.handle, channel, %value, "Ignoring command: {}", rejection);
            return CommandOutcome::Rejected(rejection);
        }

        match ctx.call("command", ctx.transport.send_command(channel, &value)).await {
            Ok(()) => {
                tracing::debug!(device = %ctx.handle, channel, %value, "Command sent");
                self.refresh_after_command(session);
                CommandOutcome::Sent
            }
            Err(reason) => {
                tracing::warn!(device = %ctx.handle, channel, %value, "Command failed: {}", reason);
                let mut state = ctx.lock();
                if ctx.accepts(&state, session) {
                    ctx.publish_failure(&mut state, reason.clone());
                }
                CommandOutcome::Failed(reason)
            }
        }
    }

    fn refresh_after_command(&self, session: u64) {
        let delay = self.ctx.timing().command_refresh_delay;
        if delay.is_zero() {
            self.scheduler.trigger_immediate();
            return;
        }

        let ctx = self.ctx.clone();
        let scheduler = self.scheduler.clone();
        self.ctx.pool.schedule(async move {
            tokio::time::sleep(delay).await;
            if ctx.lock().session == session {
                scheduler.trigger_immediate();
            }
        });
    }
}
