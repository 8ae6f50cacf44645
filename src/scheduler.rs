//! Cancellable background triggers.
//!
//! Interrogation polling, session lifetime checks, delayed reconnects and
//! cache maintenance all run through one [`Scheduler`]. Every task it
//! spawns observes the scheduler's cancellation token, so
//! [`Scheduler::shutdown`] stops them all. Timing uses `tokio::time`, which
//! lets tests pause and advance the clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Spawns periodic and delayed tasks tied to a shared cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    token: CancellationToken,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `period`, first after one full period.
    ///
    /// A slow tick delays the next one instead of causing a burst.
    pub fn every<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.child_token();
        let cancelled = token.clone();
        let start = Instant::now() + period;
        tokio::spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        trace!(task = name, "Tick");
                        tick().await;
                    }
                }
            }
            debug!(task = name, "Periodic task stopped");
        });
        ScheduledTask { token, detached: false }
    }

    /// Run `task` once after `delay`, unless cancelled first.
    pub fn after<Fut>(&self, delay: Duration, task: Fut) -> ScheduledTask
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.child_token();
        let cancelled = token.clone();
        let deadline = Instant::now() + delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = sleep_until(deadline) => task.await,
            }
        });
        ScheduledTask { token, detached: false }
    }

    /// Stop every task spawned by this scheduler and its clones.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to a scheduled task; cancels it when dropped unless detached.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    detached: bool,
}

impl ScheduledTask {
    /// Stop the task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Let the task run to completion without holding the handle.
    ///
    /// Scheduler shutdown still stops it.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// Whether the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if !self.detached {
            self.token.cancel();
        }
    }
}
