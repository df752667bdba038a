//! Fixed-period polling bound to a conversation's lifecycle.

use std::future::Future;
use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Something the scheduler can poll.
pub trait PollTarget: Send + Sync + 'static {
    /// Checked before every tick; `false` skips the tick without stopping.
    fn wants_poll(&self) -> bool;

    fn poll(&self) -> impl Future<Output = ()> + Send;
}

/// Explicit start/stop subscription around a background poll task.
///
/// The task holds only a weak reference to its target and ends on its own
/// once the target is dropped. A poll already in flight is never aborted;
/// cancellation is observed between ticks.
pub struct PollSubscription {
    period: Duration,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl PollSubscription {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            cancel: None,
            task: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// A task whose target was dropped has finished on its own.
    pub fn is_running(&self) -> bool {
        self.cancel.is_some() && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawn the poll task. Returns `false` if it was already running.
    pub fn start<T: PollTarget>(&mut self, target: Weak<T>) -> bool {
        if self.is_running() {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            // The first tick is one full period out; opening already fetched.
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(live) = target.upgrade() else {
                    break;
                };
                if live.wants_poll() {
                    live.poll().await;
                }
            }

            debug!("Poll task finished");
        });

        self.cancel = Some(cancel);
        self.task = Some(task);
        true
    }

    /// Stop ticking. Returns `false` if nothing was running.
    pub fn stop(&mut self) -> bool {
        self.task = None;
        match self.cancel.take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for PollSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}
