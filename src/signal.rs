//! One-shot signals and cooperative draining.
//!
//! A [`Signal`] is pulsed at most once and never resets; mirrors use it for their
//! outdated flag. A [`Drainer`] owns long-running background work: each loop holds a
//! [`DrainLock`], watches its drain signal, and unwinds with
//! [`ClusterError::Interrupted`] once the drainer starts draining.

use crate::error::{ClusterError, Result};

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;

#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulses the signal. Idempotent.
    pub fn pulse(&self) {
        self.token.cancel();
    }

    pub fn is_pulsed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been pulsed.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

/// Runs `fut` unless `interruptor` fires first.
pub async fn interruptible<F>(interruptor: &CancellationToken, fut: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = interruptor.cancelled() => Err(ClusterError::Interrupted),
        output = fut => Ok(output),
    }
}

/// Tracks background tasks and tells them when to stop.
pub struct Drainer {
    drain_signal: CancellationToken,
    tracker: TaskTracker,
}

impl Drainer {
    pub fn new() -> Self {
        Self {
            drain_signal: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Grants a lock that keeps `drain()` waiting until it is dropped.
    pub fn lock(&self) -> DrainLock {
        DrainLock {
            drain_signal: self.drain_signal.clone(),
            _keepalive: self.tracker.token(),
        }
    }

    /// Spawns a task that `drain()` will wait for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    pub fn is_draining(&self) -> bool {
        self.drain_signal.is_cancelled()
    }

    /// Pulses the drain signal and waits for every lock and spawned task to finish.
    pub async fn drain(&self) {
        self.drain_signal.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("Drainer finished");
    }
}

impl Default for Drainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Drainer {
    fn drop(&mut self) {
        self.drain_signal.cancel();
    }
}

pub struct DrainLock {
    drain_signal: CancellationToken,
    _keepalive: TaskTrackerToken,
}

impl DrainLock {
    pub fn drain_signal(&self) -> &CancellationToken {
        &self.drain_signal
    }

    pub fn is_draining(&self) -> bool {
        self.drain_signal.is_cancelled()
    }

    /// Fails with `Interrupted` once draining has begun.
    pub fn check(&self) -> Result<()> {
        if self.is_draining() {
            return Err(ClusterError::Interrupted);
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early with `Interrupted` if draining begins.
    pub async fn nap(&self, duration: Duration) -> Result<()> {
        interruptible(&self.drain_signal, tokio::time::sleep(duration)).await
    }
}
