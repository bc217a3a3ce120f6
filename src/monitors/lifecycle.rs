//! Worker lifecycle shared by the monitors.
//!
//! Each monitor owns at most one [`Worker`]. The worker receives a
//! [`StopSignal`] and is expected to check it at every natural suspension
//! point. Shutdown flips the signal and waits for the worker with a bound;
//! a worker that misses the bound is detached and left to exit on its own.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl MonitorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MonitorState::Running,
            2 => MonitorState::Stopping,
            3 => MonitorState::Stopped,
            _ => MonitorState::Idle,
        }
    }
}

/// Lifecycle state readable from both the owner and its worker.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(MonitorState::Idle as u8)))
    }

    pub fn get(&self) -> MonitorState {
        MonitorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: MonitorState) {
        self.0.store(state as u8, Ordering::Release);
    }

}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation handed to a worker.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once stop has been requested or the owner is gone.
    pub async fn stopped(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Stop signal whose sender is held by the caller. Used where a worker is
/// driven directly, outside a [`Worker`].
pub fn stop_channel() -> (watch::Sender<bool>, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, StopSignal(rx))
}

pub struct Worker {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn an async worker on the current runtime.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, signal) = stop_channel();
        let handle = tokio::spawn(body(signal));
        debug!(worker = name, "Worker spawned");
        Self { name, stop_tx, handle }
    }

    /// Spawn a worker that blocks a thread, such as a capture loop.
    pub fn spawn_blocking<F>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let (stop_tx, signal) = stop_channel();
        let handle = tokio::task::spawn_blocking(move || body(signal));
        debug!(worker = name, "Blocking worker spawned");
        Self { name, stop_tx, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request stop and wait up to `timeout`. Returns false if the worker
    /// was still running when the wait gave up.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let _ = self.stop_tx.send(true);

        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => {
                debug!(worker = self.name, "Worker exited");
                true
            }
            Ok(Err(e)) => {
                error!(worker = self.name, error = %e, "Worker terminated abnormally");
                true
            }
            Err(_) => {
                warn!(
                    worker = self.name,
                    timeout_secs = timeout.as_secs_f64(),
                    "Worker did not exit within timeout, detaching"
                );
                false
            }
        }
    }
}
