//! Abortable background workers.
//!
//! A worker repeatedly runs one bounded step until its cancellation token
//! fires, then runs cleanup exactly once. Steps must return within the
//! configured blocking timeout so abort is observed promptly.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// One unit of work, repeated until abort.
#[async_trait::async_trait]
pub trait WorkerLoop: Send + 'static {
    /// Run a single bounded iteration.
    ///
    /// `Timeout` and other recoverable errors are absorbed by the run loop.
    /// Any other error ends the worker.
    async fn step(&mut self) -> Result<(), TransportError>;

    /// Runs once after the loop ends, whatever the reason.
    async fn cleanup(&mut self) {}
}

/// Handle to a spawned worker task.
pub struct Worker {
    name: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on the runtime under a child of `parent`.
    pub fn spawn<L: WorkerLoop>(name: impl Into<String>, parent: &CancellationToken, body: L) -> Self {
        let name = name.into();
        let cancel = parent.child_token();
        let handle = tokio::spawn(run(name.clone(), cancel.clone(), body));
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request the loop to stop after its current step. Idempotent.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the task to finish. Returns false if `timeout` elapsed first.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                self.handle = None;
                true
            }
            Ok(Err(e)) => {
                tracing::error!(worker = %self.name, "worker task failed: {e}");
                self.handle = None;
                true
            }
            Err(_) => false,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<L: WorkerLoop>(name: String, cancel: CancellationToken, mut body: L) {
    tracing::debug!(worker = %name, "worker started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(worker = %name, "worker abort requested");
                break;
            }
            result = body.step() => match result {
                Ok(()) | Err(TransportError::Timeout) => {}
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(worker = %name, "recoverable worker error: {e}");
                }
                Err(e) => {
                    tracing::error!(worker = %name, "worker exiting on error: {e}");
                    break;
                }
            }
        }
    }
    body.cleanup().await;
    tracing::debug!(worker = %name, "worker stopped");
}
