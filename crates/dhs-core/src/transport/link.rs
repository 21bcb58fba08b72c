//! The link worker: one task per transport that reconciles the current
//! state with the desired state.
//!
//! Transport-specific work (opening a socket, probing a health url) lives
//! behind [`LinkDriver`]; the retry, give-up, reconnect and heartbeat
//! policy lives here and is shared by every transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::transport::{TransportControl, TransportState};
use crate::worker::WorkerLoop;

/// Transport-specific connect/disconnect/probe primitives.
#[async_trait::async_trait]
pub trait LinkDriver: Send + 'static {
    /// One connection attempt. Any error is retried after the retry delay.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Release the link. Must be idempotent.
    async fn close(&mut self);

    /// Liveness probing interval while connected, if the link needs one.
    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct LinkWorker<D> {
    control: Arc<TransportControl>,
    desired: watch::Receiver<TransportState>,
    config: TransportConfig,
    driver: D,
    next_heartbeat: Option<Instant>,
}

impl<D: LinkDriver> LinkWorker<D> {
    pub fn new(control: Arc<TransportControl>, config: TransportConfig, driver: D) -> Self {
        let desired = control.subscribe_desired();
        Self {
            control,
            desired,
            config,
            driver,
            next_heartbeat: None,
        }
    }

    fn name(&self) -> &str {
        self.control.name()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.control.set_state(TransportState::Connecting);
        let deadline = self.config.connect_timeout().map(|t| Instant::now() + t);

        loop {
            // No single attempt may outlive the connect deadline.
            let attempt_timeout = match deadline {
                Some(d) => self
                    .config
                    .blocking_timeout()
                    .min(d.saturating_duration_since(Instant::now())),
                None => self.config.blocking_timeout(),
            };
            let attempt = tokio::time::timeout(attempt_timeout, self.driver.open()).await;
            match attempt {
                Ok(Ok(())) => {
                    self.control.set_state(TransportState::Connected);
                    self.schedule_heartbeat();
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::info!(
                        connection = %self.name(),
                        retry_ms = self.config.connect_retry_delay_ms,
                        "connect failed: {e}"
                    );
                }
                Err(_) => {
                    tracing::info!(
                        connection = %self.name(),
                        retry_ms = self.config.connect_retry_delay_ms,
                        "connect attempt timed out"
                    );
                }
            }

            let mut pause = self.config.connect_retry_delay();
            if let Some(deadline) = deadline {
                pause = pause.min(deadline.saturating_duration_since(Instant::now()));
            }
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.desired.changed() => {}
            }

            if *self.desired.borrow() != TransportState::Connected {
                tracing::debug!(connection = %self.name(), "connect abandoned, desired state changed");
                self.control.set_state(TransportState::Disconnected);
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    connection = %self.name(),
                    timeout_ms = self.config.connect_timeout_ms,
                    "connect timeout exceeded, giving up"
                );
                self.control.set_state(TransportState::Disconnected);
                self.control
                    .settle_desired(TransportState::Connected, TransportState::Disconnected);
                return Ok(());
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.control.state() == TransportState::Disconnected {
            tracing::info!(connection = %self.name(), "not connected, ignoring disconnect request");
            return;
        }
        self.control.set_state(TransportState::Disconnecting);
        self.driver.close().await;
        self.next_heartbeat = None;
        self.control.set_state(TransportState::Disconnected);
    }

    async fn reconnect(&mut self) {
        tracing::info!(connection = %self.name(), "reconnecting");
        // Close unconditionally: a reader may already have marked the link dead.
        if self.control.state() != TransportState::Disconnected {
            self.control.set_state(TransportState::Disconnecting);
        }
        self.driver.close().await;
        self.next_heartbeat = None;
        self.control.set_state(TransportState::Disconnected);

        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            _ = self.desired.changed() => {}
        }
        // A disconnect requested meanwhile wins over the reconnect.
        self.control
            .settle_desired(TransportState::Reconnected, TransportState::Connected);
    }

    fn schedule_heartbeat(&mut self) {
        self.next_heartbeat = self.driver.heartbeat_interval().map(|d| Instant::now() + d);
    }

    async fn idle(&mut self) {
        let mut wait = self.config.blocking_timeout();
        if let Some(at) = self.next_heartbeat {
            wait = wait.min(at.saturating_duration_since(Instant::now()));
        }
        tokio::select! {
            _ = self.desired.changed() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let due = self.next_heartbeat.is_some_and(|at| Instant::now() >= at);
        if due && self.control.state() == TransportState::Connected {
            self.schedule_heartbeat();
            tracing::debug!(connection = %self.name(), "sending heartbeat");
            let probe = tokio::time::timeout(self.config.blocking_timeout(), self.driver.probe()).await;
            let failure = match probe {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("probe timed out".to_string()),
            };
            if let Some(reason) = failure {
                tracing::warn!(connection = %self.name(), "heartbeat failed: {reason}");
                self.driver.close().await;
                self.next_heartbeat = None;
                self.control.set_state(TransportState::Disconnected);
            }
        }
    }
}

#[async_trait::async_trait]
impl<D: LinkDriver> WorkerLoop for LinkWorker<D> {
    async fn step(&mut self) -> Result<(), TransportError> {
        let desired = *self.desired.borrow_and_update();
        let state = self.control.state();
        match (desired, state) {
            (TransportState::Reconnected, _) => self.reconnect().await,
            (TransportState::Connected, TransportState::Connected) => self.idle().await,
            (TransportState::Connected, _) => self.connect().await?,
            (TransportState::Disconnected, TransportState::Disconnected) => self.idle().await,
            (TransportState::Disconnected, _) => self.disconnect().await,
            (other, _) => {
                tracing::debug!(connection = %self.name(), desired = %other, "ignoring transitional desired state");
                self.idle().await
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.driver.close().await;
        self.control.set_state(TransportState::Disconnected);
        tracing::info!(connection = %self.name(), "shutdown signal received, transport closed");
    }
}
