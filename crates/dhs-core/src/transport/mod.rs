//! Transport state machine and the transport contract.
//!
//! Callers only ever set the *desired* state. A single link worker owns the
//! *current* state and drives it toward the desired one. Both live in
//! `watch` channels so a request made from any task is never missed.

pub mod link;
pub mod polling;
pub mod stream;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::worker::Worker;

pub use link::{LinkDriver, LinkWorker};
pub use polling::PollingTransport;
pub use stream::StreamTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Desired-state only: tear down, pause, then connect again.
    Reconnected,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Disconnected => "disconnected",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnecting => "disconnecting",
            TransportState::Reconnected => "reconnected",
        };
        f.write_str(s)
    }
}

/// Desired/current state pair shared between callers and the link worker.
pub struct TransportControl {
    name: String,
    desired: watch::Sender<TransportState>,
    state: watch::Sender<TransportState>,
}

impl TransportControl {
    pub fn new(name: impl Into<String>) -> Self {
        let (desired, _) = watch::channel(TransportState::Disconnected);
        let (state, _) = watch::channel(TransportState::Disconnected);
        Self {
            name: name.into(),
            desired,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the link worker to connect. Non-blocking.
    pub fn connect(&self) {
        self.request(TransportState::Connected);
    }

    /// Ask the link worker to disconnect. Non-blocking.
    pub fn disconnect(&self) {
        self.request(TransportState::Disconnected);
    }

    /// Ask for a full teardown and rebuild. Non-blocking.
    pub fn reconnect(&self) {
        self.request(TransportState::Reconnected);
    }

    fn request(&self, target: TransportState) {
        let changed = self.desired.send_if_modified(|d| {
            if *d == target {
                false
            } else {
                *d = target;
                true
            }
        });
        if changed {
            tracing::debug!(connection = %self.name, desired = %target, "transport state requested");
        }
    }

    pub fn desired(&self) -> TransportState {
        *self.desired.borrow()
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    pub fn subscribe_desired(&self) -> watch::Receiver<TransportState> {
        self.desired.subscribe()
    }

    /// Wait until the current state equals `target`. False on timeout.
    pub async fn wait_for_state(&self, target: TransportState, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Only the link worker calls this.
    pub(crate) fn set_state(&self, next: TransportState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::info!(connection = %self.name, from = %prev, to = %next, "transport state");
        }
    }

    /// Replace the desired state without treating it as a caller request.
    pub(crate) fn settle_desired(&self, from: TransportState, to: TransportState) -> bool {
        self.desired.send_if_modified(|d| {
            if *d == from {
                *d = to;
                true
            } else {
                false
            }
        })
    }
}

/// A connection-oriented or request/response channel to one peer.
///
/// `Raw` is what `receive` yields for the message factory; `Wire` is what an
/// outbound message writes for `send`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    type Raw: Send + 'static;
    type Wire: Send + 'static;

    /// Whether outbound messages wait in the queue while disconnected.
    /// When false, sends while disconnected fail fast and are logged.
    const HOLD_WHILE_DISCONNECTED: bool;

    fn control(&self) -> &Arc<TransportControl>;

    /// Spawn the link worker that owns the connection state.
    fn start(self: Arc<Self>, cancel: &CancellationToken) -> Worker;

    async fn send(&self, frame: Self::Wire) -> Result<(), TransportError>;

    /// Next raw inbound item. `Timeout` when nothing arrived within the
    /// blocking timeout.
    async fn receive(&self) -> Result<Self::Raw, TransportError>;
}
