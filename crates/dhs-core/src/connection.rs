//! A named connection: one transport plus its read and write workers.
//!
//!   transport.receive -> factory.create -> inbound queue   (read worker)
//!   outbound queue -> Outbound::write -> transport.send    (write worker)
//!
//! The transport's own link worker owns the connection state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::message::{AsAny, Inbound, Outbound};
use crate::queue::BlockingQueue;
use crate::registry::MessageFactory;
use crate::transport::{Transport, TransportControl, TransportState};
use crate::worker::{Worker, WorkerLoop};

pub type InboundQueue = BlockingQueue<Arc<dyn Inbound>>;
pub type OutboundQueue<W> = BlockingQueue<Box<dyn Outbound<W>>>;

/// Protocol-erased view of a connection, as held by the connection table.
#[async_trait::async_trait]
pub trait ConnectionHandle: AsAny {
    fn name(&self) -> &str;
    fn url(&self) -> &str;
    fn control(&self) -> &Arc<TransportControl>;

    fn connect(&self) {
        self.control().connect();
    }

    fn disconnect(&self) {
        self.control().disconnect();
    }

    fn reconnect(&self) {
        self.control().reconnect();
    }

    fn state(&self) -> TransportState {
        self.control().state()
    }

    /// Cancel every worker of this connection. Non-blocking.
    fn shutdown(&self);

    /// Wait until every worker has exited.
    async fn wait(&self);
}

pub struct Connection<W> {
    name: String,
    url: String,
    control: Arc<TransportControl>,
    outbound: Arc<OutboundQueue<W>>,
    cancel: CancellationToken,
    blocking_timeout: Duration,
    workers: Mutex<Vec<Worker>>,
}

impl<W: Send + 'static> Connection<W> {
    /// Launch the link, read and write workers for `transport`.
    ///
    /// The transport stays disconnected until [`ConnectionHandle::connect`].
    #[allow(clippy::too_many_arguments)]
    pub fn start<T>(
        name: impl Into<String>,
        url: impl Into<String>,
        transport: Arc<T>,
        factory: MessageFactory<T::Raw>,
        inbound: Arc<InboundQueue>,
        outbound: Arc<OutboundQueue<W>>,
        blocking_timeout: Duration,
        parent: &CancellationToken,
    ) -> Arc<Self>
    where
        T: Transport<Wire = W>,
    {
        let name = name.into();
        let cancel = parent.child_token();
        let control = transport.control().clone();

        let link = transport.clone().start(&cancel);
        let reader = Worker::spawn(
            format!("{name} reader"),
            &cancel,
            ReadLoop {
                name: name.clone(),
                transport: transport.clone(),
                factory,
                inbound,
            },
        );
        let writer = Worker::spawn(
            format!("{name} writer"),
            &cancel,
            WriteLoop {
                name: name.clone(),
                transport,
                outbound: outbound.clone(),
                blocking_timeout,
            },
        );
        tracing::info!(connection = %name, "connection started");

        Arc::new(Self {
            name,
            url: url.into(),
            control,
            outbound,
            cancel,
            blocking_timeout,
            workers: Mutex::new(vec![link, reader, writer]),
        })
    }

    /// Queue `msg` for the write worker. Never blocks.
    pub fn send<M: Outbound<W>>(&self, msg: M) {
        self.send_boxed(Box::new(msg));
    }

    pub fn send_boxed(&self, msg: Box<dyn Outbound<W>>) {
        tracing::debug!(connection = %self.name, type_id = msg.message_type(), "queued outbound");
        self.outbound.enqueue(msg);
    }

    pub fn pending(&self) -> usize {
        self.outbound.len()
    }
}

#[async_trait::async_trait]
impl<W: Send + 'static> ConnectionHandle for Connection<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn control(&self) -> &Arc<TransportControl> {
        &self.control
    }

    fn shutdown(&self) {
        tracing::info!(connection = %self.name, "shutting down connection");
        self.cancel.cancel();
    }

    async fn wait(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            while !worker.join(self.blocking_timeout).await {
                tracing::warn!(connection = %self.name, worker = worker.name(), "still waiting for worker to exit");
            }
        }
        tracing::info!(connection = %self.name, "connection stopped");
    }
}

struct ReadLoop<T: Transport> {
    name: String,
    transport: Arc<T>,
    factory: MessageFactory<T::Raw>,
    inbound: Arc<InboundQueue>,
}

#[async_trait::async_trait]
impl<T: Transport> WorkerLoop for ReadLoop<T> {
    async fn step(&mut self) -> Result<(), TransportError> {
        let raw = match self.transport.receive().await {
            Ok(raw) => raw,
            Err(TransportError::ConnectionAborted(reason)) => {
                tracing::warn!(connection = %self.name, "connection lost: {reason}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if let Some(msg) = self.factory.create(&raw) {
            tracing::debug!(connection = %self.name, type_id = msg.message_type(), "received");
            self.inbound.enqueue(msg);
        }
        Ok(())
    }
}

struct WriteLoop<T: Transport> {
    name: String,
    transport: Arc<T>,
    outbound: Arc<OutboundQueue<T::Wire>>,
    blocking_timeout: Duration,
}

#[async_trait::async_trait]
impl<T: Transport> WorkerLoop for WriteLoop<T> {
    async fn step(&mut self) -> Result<(), TransportError> {
        if T::HOLD_WHILE_DISCONNECTED {
            let mut states = self.transport.control().subscribe_state();
            if *states.borrow_and_update() != TransportState::Connected {
                // Keep messages queued until the link is back.
                let _ = tokio::time::timeout(
                    self.blocking_timeout,
                    states.wait_for(|s| *s == TransportState::Connected),
                )
                .await;
                return Ok(());
            }
        }

        let msg = self.outbound.fetch(self.blocking_timeout).await?;
        let type_id = msg.message_type();
        match self.transport.send(msg.write()).await {
            Ok(()) => {
                tracing::debug!(connection = %self.name, type_id, "sent");
                Ok(())
            }
            Err(e @ (TransportError::NotConnected | TransportError::ConnectionAborted(_)))
                if T::HOLD_WHILE_DISCONNECTED =>
            {
                // The link dropped while this message was being fetched; hold it for the next one.
                tracing::debug!(connection = %self.name, type_id, "send failed, message held: {e}");
                self.outbound.requeue_front(msg);
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(connection = %self.name, type_id, "send failed, message dropped: {e}");
                Ok(())
            }
            Err(e @ (TransportError::Codec(_) | TransportError::FrameTooLarge { .. } | TransportError::Unsupported(_))) => {
                tracing::error!(connection = %self.name, type_id, "cannot send message, dropped: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
