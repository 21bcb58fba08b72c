//! TCP stream transport with a pluggable frame codec.
//!
//! A fresh codec is built for every socket and cloned into the read and
//! write halves, so per-connection codec state (such as a negotiated frame
//! version) is shared between both directions and reset on reconnect.

use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::transport::link::{LinkDriver, LinkWorker};
use crate::transport::{Transport, TransportControl};
use crate::worker::Worker;

struct Halves<C> {
    reader: Mutex<Option<FramedRead<OwnedReadHalf, C>>>,
    writer: Mutex<Option<FramedWrite<OwnedWriteHalf, C>>>,
}

impl<C> Halves<C> {
    async fn clear(&self) {
        self.reader.lock().await.take();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.get_mut().shutdown().await;
        }
    }
}

/// Stream transport sending frames of type `W`.
pub struct StreamTransport<C, W> {
    control: Arc<TransportControl>,
    addr: String,
    config: TransportConfig,
    halves: Arc<Halves<C>>,
    _wire: PhantomData<fn(W)>,
}

impl<C, W> StreamTransport<C, W>
where
    C: Decoder<Error = TransportError> + Encoder<W, Error = TransportError>,
    C: Clone + Default + Send + Sync + 'static,
    C::Item: Send + 'static,
    W: Send + 'static,
{
    /// `addr` is a `host:port` pair.
    pub fn new(name: impl Into<String>, addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            control: Arc::new(TransportControl::new(name)),
            addr: addr.into(),
            config,
            halves: Arc::new(Halves {
                reader: Mutex::new(None),
                writer: Mutex::new(None),
            }),
            _wire: PhantomData,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn abort_link(&self, reason: &str) -> TransportError {
        tracing::warn!(connection = %self.control.name(), "{reason}, requesting reconnect");
        self.control.reconnect();
        TransportError::ConnectionAborted(reason.to_string())
    }
}

struct StreamDriver<C> {
    name: String,
    addr: String,
    halves: Arc<Halves<C>>,
}

#[async_trait::async_trait]
impl<C> LinkDriver for StreamDriver<C>
where
    C: Decoder + Clone + Default + Send + Sync + 'static,
{
    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.addr).await.map_err(TransportError::from_io)?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        let codec = C::default();
        *self.halves.writer.lock().await = Some(FramedWrite::new(write, codec.clone()));
        *self.halves.reader.lock().await = Some(FramedRead::new(read, codec));
        tracing::debug!(connection = %self.name, addr = %self.addr, "socket connected");
        Ok(())
    }

    async fn close(&mut self) {
        self.halves.clear().await;
    }
}

#[async_trait::async_trait]
impl<C, W> Transport for StreamTransport<C, W>
where
    C: Decoder<Error = TransportError> + Encoder<W, Error = TransportError>,
    C: Clone + Default + Send + Sync + 'static,
    C::Item: Send + 'static,
    W: Send + 'static,
{
    type Raw = C::Item;
    type Wire = W;

    const HOLD_WHILE_DISCONNECTED: bool = true;

    fn control(&self) -> &Arc<TransportControl> {
        &self.control
    }

    fn start(self: Arc<Self>, cancel: &CancellationToken) -> Worker {
        let driver = StreamDriver::<C> {
            name: self.control.name().to_string(),
            addr: self.addr.clone(),
            halves: self.halves.clone(),
        };
        Worker::spawn(
            format!("{} link", self.control.name()),
            cancel,
            LinkWorker::new(self.control.clone(), self.config.clone(), driver),
        )
    }

    async fn send(&self, frame: W) -> Result<(), TransportError> {
        let mut guard = self.halves.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        match tokio::time::timeout(self.config.blocking_timeout(), writer.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(TransportError::Io(e))) => match TransportError::from_io(e) {
                TransportError::ConnectionAborted(reason) => {
                    guard.take();
                    Err(self.abort_link(&format!("write failed: {reason}")))
                }
                other => Err(other),
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn receive(&self) -> Result<C::Item, TransportError> {
        let timeout = self.config.blocking_timeout();
        let mut guard = self.halves.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            drop(guard);
            // Nothing to read until the link worker opens a socket.
            let mut states = self.control.subscribe_state();
            let _ = tokio::time::timeout(timeout, states.changed()).await;
            return Err(TransportError::Timeout);
        };

        match tokio::time::timeout(timeout, reader.next()).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Some(Ok(frame))) => Ok(frame),
            Ok(Some(Err(TransportError::Io(e)))) => match TransportError::from_io(e) {
                TransportError::ConnectionAborted(reason) => {
                    guard.take();
                    Err(self.abort_link(&format!("read failed: {reason}")))
                }
                other => Err(other),
            },
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => {
                guard.take();
                Err(self.abort_link("peer closed the connection"))
            }
        }
    }
}
