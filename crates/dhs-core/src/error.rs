//! Error taxonomy shared by every crate in the workspace.

use crate::queue::QueueTimeout;

/// Errors surfaced by transports and the workers that drive them.
///
/// `Timeout` and `ConnectionAborted` are recoverable and absorbed by the
/// worker loops; every other variant is fatal to the worker that sees it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timed out waiting for data")]
    Timeout,
    #[error("connection aborted: {0}")]
    ConnectionAborted(String),
    #[error("not connected")]
    NotConnected,
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("codec error: {0}")]
    Codec(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Conditions a worker loop absorbs instead of exiting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout
                | TransportError::ConnectionAborted(_)
                | TransportError::NotConnected
        )
    }

    /// Classify an io error raised by a socket read or write.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => TransportError::ConnectionAborted(err.to_string()),
            _ => TransportError::Io(err),
        }
    }
}

impl From<QueueTimeout> for TransportError {
    fn from(_: QueueTimeout) -> Self {
        TransportError::Timeout
    }
}

/// Message registry construction errors, raised during bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("type id {type_id} already registered for protocol {protocol}")]
    DuplicateTypeId {
        protocol: String,
        type_id: &'static str,
    },
    #[error("empty type id registered for protocol {0}")]
    EmptyTypeId(String),
}

/// Errors from the process context: connection table and scheme registry.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("connection name already exists: {0}")]
    DuplicateConnection(String),
    #[error("no connection named {0}")]
    UnknownConnection(String),
    #[error("connection {0} does not carry this message protocol")]
    WrongProtocol(String),
    #[error("no connection scheme registered for {0}")]
    UnknownScheme(String),
    #[error("invalid connection url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("context is shut down")]
    ShutDown,
    #[error("cannot build transport: {0}")]
    Transport(#[from] TransportError),
}

/// Error type returned by application handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
