//! DHS core -- connections, transports, typed messages and dispatch.
//!
//! Data flow:
//!   Transport::receive -> raw frame -> MessageFactory -> inbound queue
//!   -> Dispatcher -> handler(message, context) -> Connection::send
//!   -> outbound queue -> write worker -> Transport::send -> wire.
//!
//! Every blocking point is bounded by `TransportConfig::blocking_timeout`
//! so cancellation is observed promptly.

pub mod config;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod message;
pub mod operations;
pub mod queue;
pub mod registry;
pub mod transport;
pub mod worker;

pub use config::TransportConfig;
pub use connection::{Connection, ConnectionHandle, InboundQueue, OutboundQueue};
pub use context::{ConnectionEnv, ConnectionFactory, ConnectionRegistry, ConnectionSpec, Context, Dhs, DhsBuilder};
pub use dispatcher::{DispatchHook, Dispatcher, HandlerRegistry};
pub use error::{ContextError, HandlerError, RegistryError, TransportError};
pub use message::{AsAny, Inbound, MessageKind, Outbound, Parse};
pub use operations::{ActiveOperation, ActiveOperations};
pub use queue::{BlockingQueue, EnqueueObserver, QueueTimeout};
pub use registry::{MessageFactory, MessageRegistry, TypeIdExtractor};
pub use transport::{Transport, TransportControl, TransportState};
pub use worker::{Worker, WorkerLoop};

/// Name of the dispatcher pipeline used when none is given.
pub const DEFAULT_DISPATCHER: &str = "default";
