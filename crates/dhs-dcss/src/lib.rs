//! DCSS control protocol for hardware servers.
//!
//! Provides the v1/v2 frame codec, the message catalogue, start-operation
//! routing with active operation tracking, and the `dcss://host:port`
//! connection scheme.

pub mod codec;
pub mod messages;
pub mod operations;

use std::sync::Arc;

use dhs_core::transport::StreamTransport;
use dhs_core::{
    BlockingQueue, Connection, ConnectionEnv, ConnectionFactory, ConnectionHandle, ConnectionSpec, MessageFactory,
    MessageRegistry, OutboundQueue, RegistryError,
};

pub use codec::DcssCodec;
pub use operations::{CompletionObserver, OperationHandlers, OperationRouter};

/// Protocol name in the message registry and url scheme of DCSS connections.
pub const PROTOCOL: &str = "dcss";

/// A connection speaking DCSS.
pub type DcssConnection = Connection<String>;

/// Type id of a DCSS message: its first token.
#[allow(clippy::ptr_arg)]
pub fn type_id(raw: &String) -> Option<&str> {
    raw.split_whitespace().next()
}

/// Register every server-to-hardware message kind under [`PROTOCOL`].
pub fn register_messages(registry: &mut MessageRegistry<String>) -> Result<(), RegistryError> {
    use messages::*;

    registry.register::<StocSendClientType>(PROTOCOL)?;
    registry.register::<StohRegisterOperation>(PROTOCOL)?;
    registry.register::<StohRegisterRealMotor>(PROTOCOL)?;
    registry.register::<StohRegisterPseudoMotor>(PROTOCOL)?;
    registry.register::<StohRegisterString>(PROTOCOL)?;
    registry.register::<StohRegisterShutter>(PROTOCOL)?;
    registry.register::<StohRegisterIonChamber>(PROTOCOL)?;
    registry.register::<StohRegisterEncoder>(PROTOCOL)?;
    registry.register::<StohRegisterObject>(PROTOCOL)?;
    registry.register::<StohConfigureRealMotor>(PROTOCOL)?;
    registry.register::<StohConfigurePseudoMotor>(PROTOCOL)?;
    registry.register::<StohSetMotorPosition>(PROTOCOL)?;
    registry.register::<StohStartMotorMove>(PROTOCOL)?;
    registry.register::<StohAbortAll>(PROTOCOL)?;
    registry.register::<StohCorrectMotorPosition>(PROTOCOL)?;
    registry.register::<StohSetMotorDependency>(PROTOCOL)?;
    registry.register::<StohSetMotorChildren>(PROTOCOL)?;
    registry.register::<StohSetShutterState>(PROTOCOL)?;
    registry.register::<StohStartOperation>(PROTOCOL)?;
    Ok(())
}

/// Factory decoding DCSS text frames into the registered message kinds.
pub fn message_factory(registry: &MessageRegistry<String>) -> MessageFactory<String> {
    registry.factory(PROTOCOL, type_id)
}

/// Connection factory for `dcss://host:port` urls.
///
/// Each connection gets its own outbound queue that retires active
/// operations as their completions are queued.
pub fn scheme<P: Send + 'static>(factory: MessageFactory<String>) -> ConnectionFactory<P> {
    Arc::new(move |spec: ConnectionSpec, env: &ConnectionEnv<P>| {
        let addr = spec.socket_addr()?;
        let transport = Arc::new(StreamTransport::<DcssCodec, String>::new(
            &spec.name,
            addr,
            spec.config.clone(),
        ));
        let observer = Arc::new(CompletionObserver::new(env.operations.clone()));
        let outbound: Arc<OutboundQueue<String>> = Arc::new(BlockingQueue::with_observer(observer));
        let conn = Connection::start(
            spec.name.clone(),
            spec.url.to_string(),
            transport,
            factory.clone(),
            env.inbound.clone(),
            outbound,
            spec.config.blocking_timeout(),
            &env.cancel,
        );
        Ok(conn as Arc<dyn ConnectionHandle>)
    })
}
