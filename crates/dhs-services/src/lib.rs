//! HTTP service adapters.
//!
//! `automl` and `axis` are client connections over the polling transport:
//! each outbound request is one HTTP exchange and its response comes back
//! through the inbound queue. `image_receiver` is an embedded HTTP server
//! turning posted images into inbound messages.

pub mod automl;
pub mod axis;
pub mod image_receiver;

use std::sync::Arc;

use dhs_core::http::{HttpRequest, HttpResponse};
use dhs_core::transport::PollingTransport;
use dhs_core::{
    BlockingQueue, Connection, ConnectionEnv, ConnectionFactory, ConnectionHandle, ConnectionSpec, MessageFactory,
    OutboundQueue,
};

/// A connection to an HTTP service.
pub type HttpConnection = Connection<HttpRequest>;

/// Connection factory for HTTP services reached at the connection url.
pub fn http_scheme<P: Send + 'static>(factory: MessageFactory<HttpResponse>) -> ConnectionFactory<P> {
    Arc::new(move |spec: ConnectionSpec, env: &ConnectionEnv<P>| {
        let transport = Arc::new(PollingTransport::new(
            &spec.name,
            spec.url.clone(),
            spec.config.clone(),
        )?);
        let outbound: Arc<OutboundQueue<HttpRequest>> = Arc::new(BlockingQueue::new());
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
