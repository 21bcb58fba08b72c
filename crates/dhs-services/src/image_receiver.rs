//! Embedded HTTP server receiving images pushed by a video server.
//!
//! `connect` binds the connection url's address and starts serving;
//! `disconnect` stops the server. Every request is answered 200. Posts with
//! an image content type become [`ImagePostRequest`] messages; anything
//! else is queued without a type id and dropped by the factory.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use dhs_core::http::ServerRequest;
use dhs_core::transport::{LinkDriver, LinkWorker};
use dhs_core::{
    BlockingQueue, Connection, ConnectionEnv, ConnectionFactory, ConnectionHandle, ConnectionSpec, Inbound,
    MessageFactory, MessageKind, MessageRegistry, OutboundQueue, Parse, RegistryError, Transport, TransportConfig,
    TransportControl, TransportError, Worker,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const PROTOCOL: &str = "jpeg_receiver";

const IMAGE_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The receiver never sends; no value of this type exists.
#[derive(Debug)]
pub enum NoReply {}

pub type ImageReceiverConnection = Connection<NoReply>;

/// One posted image.
#[derive(Debug, Clone)]
pub struct ImagePostRequest {
    pub path: String,
    pub content_type: String,
    pub image: Bytes,
}

impl MessageKind for ImagePostRequest {
    const TYPE_ID: &'static str = "jpeg_receiver_image_post_request";
}

impl Inbound for ImagePostRequest {
    fn message_type(&self) -> &'static str {
        Self::TYPE_ID
    }
}

impl Parse<ServerRequest> for ImagePostRequest {
    fn parse(raw: &ServerRequest) -> Option<Self> {
        Some(Self {
            path: raw.path.clone(),
            content_type: raw.content_type.clone()?,
            image: raw.body.clone(),
        })
    }
}

fn is_image(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    IMAGE_CONTENT_TYPES
        .iter()
        .any(|t| essence.eq_ignore_ascii_case(t))
}

/// Tag a received request with the type id of the message it carries.
fn classify(method: &Method, content_type: Option<&str>) -> Option<&'static str> {
    (*method == Method::POST && content_type.is_some_and(is_image)).then_some(ImagePostRequest::TYPE_ID)
}

type Requests = Arc<BlockingQueue<ServerRequest>>;

async fn receive(
    State(requests): State<Requests>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let type_id = classify(&method, content_type.as_deref());
    tracing::debug!(%method, path = %uri.path(), bytes = body.len(), type_id, "request received");
    requests.enqueue(ServerRequest {
        type_id,
        method: method.to_string(),
        path: uri.path().to_string(),
        content_type,
        body,
    });
    StatusCode::OK
}

pub struct ImageReceiverTransport {
    control: Arc<TransportControl>,
    addr: String,
    config: TransportConfig,
    requests: Requests,
    bound: Arc<Mutex<Option<SocketAddr>>>,
}

impl ImageReceiverTransport {
    /// `addr` is the `host:port` to listen on.
    pub fn new(name: impl Into<String>, addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            control: Arc::new(TransportControl::new(name)),
            addr: addr.into(),
            config,
            requests: Arc::new(BlockingQueue::new()),
            bound: Arc::new(Mutex::new(None)),
        }
    }

    /// Address the server is listening on while connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Server {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct ServeDriver {
    name: String,
    addr: String,
    requests: Requests,
    bound: Arc<Mutex<Option<SocketAddr>>>,
    server: Option<Server>,
}

impl ServeDriver {
    fn set_bound(&self, addr: Option<SocketAddr>) {
        *self.bound.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = addr;
    }
}

#[async_trait::async_trait]
impl LinkDriver for ServeDriver {
    async fn open(&mut self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.addr).await.map_err(TransportError::from_io)?;
        let local = listener.local_addr()?;
        let app = Router::new().fallback(receive).with_state(self.requests.clone());
        let stop = CancellationToken::new();
        let signal = stop.clone().cancelled_owned();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
                tracing::error!(connection = %name, "image receiver stopped: {e}");
            }
        });
        tracing::info!(connection = %self.name, addr = %local, "image receiver listening");
        self.set_bound(Some(local));
        self.server = Some(Server { stop, task });
        Ok(())
    }

    async fn close(&mut self) {
        let Some(Server { stop, mut task }) = self.server.take() else {
            return;
        };
        stop.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            tracing::warn!(connection = %self.name, "image receiver did not stop in time, aborting");
            task.abort();
        }
        self.set_bound(None);
        tracing::info!(connection = %self.name, "image receiver stopped");
    }
}

#[async_trait::async_trait]
impl Transport for ImageReceiverTransport {
    type Raw = ServerRequest;
    type Wire = NoReply;

    const HOLD_WHILE_DISCONNECTED: bool = false;

    fn control(&self) -> &Arc<TransportControl> {
        &self.control
    }

    fn start(self: Arc<Self>, cancel: &CancellationToken) -> Worker {
        let driver = ServeDriver {
            name: self.control.name().to_string(),
            addr: self.addr.clone(),
            requests: self.requests.clone(),
            bound: self.bound.clone(),
            server: None,
        };
        Worker::spawn(
            format!("{} link", self.control.name()),
            cancel,
            LinkWorker::new(self.control.clone(), self.config.clone(), driver),
        )
    }

    async fn send(&self, msg: NoReply) -> Result<(), TransportError> {
        match msg {}
    }

    async fn receive(&self) -> Result<ServerRequest, TransportError> {
        Ok(self.requests.fetch(self.config.blocking_timeout()).await?)
    }
}

pub fn register_messages(registry: &mut MessageRegistry<ServerRequest>) -> Result<(), RegistryError> {
    registry.register::<ImagePostRequest>(PROTOCOL)
}

pub fn message_factory(registry: &MessageRegistry<ServerRequest>) -> MessageFactory<ServerRequest> {
    registry.factory(PROTOCOL, ServerRequest::type_id)
}

/// Connection factory for the image receiver; listens on the url's host and port.
pub fn scheme<P: Send + 'static>(registry: &MessageRegistry<ServerRequest>) -> ConnectionFactory<P> {
    let factory = message_factory(registry);
    Arc::new(move |spec: ConnectionSpec, env: &ConnectionEnv<P>| {
        let transport = Arc::new(ImageReceiverTransport::new(
            &spec.name,
            spec.socket_addr()?,
            spec.config.clone(),
        ));
        let outbound: Arc<OutboundQueue<NoReply>> = Arc::new(BlockingQueue::new());
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
