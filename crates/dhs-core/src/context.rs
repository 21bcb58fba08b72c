//! Process context and bootstrap.
//!
//! The context owns everything shared between components: the connection
//! table, the connection scheme registry, the active operation table and the
//! application state `S`. Operations carry typed per-operation state `P`.
//!
//! Startup is explicit: a [`DhsBuilder`] collects connection schemes,
//! handlers and dispatch hooks, then [`DhsBuilder::start`] spawns the
//! dispatcher. Nothing is registered as a side effect of module loading.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Url;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionHandle, InboundQueue};
use crate::dispatcher::{DispatchHook, Dispatcher, HandlerRegistry};
use crate::error::ContextError;
use crate::message::Outbound;
use crate::operations::{ActiveOperation, ActiveOperations};
use crate::queue::BlockingQueue;
use crate::worker::Worker;
use crate::DEFAULT_DISPATCHER;

/// What a scheme factory needs to know about the connection to build.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub name: String,
    pub url: Url,
    pub config: TransportConfig,
}

impl ConnectionSpec {
    /// `host:port` of the url, for stream transports.
    pub fn socket_addr(&self) -> Result<String, ContextError> {
        let host = self.url.host_str().ok_or_else(|| ContextError::InvalidUrl {
            url: self.url.to_string(),
            reason: "missing host".into(),
        })?;
        let port = self.url.port_or_known_default().ok_or_else(|| ContextError::InvalidUrl {
            url: self.url.to_string(),
            reason: "missing port".into(),
        })?;
        Ok(format!("{host}:{port}"))
    }
}

/// Shared plumbing handed to scheme factories.
pub struct ConnectionEnv<P> {
    pub inbound: Arc<InboundQueue>,
    pub operations: Arc<ActiveOperations<P>>,
    pub cancel: CancellationToken,
}

pub type ConnectionFactory<P> =
    Arc<dyn Fn(ConnectionSpec, &ConnectionEnv<P>) -> Result<Arc<dyn ConnectionHandle>, ContextError> + Send + Sync>;

/// Url scheme -> connection factory.
pub struct ConnectionRegistry<P> {
    schemes: HashMap<String, ConnectionFactory<P>>,
}

impl<P> ConnectionRegistry<P> {
    pub fn new() -> Self {
        Self {
            schemes: HashMap::new(),
        }
    }

    pub fn register(&mut self, scheme: &str, factory: ConnectionFactory<P>) {
        if self.schemes.insert(scheme.to_string(), factory).is_some() {
            tracing::warn!(scheme, "connection scheme registered twice, replacing");
        }
    }

    pub fn get(&self, scheme: &str) -> Option<&ConnectionFactory<P>> {
        self.schemes.get(scheme)
    }
}

impl<P> Default for ConnectionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner<S, P> {
    name: String,
    connections: RwLock<HashMap<String, Arc<dyn ConnectionHandle>>>,
    schemes: ConnectionRegistry<P>,
    operations: Arc<ActiveOperations<P>>,
    inbound: Arc<InboundQueue>,
    cancel: CancellationToken,
    state: S,
}

/// Cheaply cloneable handle to the process context.
pub struct Context<S, P> {
    inner: Arc<Inner<S, P>>,
}

impl<S, P> Clone for Context<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, P> Context<S, P>
where
    S: Send + Sync + 'static,
    P: Send + 'static,
{
    pub fn new(name: impl Into<String>, state: S, schemes: ConnectionRegistry<P>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                connections: RwLock::new(HashMap::new()),
                schemes,
                operations: Arc::new(ActiveOperations::new()),
                inbound: Arc::new(BlockingQueue::new()),
                cancel: CancellationToken::new(),
                state,
            }),
        }
    }

    /// The name this DHS announces itself with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> &S {
        &self.inner.state
    }

    pub fn inbound(&self) -> &Arc<InboundQueue> {
        &self.inner.inbound
    }

    pub fn operations(&self) -> &Arc<ActiveOperations<P>> {
        &self.inner.operations
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Build and start a connection to `url` using the factory registered
    /// for `scheme`. The transport starts disconnected.
    pub fn create_connection(
        &self,
        name: &str,
        scheme: &str,
        url: &str,
        config: TransportConfig,
    ) -> Result<Arc<dyn ConnectionHandle>, ContextError> {
        if self.inner.cancel.is_cancelled() {
            return Err(ContextError::ShutDown);
        }
        let factory = self
            .inner
            .schemes
            .get(scheme)
            .ok_or_else(|| ContextError::UnknownScheme(scheme.to_string()))?
            .clone();
        let parsed = Url::parse(url).map_err(|e| ContextError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut table = self
            .inner
            .connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if table.contains_key(name) {
            return Err(ContextError::DuplicateConnection(name.to_string()));
        }
        let env = ConnectionEnv {
            inbound: self.inner.inbound.clone(),
            operations: self.inner.operations.clone(),
            cancel: self.inner.cancel.clone(),
        };
        let spec = ConnectionSpec {
            name: name.to_string(),
            url: parsed,
            config,
        };
        let conn = factory(spec, &env)?;
        tracing::info!(connection = name, scheme, url, "connection created");
        table.insert(name.to_string(), conn.clone());
        Ok(conn)
    }

    pub fn handle(&self, name: &str) -> Result<Arc<dyn ConnectionHandle>, ContextError> {
        self.inner
            .connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| ContextError::UnknownConnection(name.to_string()))
    }

    /// Typed lookup of a connection carrying wire type `W`.
    pub fn connection<W: Send + 'static>(&self, name: &str) -> Result<Arc<Connection<W>>, ContextError> {
        self.handle(name)?
            .as_any_arc()
            .downcast::<Connection<W>>()
            .map_err(|_| ContextError::WrongProtocol(name.to_string()))
    }

    /// Queue `msg` on the named connection.
    pub fn send<W, M>(&self, name: &str, msg: M) -> Result<(), ContextError>
    where
        W: Send + 'static,
        M: Outbound<W>,
    {
        self.connection::<W>(name)?.send(msg);
        Ok(())
    }

    pub fn active_operations(&self, name: Option<&str>, handle: Option<&str>) -> Vec<Arc<ActiveOperation<P>>> {
        self.inner.operations.get(name, handle)
    }

    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inner
            .connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Cancel every connection and the dispatcher. Non-blocking.
    pub fn shutdown(&self) {
        tracing::info!(dhs = %self.inner.name, "shutdown requested");
        for conn in self.snapshot() {
            conn.shutdown();
        }
        self.inner.cancel.cancel();
    }

    /// Wait for every connection's workers to exit.
    pub async fn wait(&self) {
        for conn in self.snapshot() {
            conn.wait().await;
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ConnectionHandle>> {
        self.inner
            .connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

/// Collects everything the process needs before it starts serving.
pub struct DhsBuilder<S, P> {
    name: String,
    state: S,
    schemes: ConnectionRegistry<P>,
    handlers: HandlerRegistry<Context<S, P>>,
    hooks: Vec<Arc<dyn DispatchHook<Context<S, P>>>>,
    blocking_timeout: Duration,
}

impl<S, P> DhsBuilder<S, P>
where
    S: Send + Sync + 'static,
    P: Send + 'static,
{
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state,
            schemes: ConnectionRegistry::new(),
            handlers: HandlerRegistry::new(),
            hooks: Vec::new(),
            blocking_timeout: TransportConfig::default().blocking_timeout(),
        }
    }

    pub fn connection_scheme(mut self, scheme: &str, factory: ConnectionFactory<P>) -> Self {
        self.schemes.register(scheme, factory);
        self
    }

    pub fn handlers(mut self, register: impl FnOnce(&mut HandlerRegistry<Context<S, P>>)) -> Self {
        register(&mut self.handlers);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn DispatchHook<Context<S, P>>>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    /// Create the context and spawn the default dispatcher.
    pub fn start(mut self) -> Dhs<S, P> {
        let ctx = Context::new(self.name, self.state, self.schemes);
        let mut dispatcher = Dispatcher::new(
            DEFAULT_DISPATCHER,
            &mut self.handlers,
            ctx.inbound().clone(),
            ctx.clone(),
        )
        .with_blocking_timeout(self.blocking_timeout);
        for hook in self.hooks {
            dispatcher = dispatcher.with_hook(hook);
        }
        let worker = dispatcher.spawn(ctx.cancel_token());
        tracing::info!(dhs = %ctx.name(), "dhs started");
        Dhs {
            context: ctx,
            dispatcher: Mutex::new(Some(worker)),
            blocking_timeout: self.blocking_timeout,
        }
    }
}

/// A running DHS process.
pub struct Dhs<S, P> {
    context: Context<S, P>,
    dispatcher: Mutex<Option<Worker>>,
    blocking_timeout: Duration,
}

impl<S, P> Dhs<S, P>
where
    S: Send + Sync + 'static,
    P: Send + 'static,
{
    pub fn context(&self) -> &Context<S, P> {
        &self.context
    }

    pub fn shutdown(&self) {
        self.context.shutdown();
    }

    /// Wait for the dispatcher and every connection to stop.
    pub async fn wait(&self) {
        if let Some(mut worker) = self.dispatcher.lock().await.take() {
            while !worker.join(self.blocking_timeout).await {
                tracing::warn!("still waiting for dispatcher to exit");
            }
        }
        self.context.wait().await;
        tracing::info!(dhs = %self.context.name(), "dhs stopped");
    }
}
