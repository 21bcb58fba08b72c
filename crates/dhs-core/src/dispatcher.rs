//! Typed handler dispatch.
//!
//! Handlers are registered against a concrete message type; the string type
//! id is only used to find the handler for a decoded message. A dispatcher
//! pulls from the shared inbound queue and runs handlers one at a time, in
//! arrival order, on its own task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{HandlerError, TransportError};
use crate::message::{Inbound, MessageKind};
use crate::queue::BlockingQueue;
use crate::worker::{Worker, WorkerLoop};
use crate::DEFAULT_DISPATCHER;

type ErasedHandler<C> = Arc<dyn Fn(&Arc<dyn Inbound>, &C) -> Result<(), HandlerError> + Send + Sync>;

/// Handler table keyed by dispatcher name, then message type id.
pub struct HandlerRegistry<C> {
    pipelines: HashMap<String, HashMap<&'static str, ErasedHandler<C>>>,
}

impl<C: 'static> HandlerRegistry<C> {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
        }
    }

    /// Register `handler` for `M` on the default dispatcher.
    pub fn register<M, F, E>(&mut self, handler: F) -> &mut Self
    where
        M: Inbound + MessageKind,
        F: Fn(&M, &C) -> Result<(), E> + Send + Sync + 'static,
        E: Into<HandlerError>,
    {
        self.register_on(DEFAULT_DISPATCHER, handler)
    }

    /// Register on a named dispatcher. Re-registering a type id replaces
    /// the earlier handler.
    pub fn register_on<M, F, E>(&mut self, dispatcher: &str, handler: F) -> &mut Self
    where
        M: Inbound + MessageKind,
        F: Fn(&M, &C) -> Result<(), E> + Send + Sync + 'static,
        E: Into<HandlerError>,
    {
        let erased: ErasedHandler<C> = Arc::new(move |msg: &Arc<dyn Inbound>, ctx: &C| {
            match msg.downcast_ref::<M>() {
                Some(m) => handler(m, ctx).map_err(Into::into),
                None => Ok(()),
            }
        });
        self.pipelines
            .entry(dispatcher.to_string())
            .or_default()
            .insert(M::TYPE_ID, erased);
        self
    }

    fn take(&mut self, dispatcher: &str) -> HashMap<&'static str, ErasedHandler<C>> {
        self.pipelines.remove(dispatcher).unwrap_or_default()
    }

    pub fn is_registered(&self, dispatcher: &str, type_id: &str) -> bool {
        self.pipelines
            .get(dispatcher)
            .is_some_and(|h| h.contains_key(type_id))
    }
}

impl<C: 'static> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Protocol-specific step run for every message after the type handler.
pub trait DispatchHook<C>: Send + Sync {
    fn on_message(&self, msg: &Arc<dyn Inbound>, ctx: &C) -> Result<(), HandlerError>;
}

pub struct Dispatcher<C> {
    name: String,
    handlers: HashMap<&'static str, ErasedHandler<C>>,
    hooks: Vec<Arc<dyn DispatchHook<C>>>,
    inbound: Arc<BlockingQueue<Arc<dyn Inbound>>>,
    blocking_timeout: Duration,
    ctx: C,
}

impl<C: Send + Sync + 'static> Dispatcher<C> {
    /// Take the handlers registered for `name` out of `registry`.
    pub fn new(
        name: &str,
        registry: &mut HandlerRegistry<C>,
        inbound: Arc<BlockingQueue<Arc<dyn Inbound>>>,
        ctx: C,
    ) -> Self {
        Self {
            name: name.to_string(),
            handlers: registry.take(name),
            hooks: Vec::new(),
            inbound,
            blocking_timeout: Duration::from_secs(5),
            ctx,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn DispatchHook<C>>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    /// Route one message. Handler errors are logged, never propagated.
    pub fn dispatch(&self, msg: &Arc<dyn Inbound>) {
        let type_id = msg.message_type();
        match self.handlers.get(type_id) {
            Some(handler) => {
                tracing::debug!(dispatcher = %self.name, type_id, "dispatching");
                if let Err(e) = handler(msg, &self.ctx) {
                    tracing::error!(dispatcher = %self.name, type_id, message = ?msg, "handler failed: {e}");
                }
            }
            None => tracing::debug!(dispatcher = %self.name, type_id, "no handler registered"),
        }
        for hook in &self.hooks {
            if let Err(e) = hook.on_message(msg, &self.ctx) {
                tracing::error!(dispatcher = %self.name, type_id, message = ?msg, "handler failed: {e}");
            }
        }
    }

    pub fn spawn(self, parent: &CancellationToken) -> Worker {
        let name = format!("{} dispatcher", self.name);
        Worker::spawn(name, parent, self)
    }
}

#[async_trait::async_trait]
impl<C: Send + Sync + 'static> WorkerLoop for Dispatcher<C> {
    async fn step(&mut self) -> Result<(), TransportError> {
        let msg = self.inbound.fetch(self.blocking_timeout).await?;
        self.dispatch(&msg);
        Ok(())
    }

    async fn cleanup(&mut self) {
        tracing::info!(dispatcher = %self.name, "shutdown signal received, dispatcher stopped");
    }
}
