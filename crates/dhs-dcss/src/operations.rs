//! Operation lifecycle on a DCSS connection.
//!
//! `stoh_start_operation` adds an entry to the active operation table and
//! then runs the handler registered for the operation name. Queueing the
//! matching `htos_operation_completed` removes the entry again, before the
//! bytes reach the wire.

use std::collections::HashMap;
use std::sync::Arc;

use dhs_core::{
    ActiveOperation, ActiveOperations, Context, DispatchHook, EnqueueObserver, HandlerError, Inbound, Outbound,
};

use crate::messages::{HtosOperationCompleted, StohStartOperation};

type OperationFn<S, P> =
    Arc<dyn Fn(&StohStartOperation, &Arc<ActiveOperation<P>>, &Context<S, P>) -> Result<(), HandlerError> + Send + Sync>;

/// Start-operation handlers keyed by operation name.
pub struct OperationHandlers<S, P> {
    handlers: HashMap<String, OperationFn<S, P>>,
}

impl<S, P> OperationHandlers<S, P>
where
    S: Send + Sync + 'static,
    P: Default + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `operation`. The handler receives the freshly
    /// added table entry, whose state starts as `P::default()`.
    pub fn register<F, E>(&mut self, operation: &str, handler: F) -> &mut Self
    where
        F: Fn(&StohStartOperation, &Arc<ActiveOperation<P>>, &Context<S, P>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<HandlerError>,
    {
        let erased: OperationFn<S, P> = Arc::new(move |msg, op, ctx| handler(msg, op, ctx).map_err(Into::into));
        if self.handlers.insert(operation.to_string(), erased).is_some() {
            tracing::debug!(operation, "start operation handler replaced");
        }
        self
    }

    pub fn is_registered(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn into_router(self) -> OperationRouter<S, P> {
        for name in self.names() {
            tracing::debug!(operation = name, "start operation handler registered");
        }
        OperationRouter {
            handlers: self.handlers,
        }
    }
}

impl<S, P> Default for OperationHandlers<S, P>
where
    S: Send + Sync + 'static,
    P: Default + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch hook that tracks and routes `stoh_start_operation`.
pub struct OperationRouter<S, P> {
    handlers: HashMap<String, OperationFn<S, P>>,
}

impl<S, P> DispatchHook<Context<S, P>> for OperationRouter<S, P>
where
    S: Send + Sync + 'static,
    P: Default + Send + 'static,
{
    fn on_message(&self, msg: &Arc<dyn Inbound>, ctx: &Context<S, P>) -> Result<(), HandlerError> {
        let Some(start) = msg.downcast_ref::<StohStartOperation>() else {
            return Ok(());
        };
        let Some(handler) = self.handlers.get(&start.operation_name) else {
            tracing::debug!(operation = %start.operation_name, "no start operation handler");
            return Ok(());
        };
        let op = ctx.operations().add(ActiveOperation::new(
            &start.operation_name,
            &start.operation_handle,
            msg.clone(),
            P::default(),
        ));
        handler(start, &op, ctx)
    }
}

/// Outbound queue observer removing an operation when its completion is queued.
pub struct CompletionObserver<P> {
    operations: Arc<ActiveOperations<P>>,
}

impl<P> CompletionObserver<P> {
    pub fn new(operations: Arc<ActiveOperations<P>>) -> Self {
        Self { operations }
    }
}

impl<P: Send + 'static> EnqueueObserver<Box<dyn Outbound<String>>> for CompletionObserver<P> {
    fn on_enqueue(&self, item: &Box<dyn Outbound<String>>) {
        if let Some(done) = item.downcast_ref::<HtosOperationCompleted>() {
            if self
                .operations
                .remove(&done.operation_name, &done.operation_handle)
                .is_none()
            {
                tracing::debug!(
                    operation = %done.operation_name,
                    handle = %done.operation_handle,
                    "completion for an operation that is not active"
                );
            }
        }
    }
}
