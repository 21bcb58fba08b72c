//! Active operation table.
//!
//! An operation is started by one inbound message and completed later by an
//! outbound one, possibly overlapping with other operations of the same
//! name. Entries are keyed by `(name, handle)`.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::message::Inbound;

/// One outstanding operation with its typed per-operation state `P`.
pub struct ActiveOperation<P> {
    name: String,
    handle: String,
    trigger: Arc<dyn Inbound>,
    state: Mutex<P>,
}

impl<P> ActiveOperation<P> {
    pub fn new(name: impl Into<String>, handle: impl Into<String>, trigger: Arc<dyn Inbound>, state: P) -> Self {
        Self {
            name: name.into(),
            handle: handle.into(),
            trigger,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// The message that started this operation.
    pub fn trigger(&self) -> &Arc<dyn Inbound> {
        &self.trigger
    }

    pub fn trigger_as<M: Inbound>(&self) -> Option<&M> {
        self.trigger.downcast_ref::<M>()
    }

    pub fn state(&self) -> MutexGuard<'_, P> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn matches(&self, name: Option<&str>, handle: Option<&str>) -> bool {
        name.is_none_or(|n| n == self.name) && handle.is_none_or(|h| h == self.handle)
    }
}

impl<P> std::fmt::Debug for ActiveOperation<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveOperation")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

pub struct ActiveOperations<P> {
    ops: Mutex<Vec<Arc<ActiveOperation<P>>>>,
}

impl<P> ActiveOperations<P> {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ActiveOperation<P>>>> {
        self.ops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert an operation. A colliding `(name, handle)` replaces the
    /// existing entry in place.
    pub fn add(&self, op: ActiveOperation<P>) -> Arc<ActiveOperation<P>> {
        let op = Arc::new(op);
        let mut ops = self.lock();
        match ops.iter_mut().find(|o| o.name == op.name && o.handle == op.handle) {
            Some(slot) => {
                tracing::warn!(
                    operation = %op.name,
                    handle = %op.handle,
                    "active operation already exists, replacing"
                );
                *slot = op.clone();
            }
            None => {
                tracing::debug!(operation = %op.name, handle = %op.handle, "operation started");
                ops.push(op.clone());
            }
        }
        op
    }

    /// All operations matching both filters. `None` matches anything.
    pub fn get(&self, name: Option<&str>, handle: Option<&str>) -> Vec<Arc<ActiveOperation<P>>> {
        self.lock()
            .iter()
            .filter(|o| o.matches(name, handle))
            .cloned()
            .collect()
    }

    pub fn remove(&self, name: &str, handle: &str) -> Option<Arc<ActiveOperation<P>>> {
        let mut ops = self.lock();
        let idx = ops.iter().position(|o| o.name == name && o.handle == handle)?;
        let op = ops.remove(idx);
        tracing::debug!(operation = %name, handle = %handle, "operation completed");
        Some(op)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<P> Default for ActiveOperations<P> {
    fn default() -> Self {
        Self::new()
    }
}
