//! Typed message contracts.
//!
//! Each protocol defines concrete message structs. Inbound kinds are parsed
//! from the transport's raw representation `R`; outbound kinds serialize to
//! the transport's wire representation `W`. The string type id only matters
//! at the decoding boundary: everything after the factory works with
//! concrete types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Object-safe access to `Any` for trait objects.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Static type identifier of a concrete message kind.
pub trait MessageKind {
    const TYPE_ID: &'static str;
}

/// A message received from a peer.
pub trait Inbound: AsAny + fmt::Debug {
    fn message_type(&self) -> &'static str;
}

impl dyn Inbound {
    pub fn is<M: Inbound>(&self) -> bool {
        self.as_any().is::<M>()
    }

    pub fn downcast_ref<M: Inbound>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    /// Recover the concrete message from a shared handle.
    pub fn downcast_arc<M: Inbound>(self: Arc<Self>) -> Option<Arc<M>> {
        self.as_any_arc().downcast::<M>().ok()
    }
}

/// Inbound kinds that can be built from a raw frame of type `R`.
pub trait Parse<R>: Inbound + MessageKind + Sized {
    /// `None` when the frame is malformed for this kind.
    fn parse(raw: &R) -> Option<Self>;
}

/// A message sent to a peer, serialized to wire form `W`.
pub trait Outbound<W>: AsAny + fmt::Debug {
    fn message_type(&self) -> &'static str;
    fn write(&self) -> W;
}

impl<W: 'static> dyn Outbound<W> {
    pub fn downcast_ref<M: Outbound<W>>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}
