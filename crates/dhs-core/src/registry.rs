//! Per-protocol message registry and the factory built from it.
//!
//! The registry is populated once during bootstrap. Factories take an
//! immutable snapshot, so lookups on the read path never contend.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::message::{Inbound, Parse};

type ParseFn<R> = fn(&R) -> Option<Arc<dyn Inbound>>;

/// Pulls the type id out of a raw frame.
pub type TypeIdExtractor<R> = fn(&R) -> Option<&str>;

struct Entry<R> {
    kind: TypeId,
    parse: ParseFn<R>,
}

impl<R> Clone for Entry<R> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            parse: self.parse,
        }
    }
}

/// Protocol name -> (type id -> parser) for raw representation `R`.
pub struct MessageRegistry<R> {
    protocols: HashMap<String, HashMap<&'static str, Entry<R>>>,
}

impl<R: 'static> MessageRegistry<R> {
    pub fn new() -> Self {
        Self {
            protocols: HashMap::new(),
        }
    }

    /// Register `M` under `protocol`.
    ///
    /// Registering the same kind twice is a no-op. Registering a different
    /// kind under an existing type id is rejected.
    pub fn register<M: Parse<R> + 'static>(&mut self, protocol: &str) -> Result<(), RegistryError> {
        if M::TYPE_ID.is_empty() {
            return Err(RegistryError::EmptyTypeId(protocol.to_string()));
        }
        let kinds = self.protocols.entry(protocol.to_string()).or_default();
        if let Some(existing) = kinds.get(M::TYPE_ID) {
            if existing.kind != TypeId::of::<M>() {
                return Err(RegistryError::DuplicateTypeId {
                    protocol: protocol.to_string(),
                    type_id: M::TYPE_ID,
                });
            }
            return Ok(());
        }
        kinds.insert(
            M::TYPE_ID,
            Entry {
                kind: TypeId::of::<M>(),
                parse: parse_erased::<R, M>,
            },
        );
        tracing::debug!(protocol, type_id = M::TYPE_ID, "message kind registered");
        Ok(())
    }

    pub fn type_ids(&self, protocol: &str) -> Vec<&'static str> {
        let mut ids: Vec<_> = self
            .protocols
            .get(protocol)
            .map(|kinds| kinds.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Snapshot the kinds of `protocol` into a factory.
    pub fn factory(&self, protocol: &str, extract: TypeIdExtractor<R>) -> MessageFactory<R> {
        let parsers: HashMap<&'static str, ParseFn<R>> = self
            .protocols
            .get(protocol)
            .map(|kinds| kinds.iter().map(|(id, e)| (*id, e.parse)).collect())
            .unwrap_or_default();
        MessageFactory {
            protocol: protocol.to_string(),
            parsers: Arc::new(parsers),
            extract,
        }
    }
}

impl<R: 'static> Default for MessageRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_erased<R, M: Parse<R> + 'static>(raw: &R) -> Option<Arc<dyn Inbound>> {
    M::parse(raw).map(|m| Arc::new(m) as Arc<dyn Inbound>)
}

/// Turns raw frames into typed inbound messages for one protocol.
pub struct MessageFactory<R> {
    protocol: String,
    parsers: Arc<HashMap<&'static str, ParseFn<R>>>,
    extract: TypeIdExtractor<R>,
}

impl<R> Clone for MessageFactory<R> {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol.clone(),
            parsers: self.parsers.clone(),
            extract: self.extract,
        }
    }
}

impl<R> MessageFactory<R> {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Parse `raw`, or `None` for unregistered or malformed frames.
    pub fn create(&self, raw: &R) -> Option<Arc<dyn Inbound>> {
        let Some(type_id) = (self.extract)(raw) else {
            tracing::debug!(protocol = %self.protocol, "frame carries no type id, dropped");
            return None;
        };
        let Some(parse) = self.parsers.get(type_id) else {
            tracing::debug!(protocol = %self.protocol, type_id, "unregistered message, dropped");
            return None;
        };
        let msg = parse(raw);
        if msg.is_none() {
            tracing::debug!(protocol = %self.protocol, type_id, "malformed message, dropped");
        }
        msg
    }
}
