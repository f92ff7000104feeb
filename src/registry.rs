//! Message type registry: wire code to constructor and worker.

use std::collections::HashMap;
use std::sync::Arc;

use crate::message::KaspeakMessage;
use crate::models::MessageHeader;
use crate::types::{BoxFuture, KaspeakError, Result};

/// Builds a fresh default instance of a registered message type.
pub type Constructor = Arc<dyn Fn() -> Box<dyn KaspeakMessage> + Send + Sync>;

/// Handles an inbound payload of a registered type; scheduled by the
/// ingestion engine on its own task turn.
pub type Worker = Arc<dyn Fn(MessageHeader, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

struct Entry {
    constructor: Constructor,
    worker: Option<Worker>,
}

/// Maps wire type codes to message constructors and optional workers.
/// Re-registering a code replaces the previous entry.
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<u16, Entry>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `M` under its own type code, returning the code. The
    /// code is probed from a default instance, so `M::default()` must
    /// report the same constants as every other instance.
    pub fn register<M>(&mut self, worker: Option<Worker>) -> u16
    where
        M: KaspeakMessage + Default + 'static,
    {
        let code = M::default().message_type();
        let replaced = self
            .entries
            .insert(
                code,
                Entry {
                    constructor: Arc::new(|| Box::new(M::default())),
                    worker,
                },
            )
            .is_some();
        if replaced {
            tracing::debug!(code, "message type re-registered, previous entry replaced");
        }
        code
    }

    /// Instantiates a default value of the registered type.
    pub fn create(&self, code: u16) -> Result<Box<dyn KaspeakMessage>> {
        self.entries
            .get(&code)
            .map(|entry| (entry.constructor)())
            .ok_or(KaspeakError::UnknownMessageType(code))
    }

    /// The worker registered for `code`, if any.
    pub fn worker(&self, code: u16) -> Option<Worker> {
        self.entries.get(&code).and_then(|entry| entry.worker.clone())
    }

    /// The constructor registered for `code`, if any.
    pub fn constructor(&self, code: u16) -> Option<Constructor> {
        self.entries.get(&code).map(|entry| entry.constructor.clone())
    }

    pub fn contains(&self, code: u16) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
