use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::types::{Handler, HandlerOutcome};

#[derive(Debug, Error)]
#[error("handler registry full (capacity {capacity})")]
pub struct RegistryFull {
    pub capacity: usize,
}

/// A registered name/callback pair. Immutable once registered; owned
/// exclusively by its registry.
pub struct HandlerEntry {
    name: String,
    handler: Handler,
}

impl HandlerEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, payload: Option<&Value>) -> HandlerOutcome {
        (self.handler)(payload)
    }
}

/// Bounded, insertion-ordered mapping from name to handler.
///
/// Two independent instances exist in the engine: one for inbound commands
/// (cloud-to-device messages and direct methods) and one for desired
/// properties. Both are populated during initialization and read-only
/// afterwards, so lookups need no synchronization.
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
    capacity: usize,
}

impl HandlerRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Registers a handler under `name`. Fails once the registry is at
    /// capacity; it never overwrites or grows. Duplicate names are accepted
    /// and the first registration wins on lookup.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Handler,
    ) -> Result<(), RegistryFull> {
        if self.entries.len() >= self.capacity {
            return Err(RegistryFull {
                capacity: self.capacity,
            });
        }

        let name = name.into();
        if self.lookup(&name).is_some() {
            debug!("duplicate handler registration for {name}; first match wins");
        }
        self.entries.push(HandlerEntry { handler, name });
        Ok(())
    }

    /// Linear, case-insensitive scan returning the first match. "Not found"
    /// is a normal outcome; callers treat it as a no-op.
    pub fn lookup(&self, name: &str) -> Option<&HandlerEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("capacity", &self.capacity)
            .field(
                "names",
                &self
                    .entries
                    .iter()
                    .map(HandlerEntry::name)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
