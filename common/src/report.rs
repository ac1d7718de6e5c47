use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use thiserror::Error;

/// A decided reported-property echo, in flight between the reconciliation
/// path and the publishing consumer. Ownership transfers at enqueue time;
/// each envelope is consumed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedProperty {
    pub name: String,
    pub value: Value,
    pub desired_version: i64,
    pub status: String,
    pub status_code: i32,
}

#[derive(serde::Serialize)]
struct WireBody<'a> {
    value: &'a Value,
    #[serde(rename = "statusCode")]
    status_code: i32,
    status: &'a str,
    #[serde(rename = "desiredVersion")]
    desired_version: i64,
}

// Serialized by hand so the field order of the published document stays
// stable: {"<name>": {"value", "statusCode", "status", "desiredVersion"}}.
impl Serialize for ReportedProperty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(
            &self.name,
            &WireBody {
                value: &self.value,
                status_code: self.status_code,
                status: &self.status,
                desired_version: self.desired_version,
            },
        )?;
        map.end()
    }
}

impl ReportedProperty {
    /// Wire form published as the reported-property patch.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
#[error("report queue full (capacity {capacity})")]
pub struct QueueFull {
    pub capacity: usize,
    /// The rejected envelope, handed back so the producer can account for it.
    pub envelope: ReportedProperty,
}

/// Bounded FIFO carrying envelopes from the transport-callback context to
/// the publishing consumer.
///
/// Push and pop may run concurrently; the internal lock is held only for the
/// queue operation itself. A full queue rejects the push (drop-and-count
/// policy) so the producer is never blocked, and `pop` returns promptly so
/// the consumer can yield to other periodic work.
#[derive(Debug)]
pub struct ReportQueue {
    inner: Mutex<VecDeque<ReportedProperty>>,
    capacity: usize,
}

impl ReportQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, envelope: ReportedProperty) -> Result<(), QueueFull> {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
                envelope,
            });
        }
        queue.push_back(envelope);
        Ok(())
    }

    pub fn pop(&self) -> Option<ReportedProperty> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ReportedProperty>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
