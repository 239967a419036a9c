use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// The unit of agreement in the replicated log. Every replica decodes and
/// applies the same sequence of events in the same total order, so this type
/// is the whole contract between the log and the state machine. An entry
/// whose `type` tag is not recognized fails deserialization; wherever a
/// committed entry is being decoded that failure is unrecoverable, because a
/// replica that skips or reinterprets an agreed-upon entry diverges from the
/// rest of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Set { value: i64 },
}

/// Point-in-time copy of the replicated value, produced for log compaction
/// and consumed on restart or catch-up. A restored snapshot fully determines
/// the state prior to any entries applied after the snapshot's log position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValueSnapshot {
    pub value: i64,
}

/// The single integer the cluster agrees on. Client queries read it while
/// the commit path writes it, so every access is a critical section under
/// the one lock. The lock is held only for the read or write itself, never
/// across a network call or timeout wait.
#[derive(Clone, Default)]
pub struct SharedValue {
    inner: Arc<Mutex<i64>>,
}

impl SharedValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a committed event. Deterministic: the post-state depends only
    /// on the event, so replaying an already-committed entry on any replica
    /// yields the same result.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::Set { value } => {
                let mut state = self.inner.lock().unwrap();
                *state = *value;
            }
        }
    }

    pub fn get(&self) -> i64 {
        *self.inner.lock().unwrap()
    }

    /// Copies the current value under the lock and releases it immediately;
    /// serialization of the copy happens outside the critical section.
    pub fn snapshot(&self) -> ValueSnapshot {
        ValueSnapshot {
            value: *self.inner.lock().unwrap(),
        }
    }

    /// Replaces the state wholesale. Called at startup or catch-up, before
    /// the state machine sees concurrent traffic, but safe regardless.
    pub fn restore(&self, snapshot: ValueSnapshot) {
        *self.inner.lock().unwrap() = snapshot.value;
    }
}
