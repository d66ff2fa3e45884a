//! Rolling in-memory event log.
//!
//! Non-fatal events (skipped playlist entries, provider fetch
//! failures, stream recoveries) are pushed here in addition to the
//! tracing output, so the admin surface can show recent history
//! without tailing process logs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

/// Bounded ring of recent events. Cheap to clone; all clones share the
/// same ring.
#[derive(Debug, Clone)]
pub struct LogSink {
    inner: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LogSink {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, level: EventLevel, message: impl Into<String>) {
        let mut ring = self.inner.lock().expect("log ring poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(Event {
            time: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(EventLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(EventLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(EventLevel::Error, message);
    }

    /// Snapshot of the ring, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.inner
            .lock()
            .expect("log ring poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
