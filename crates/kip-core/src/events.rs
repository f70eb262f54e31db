//! Progress events emitted by the orchestrator.
//!
//! The core never prints. Front-ends implement [`EventSink`] to render status
//! lines, and tests use [`RecordingSink`] to assert on the sequence.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::config::Hook;

/// Outcome of one unit in a parallel batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub name: String,
    pub success: bool,
    pub output: Vec<u8>,
    pub duration: Duration,
    /// Rendered error for failed units.
    pub error: Option<String>,
}

/// Live state of a parallel batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSnapshot {
    /// Verb shown to the user, e.g. `Building`.
    pub label: String,
    /// Names of running units, sorted.
    pub running: Vec<String>,
    pub finished: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ScriptStarted {
        name: String,
        hook: Option<Hook>,
    },
    ServiceSkipped {
        name: String,
        reason: String,
    },
    UnitStarted {
        operation: String,
        name: String,
    },
    UnitFinished {
        operation: String,
        outcome: UnitOutcome,
    },
    BatchProgress(BatchSnapshot),
    BatchFinished {
        operation: String,
        elapsed: Duration,
    },
    ChartUnchanged {
        chart: String,
        environment: String,
    },
    ChartDeploying {
        chart: String,
        environment: String,
    },
    ChartDeployed {
        chart: String,
        environment: String,
        duration: Duration,
    },
}

/// Receives orchestrator events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: Event) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
