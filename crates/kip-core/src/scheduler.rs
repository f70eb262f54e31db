//! Bounded-parallelism batch execution for build and push.
//!
//! Exactly `concurrency` workers pull units from a shared FIFO queue. The
//! first failure stops dispatch; units already running are left to finish.
//! Caller cancellation additionally reaches every in-flight invocation.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{KipError, KipResult};
use crate::events::{BatchSnapshot, Event, EventSink, UnitOutcome};

/// Default number of workers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// A per-unit operation run by the scheduler.
pub trait UnitOperation: Send + Sync + 'static {
    type Unit: Send + 'static;

    /// Lowercase name used in errors, e.g. `build`.
    fn name(&self) -> &'static str;

    /// Verb shown while running, e.g. `Building`.
    fn label(&self) -> &'static str;

    fn unit_name<'a>(&self, unit: &'a Self::Unit) -> &'a str;

    /// `Err(reason)` when the unit cannot run this operation and is skipped.
    fn precondition(&self, unit: &Self::Unit) -> Result<(), String>;

    /// Run the operation, returning captured output.
    fn run(
        &self,
        unit: Self::Unit,
        cancel: CancellationToken,
    ) -> impl Future<Output = KipResult<Vec<u8>>> + Send;
}

/// Result of a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub operation: String,
    pub elapsed: Duration,
    /// Outcomes of dispatched units, in completion order.
    pub outcomes: Vec<UnitOutcome>,
    /// Units skipped for a failed precondition.
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Fail with the first failing unit's output.
    pub fn into_result(self) -> KipResult<Self> {
        let failed = self
            .failures()
            .next()
            .map(|f| (f.name.clone(), f.output.clone()));
        match failed {
            None => Ok(self),
            Some((unit, output)) => Err(KipError::BatchFailed {
                operation: self.operation,
                unit,
                output,
            }),
        }
    }
}

/// Running set and finished counter shared by the workers.
#[derive(Debug, Default)]
struct BatchState {
    label: &'static str,
    running: Mutex<BTreeSet<String>>,
    finished: AtomicUsize,
    total: usize,
}

impl BatchState {
    fn snapshot(&self) -> BatchSnapshot {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        BatchSnapshot {
            label: self.label.to_string(),
            running,
            finished: self.finished.load(Ordering::SeqCst),
            total: self.total,
        }
    }

    fn start(&self, name: &str) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Returns the unit's completion position, starting at 1.
    fn finish(&self, name: &str) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        self.finished.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParallelScheduler {
    concurrency: usize,
}

impl Default for ParallelScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ParallelScheduler {
    /// A concurrency of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run<O: UnitOperation>(
        &self,
        operation: Arc<O>,
        units: Vec<O::Unit>,
        events: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> KipResult<BatchReport> {
        let start = Instant::now();

        let mut queue = VecDeque::new();
        let mut skipped = Vec::new();
        for unit in units {
            let name = operation.unit_name(&unit).to_string();
            match operation.precondition(&unit) {
                Ok(()) => queue.push_back(unit),
                Err(reason) => {
                    debug!(unit = %name, %reason, "skipping unit");
                    events.emit(Event::ServiceSkipped {
                        name: name.clone(),
                        reason,
                    });
                    skipped.push(name);
                }
            }
        }

        let state = Arc::new(BatchState {
            label: operation.label(),
            total: queue.len(),
            ..Default::default()
        });
        let queue = Arc::new(Mutex::new(queue));
        let halt = CancellationToken::new();
        events.emit(Event::BatchProgress(state.snapshot()));

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            workers.push(tokio::spawn(worker(
                worker_id,
                operation.clone(),
                queue.clone(),
                state.clone(),
                events.clone(),
                halt.clone(),
                cancel.clone(),
            )));
        }

        let mut outcomes = Vec::new();
        for handle in workers {
            let finished = handle
                .await
                .map_err(|e| anyhow::anyhow!("{} worker panicked: {e}", operation.name()))?;
            outcomes.extend(finished);
        }
        outcomes.sort_by_key(|(seq, _)| *seq);

        let elapsed = start.elapsed();
        events.emit(Event::BatchFinished {
            operation: operation.name().to_string(),
            elapsed,
        });

        if cancel.is_cancelled() {
            return Err(KipError::Cancelled {
                program: operation.name().to_string(),
            });
        }

        Ok(BatchReport {
            operation: operation.name().to_string(),
            elapsed,
            outcomes: outcomes.into_iter().map(|(_, o)| o).collect(),
            skipped,
        })
    }
}

async fn worker<O: UnitOperation>(
    worker_id: usize,
    operation: Arc<O>,
    queue: Arc<Mutex<VecDeque<O::Unit>>>,
    state: Arc<BatchState>,
    events: Arc<dyn EventSink>,
    halt: CancellationToken,
    cancel: CancellationToken,
) -> Vec<(usize, UnitOutcome)> {
    let mut outcomes = Vec::new();

    loop {
        let next = {
            let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            if halt.is_cancelled() || cancel.is_cancelled() {
                None
            } else {
                queue.pop_front()
            }
        };
        let Some(unit) = next else {
            break;
        };

        let name = operation.unit_name(&unit).to_string();
        debug!(worker_id, unit = %name, "dispatching");
        state.start(&name);
        events.emit(Event::UnitStarted {
            operation: operation.name().to_string(),
            name: name.clone(),
        });
        events.emit(Event::BatchProgress(state.snapshot()));

        let started = Instant::now();
        let result = operation.run(unit, cancel.clone()).await;
        let duration = started.elapsed();

        let outcome = match result {
            Ok(output) => UnitOutcome {
                name: name.clone(),
                success: true,
                output,
                duration,
                error: None,
            },
            Err(err) => {
                warn!(unit = %name, error = %err, "{} failed", operation.name());
                {
                    let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
                    halt.cancel();
                    queue.clear();
                }
                UnitOutcome {
                    name: name.clone(),
                    success: false,
                    output: err.output().map(<[u8]>::to_vec).unwrap_or_default(),
                    duration,
                    error: Some(err.to_string()),
                }
            }
        };

        let seq = state.finish(&name);
        events.emit(Event::UnitFinished {
            operation: operation.name().to_string(),
            outcome: outcome.clone(),
        });
        events.emit(Event::BatchProgress(state.snapshot()));
        outcomes.push((seq, outcome));
    }

    outcomes
}
