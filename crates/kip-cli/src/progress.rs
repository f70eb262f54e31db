//! Console rendering of orchestrator events.
//!
//! Finished units get a permanent line; the running batch is shown on a
//! single status line redrawn with a spinner.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use console::{Term, style};
use tokio::task::JoinHandle;

use kip_core::events::{BatchSnapshot, Event, EventSink, UnitOutcome};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK: Duration = Duration::from_millis(100);

pub struct ConsoleSink {
    term: Term,
    debug: bool,
    batch: Mutex<Option<BatchSnapshot>>,
}

impl ConsoleSink {
    pub fn new(debug: bool) -> Self {
        Self {
            term: Term::stderr(),
            debug,
            batch: Mutex::new(None),
        }
    }

    /// Redraw the status line every tick until the handle is aborted.
    pub fn spawn_ticker(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.term.is_term() {
            return None;
        }
        let sink = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut frame = 0usize;
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                sink.draw_status(SPINNER[frame % SPINNER.len()]);
                frame = frame.wrapping_add(1);
            }
        }))
    }

    fn draw_status(&self, spinner: &str) {
        let batch = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = batch.as_ref() {
            let line = format!(
                "{} {}/{} {} ({})",
                style(spinner).cyan(),
                snapshot.finished,
                snapshot.total,
                snapshot.label,
                snapshot.running.join(", ")
            );
            self.term.clear_line().ok();
            self.term.write_str(&line).ok();
        }
    }

    /// Print a permanent line above the status line.
    fn println(&self, line: &str) {
        let _batch = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        if self.term.is_term() {
            self.term.clear_line().ok();
        }
        self.term.write_line(line).ok();
    }

    fn print_output(&self, output: &[u8]) {
        let text = String::from_utf8_lossy(output);
        for line in text.lines() {
            self.println(line);
        }
    }

    fn unit_finished(&self, operation: &str, outcome: &UnitOutcome) {
        let status = if outcome.success {
            style("SUCCESS").green()
        } else {
            style("FAILED").red()
        };
        self.println(&format!(
            "{} {} {} {}",
            style(operation.to_uppercase()).blue(),
            outcome.name,
            status,
            style(format!("{:.1?}", outcome.duration)).yellow()
        ));
        if !outcome.success || self.debug {
            self.print_output(&outcome.output);
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: Event) {
        match event {
            Event::ScriptStarted { name, .. } => {
                self.println(&format!("{} \"{}\"", style("RUN script:").blue(), name));
            }
            Event::ServiceSkipped { name, reason } => {
                self.println(&format!(
                    "{} \"{}\" {}",
                    style("SKIP service:").blue(),
                    name,
                    reason
                ));
            }
            Event::UnitStarted { .. } => {}
            Event::UnitFinished { operation, outcome } => self.unit_finished(&operation, &outcome),
            Event::BatchProgress(snapshot) => {
                *self.batch.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
            }
            Event::BatchFinished { operation, elapsed } => {
                *self.batch.lock().unwrap_or_else(PoisonError::into_inner) = None;
                self.println(&format!(
                    "{} finished in {}",
                    operation,
                    style(format!("{elapsed:.1?}")).yellow()
                ));
            }
            Event::ChartUnchanged { chart, environment } => {
                self.println(&format!(
                    "{} {}: {} no changes",
                    style("SKIP chart:").blue(),
                    chart,
                    style(environment).yellow()
                ));
            }
            Event::ChartDeploying { chart, environment } => {
                self.println(&format!(
                    "{} {}: {}",
                    style("DEPLOY chart:").blue(),
                    chart,
                    style(environment).yellow()
                ));
            }
            Event::ChartDeployed {
                chart, duration, ..
            } => {
                self.println(&format!(
                    "{} {} {} {}",
                    style("DEPLOY").blue(),
                    chart,
                    style("SUCCESS").green(),
                    style(format!("{duration:.1?}")).yellow()
                ));
            }
        }
    }
}
