//! Lifecycle script execution.
//!
//! A script's stdout is echoed to the terminal and captured. After a zero
//! exit, every `KEY=VALUE` line is folded into the [`RunContext`]; this is the
//! only channel a hook has back into the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Hook, ScriptConfig};
use crate::context::RunContext;
use crate::error::{KipError, KipResult};
use crate::events::{Event, EventSink};
use crate::process::{CommandRunner, CommandSpec, OutputMode};
use crate::project::Unit;

pub struct ScriptRunner<R> {
    runner: Arc<R>,
    events: Arc<dyn EventSink>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<R: CommandRunner> ScriptRunner<R> {
    pub fn new(
        runner: Arc<R>,
        events: Arc<dyn EventSink>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            events,
            timeout,
            cancel,
        }
    }

    /// Run `script` with `script.args ++ extra_args` in the owning unit's
    /// directory, then merge its published values into `context`.
    pub async fn run(
        &self,
        unit: &Unit,
        script: &ScriptConfig,
        extra_args: &[String],
        context: &mut RunContext,
    ) -> KipResult<()> {
        self.run_inner(unit, script, None, extra_args, context)
            .await
            .map_err(|source| KipError::ScriptFailed {
                name: script.name.clone(),
                source: Box::new(source),
            })
    }

    /// Run every script of `unit` bound to `hook` in `environment`, in
    /// declaration order. The first failure aborts the rest.
    pub async fn run_hook(
        &self,
        unit: &Unit,
        hook: Hook,
        environment: &str,
        context: &mut RunContext,
    ) -> KipResult<()> {
        let selected: Vec<&ScriptConfig> = unit
            .scripts()
            .iter()
            .filter(|s| s.is_selected(hook, environment))
            .collect();
        if selected.is_empty() {
            return Ok(());
        }

        debug!(%hook, environment, count = selected.len(), "running hook scripts");
        for script in selected {
            self.run_inner(unit, script, Some(hook), &[], context)
                .await
                .map_err(|source| KipError::ScriptFailed {
                    name: script.name.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    async fn run_inner(
        &self,
        unit: &Unit,
        script: &ScriptConfig,
        hook: Option<Hook>,
        extra_args: &[String],
        context: &mut RunContext,
    ) -> KipResult<()> {
        self.events.emit(Event::ScriptStarted {
            name: script.name.clone(),
            hook,
        });

        let spec = CommandSpec::new(
            resolve_command(&script.command, unit.dir()).to_string_lossy(),
            unit.dir(),
        )
        .args(script.args.iter().cloned())
        .args(extra_args.iter().cloned())
        .envs(context.overlay())
        .timeout(self.timeout)
        .mode(OutputMode::Tee);
        info!(script = %script.name, command = %spec, "running script");

        let output = self.runner.run(spec, self.cancel.clone()).await?;
        let text = output.text();
        for (key, value) in parse_assignments(&text) {
            debug!(script = %script.name, key, "script published value");
            context.merge(key, value);
        }
        Ok(())
    }
}

/// Relative commands with a path separator resolve against the unit directory;
/// bare names are looked up on `PATH`.
fn resolve_command(command: &str, unit_dir: &Path) -> PathBuf {
    let path = Path::new(command);
    if path.is_relative() && path.components().count() > 1 {
        unit_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// `KEY=VALUE` lines with a non-empty key of ASCII letters, digits or `_`.
/// The value is everything after the first `=`.
pub fn parse_assignments(output: &str) -> Vec<(&str, &str)> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let valid =
                !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            valid.then_some((key, value))
        })
        .collect()
}
