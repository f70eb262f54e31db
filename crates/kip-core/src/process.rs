//! External command execution with deadlines and cancellation.
//!
//! Every docker, helm and hook invocation goes through a [`CommandRunner`].
//! The production runner spawns a child with an explicit working directory
//! and extra environment; the process-wide cwd and environment are untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::error::{KipError, KipResult};

/// How long readers may keep draining once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Where the child's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// stdout and stderr are captured together; nothing reaches the terminal.
    #[default]
    Captured,
    /// stdout goes to the terminal and the buffer; stdin and stderr are inherited.
    Tee,
    /// All streams are inherited; nothing is captured.
    Inherit,
}

/// One external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub envs: BTreeMap<String, String>,
    pub timeout: Duration,
    pub mode: OutputMode,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            envs: BTreeMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            mode: OutputMode::Captured,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        self.envs
            .extend(vars.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined output in [`OutputMode::Captured`], stdout in [`OutputMode::Tee`].
    pub output: Vec<u8>,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Executes external programs.
///
/// A non-zero exit is reported as [`KipError::CommandFailed`] carrying the
/// captured output.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(
        &self,
        spec: CommandSpec,
        cancel: CancellationToken,
    ) -> impl Future<Output = KipResult<CommandOutput>> + Send;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec, cancel: CancellationToken) -> KipResult<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.envs)
            .kill_on_drop(true);

        match spec.mode {
            OutputMode::Captured => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            OutputMode::Tee => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit());
            }
            OutputMode::Inherit => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
        }

        debug!(command = %spec, cwd = %spec.cwd.display(), "spawning");
        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|source| KipError::CommandSpawn {
            program: spec.program.clone(),
            source,
        })?;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let echo = spec.mode == OutputMode::Tee;
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, buffer.clone(), echo)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, buffer.clone(), false)));
        }

        let deadline = Instant::now() + spec.timeout;
        let status = tokio::select! {
            () = cancel.cancelled() => {
                warn!(program = %spec.program, "cancelled, killing child");
                child.kill().await.ok();
                abort_all(&readers);
                return Err(KipError::Cancelled { program: spec.program });
            }
            result = timeout_at(deadline.into(), child.wait()) => {
                match result {
                    Ok(Ok(status)) => status,
                    Ok(Err(e)) => return Err(KipError::Io(e)),
                    Err(_) => {
                        warn!(program = %spec.program, limit = ?spec.timeout, "deadline exceeded, killing child");
                        child.kill().await.ok();
                        abort_all(&readers);
                        return Err(KipError::Timeout {
                            program: spec.program,
                            limit: spec.timeout,
                        });
                    }
                }
            }
        };

        // Background processes may inherit the pipes and keep them open.
        let drain_until = deadline.min(Instant::now() + DRAIN_GRACE);
        let drained = tokio::select! {
            () = cancel.cancelled() => {
                abort_all(&readers);
                return Err(KipError::Cancelled { program: spec.program });
            }
            result = timeout_at(drain_until.into(), join_all(&mut readers)) => result.is_ok(),
        };
        if !drained {
            warn!(program = %spec.program, "output still open after exit, detaching readers");
            abort_all(&readers);
        }

        let output = std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
        let duration = start.elapsed();

        if !status.success() {
            debug!(command = %spec, %status, "command failed");
            return Err(KipError::CommandFailed {
                program: spec.program,
                status: status.to_string(),
                output,
            });
        }

        debug!(command = %spec, duration_secs = duration.as_secs_f32(), "command finished");
        Ok(CommandOutput { output, duration })
    }
}

async fn join_all(readers: &mut [JoinHandle<()>]) {
    for reader in readers {
        reader.await.ok();
    }
}

fn abort_all(readers: &[JoinHandle<()>]) {
    for reader in readers {
        reader.abort();
    }
}

async fn pump<R>(reader: R, buffer: Arc<Mutex<Vec<u8>>>, echo: bool)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut stdout = tokio::io::stdout();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if echo {
                    stdout.write_all(&line).await.ok();
                    stdout.flush().await.ok();
                }
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&line);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str, cwd: &Path) -> CommandSpec {
        CommandSpec::new("sh", cwd).arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_combined_output() {
        let tmp = TempDir::new().unwrap();
        let out = SystemRunner
            .run(sh("echo out; echo err 1>&2", tmp.path()), CancellationToken::new())
            .await
            .unwrap();
        let text = out.text();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[tokio::test]
    async fn test_runs_in_working_directory_with_envs() {
        let tmp = TempDir::new().unwrap();
        let spec = sh("pwd; echo $KIP_PROCESS_TEST", tmp.path()).env("KIP_PROCESS_TEST", "hello");
        let out = SystemRunner.run(spec, CancellationToken::new()).await.unwrap();
        let text = out.text();
        let dir_name = tmp.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(text.contains(&dir_name));
        assert!(text.contains("hello"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_output() {
        let tmp = TempDir::new().unwrap();
        let err = SystemRunner
            .run(sh("echo broken; exit 3", tmp.path()), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            KipError::CommandFailed { program, output, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(output, b"broken\n");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_kills_child() {
        let tmp = TempDir::new().unwrap();
        let spec = sh("sleep 5", tmp.path()).timeout(Duration::from_millis(100));
        let start = Instant::now();
        let err = SystemRunner.run(spec, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, KipError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = SystemRunner
            .run(sh("sleep 5", tmp.path()), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, KipError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_background_process_holding_stdout_does_not_block() {
        let tmp = TempDir::new().unwrap();
        let spec = sh("sleep 6 & echo started", tmp.path()).timeout(Duration::from_millis(500));
        let start = Instant::now();
        let out = SystemRunner.run(spec, CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(out.text(), "started\n");
    }

    #[tokio::test]
    async fn test_cancellation_while_draining_output() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let spec = sh("sleep 6 & echo started", tmp.path()).timeout(Duration::from_secs(30));
        let start = Instant::now();
        let err = SystemRunner.run(spec, cancel).await.unwrap_err();
        assert!(matches!(err, KipError::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let err = SystemRunner
            .run(
                CommandSpec::new("kip-definitely-not-a-program", tmp.path()),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KipError::CommandSpawn { .. }));
    }

    #[test]
    fn test_display_joins_args() {
        let spec = CommandSpec::new("docker", "/tmp").args(["push", "r/api:abc"]);
        assert_eq!(spec.to_string(), "docker push r/api:abc");
    }
}
