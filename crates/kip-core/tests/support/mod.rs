//! Shared fixtures for kip-core integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use kip_core::error::{KipError, KipResult};
use kip_core::process::{CommandOutput, CommandRunner, CommandSpec};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const IMAGE_ID: &str = "sha256:0123456789abcdef0123456789abcdef";
pub const SHORT_ID: &str = "0123456789ab";

/// Records every invocation instead of spawning it.
///
/// A spec whose rendered command line contains a registered failure pattern
/// exits non-zero; `docker inspect` answers with [`IMAGE_ID`] and registered
/// responses supply stdout for everything else.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_on(&self, pattern: &str) {
        self.failures.lock().unwrap().push(pattern.to_string());
    }

    pub fn respond(&self, pattern: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((pattern.to_string(), output.to_string()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines, in invocation order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn commands_for(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| spec.program == program)
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, spec: CommandSpec, cancel: CancellationToken) -> KipResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Err(KipError::Cancelled {
                program: spec.program,
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let line = spec.to_string();
        self.calls.lock().unwrap().push(spec.clone());

        let failing = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| line.contains(pattern.as_str()));
        if failing {
            return Err(KipError::CommandFailed {
                program: spec.program,
                status: "exit status: 1".to_string(),
                output: format!("failed: {line}\n").into_bytes(),
            });
        }

        let response = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone().into_bytes());
        let output = match response {
            Some(output) => output,
            None if spec.args.first().map(String::as_str) == Some("inspect") => {
                format!("{IMAGE_ID}\n").into_bytes()
            }
            None => Vec::new(),
        };
        Ok(CommandOutput {
            output,
            duration: Duration::ZERO,
        })
    }
}

/// On-disk project layout builder.
pub struct Fixture {
    tmp: TempDir,
    root: PathBuf,
}

impl Fixture {
    /// A root unit named `shop` with the given `kip.toml` body.
    pub fn root(config: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("shop");
        write(&root.join("kip.toml"), &format!("kind = \"root\"\n{config}"));
        Self { tmp, root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn service_dir(&self, name: &str) -> PathBuf {
        self.root.join("services").join(name)
    }

    pub fn service(&self, name: &str, config: &str) -> &Self {
        write(
            &self.service_dir(name).join("kip.toml"),
            &format!("kind = \"leaf\"\n{config}"),
        );
        self
    }

    pub fn dockerfile(&self, service: &str) -> &Self {
        write(
            &self.service_dir(service).join("Dockerfile"),
            "FROM scratch\n",
        );
        self
    }

    /// A chart with a single template under `unit_dir/deployments/<name>`.
    pub fn chart(&self, unit_dir: &Path, name: &str) -> PathBuf {
        let chart = unit_dir.join("deployments").join(name);
        write(&chart.join("Chart.yaml"), &format!("name: {name}\n"));
        write(&chart.join("templates/deployment.yaml"), "kind: Deployment\n");
        chart
    }

    pub fn file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        write(&path, content);
        path
    }
}

pub fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
