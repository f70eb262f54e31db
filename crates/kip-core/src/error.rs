//! Error taxonomy for orchestration runs.
//!
//! Context errors abort a command before any side effect. External-tool
//! failures carry the captured output so the caller can surface it verbatim.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the orchestration core.
#[derive(Debug, Error)]
pub enum KipError {
    /// No `kip.toml` was found at the start directory or any ancestor.
    #[error("no kip.toml found in {start} or any parent directory; run this command inside a kip project")]
    ProjectNotFound { start: PathBuf },

    #[error("service \"{0}\" does not exist in project")]
    ServiceNotFound(String),

    #[error("chart \"{0}\" does not exist in project")]
    ChartNotFound(String),

    #[error("script \"{0}\" not found")]
    ScriptNotFound(String),

    /// Deploy resolved an empty chart set.
    #[error("nothing to deploy: no charts found for the requested services")]
    NothingToDeploy,

    /// The image a deploy depends on has not been built yet.
    #[error("image \"{reference}\" not found; be sure to run kip build first")]
    ImageNotFound { reference: String },

    #[error("failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid configuration in {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("failed to spawn {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited with a non-zero status.
    #[error("{program} exited with {status}")]
    CommandFailed {
        program: String,
        status: String,
        output: Vec<u8>,
    },

    #[error("{program} did not finish within {limit:?}")]
    Timeout { program: String, limit: Duration },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    /// A unit in a parallel batch failed; remaining units were not dispatched.
    #[error("{operation} failed for {unit}")]
    BatchFailed {
        operation: String,
        unit: String,
        output: Vec<u8>,
    },

    #[error("error running script \"{name}\": {source}")]
    ScriptFailed {
        name: String,
        #[source]
        source: Box<KipError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KipError {
    /// Captured output attached to the failure, if any.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            Self::CommandFailed { output, .. } | Self::BatchFailed { output, .. } => {
                Some(output.as_slice())
            }
            Self::ScriptFailed { source, .. } => source.output(),
            _ => None,
        }
    }
}

pub type KipResult<T> = Result<T, KipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_exposed_for_command_failures() {
        let err = KipError::CommandFailed {
            program: "docker".to_string(),
            status: "exit status: 1".to_string(),
            output: b"no space left".to_vec(),
        };
        assert_eq!(err.output(), Some(&b"no space left"[..]));
    }

    #[test]
    fn test_script_failure_forwards_inner_output() {
        let err = KipError::ScriptFailed {
            name: "login".to_string(),
            source: Box::new(KipError::CommandFailed {
                program: "./login.sh".to_string(),
                status: "exit status: 2".to_string(),
                output: b"denied".to_vec(),
            }),
        };
        assert_eq!(err.output(), Some(&b"denied"[..]));
        assert!(err.to_string().contains("login"));
    }

    #[test]
    fn test_context_errors_mention_the_name() {
        let err = KipError::ServiceNotFound("api".to_string());
        assert_eq!(err.to_string(), "service \"api\" does not exist in project");
    }
}
