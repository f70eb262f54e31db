//! Kip Core Library
//!
//! Build, push and deploy orchestration for multi-service projects: unit
//! discovery, configuration cascade, bounded-parallel image pipelines,
//! fingerprinted chart deploys and lifecycle hooks.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod pipeline;
pub mod process;
pub mod project;
pub mod scheduler;
pub mod script;
pub mod tooling;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{EffectiveConfig, Hook, ScriptConfig, UnitConfig, UnitKind};
    pub use crate::context::RunContext;

    // Errors
    pub use crate::error::{KipError, KipResult};

    // Project
    pub use crate::project::{Chart, Project, Unit, UnitId, UnitTree};

    // Execution
    pub use crate::events::{BatchSnapshot, Event, EventSink, NoopSink, UnitOutcome};
    pub use crate::pipeline::{DeployReport, Orchestrator, RunOptions};
    pub use crate::process::{CommandRunner, CommandSpec, OutputMode, SystemRunner};
    pub use crate::scheduler::{BatchReport, ParallelScheduler};
}
