//! Build, push and deploy pipelines.

pub mod build;
pub mod image;
pub mod orchestrator;
pub mod push;

pub use build::BuildOperation;
pub use image::{ImageJob, ImageRef, image_set_args, inspect_image_id, temp_tag};
pub use orchestrator::{ChartEntry, DeployReport, Orchestrator, RunOptions, ScriptEntry};
pub use push::PushOperation;
