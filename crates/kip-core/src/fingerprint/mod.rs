//! Content-addressed change detection for chart deploys.

pub mod detector;
pub mod store;

pub use detector::{ChangeDetector, DeployPlan, hash_command, hash_files};
pub use store::FingerprintStore;
