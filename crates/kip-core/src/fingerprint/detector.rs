//! Chart change detection.
//!
//! A chart's fingerprint covers both the deploy command line and the bytes of
//! every input file, so a change to either re-triggers the deploy.
//!
//! # Algorithm
//! - Build the `helm upgrade` argument list, resolving values files in order:
//!   root environment, owning service environment, `deployments/`, chart.
//! - Collect every regular file under the chart except top-level
//!   `values-*.yaml`, plus the resolved values files.
//! - `dir_hash = blake3(content_1 || content_2 || ...)` over paths sorted
//!   lexicographically.
//! - `command_hash = blake3(args.join(" ") || dir_hash)`, hex encoded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::context::RunContext;
use crate::error::KipResult;
use crate::project::paths::{is_values_file, values_file_name};
use crate::project::{Chart, UnitTree};

use super::store::FingerprintStore;

/// Everything needed to deploy one chart and to fingerprint that deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    /// Effective chart name; also the release name.
    pub chart: String,
    pub environment: String,
    /// Chart directory; helm runs here against `.`.
    pub cwd: PathBuf,
    pub args: Vec<String>,
    pub values_files: Vec<PathBuf>,
    pub command_hash: String,
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    store: FingerprintStore,
}

impl ChangeDetector {
    pub fn new(store: FingerprintStore) -> Self {
        Self { store }
    }

    /// Resolve the deploy command for `chart` and fingerprint its inputs.
    pub fn plan(
        &self,
        tree: &UnitTree,
        chart: &Chart,
        environment: &str,
        context: &RunContext,
        extra_args: &[String],
    ) -> KipResult<DeployPlan> {
        let values_files = resolve_values_files(tree, chart, environment);

        let mut args = vec![
            "upgrade".to_string(),
            chart.name(),
            ".".to_string(),
            "--install".to_string(),
        ];
        for file in &values_files {
            args.push("-f".to_string());
            args.push(file.to_string_lossy().to_string());
        }
        args.extend(context.helm_args());
        args.extend(extra_args.iter().cloned());

        let mut files = values_files.clone();
        collect_chart_files(chart.path(), chart.path(), &mut files)?;
        let dir_hash = hash_files(&files)?;
        let command_hash = hash_command(&args, &dir_hash);

        debug!(
            chart = %chart.name(),
            environment,
            files = files.len(),
            hash = %command_hash,
            "computed chart fingerprint"
        );

        Ok(DeployPlan {
            chart: chart.name(),
            environment: environment.to_string(),
            cwd: chart.path().to_path_buf(),
            args,
            values_files,
            command_hash,
        })
    }

    /// True when no record exists or the recorded hash differs.
    pub fn is_changed(&self, plan: &DeployPlan) -> KipResult<bool> {
        let saved = self.store.load(&plan.chart, &plan.environment)?;
        Ok(saved.as_deref() != Some(plan.command_hash.as_str()))
    }

    /// Persist the plan's hash. Call only after the deploy succeeded.
    pub fn record_deployed(&self, plan: &DeployPlan) -> KipResult<()> {
        self.store
            .save(&plan.chart, &plan.environment, &plan.command_hash)?;
        Ok(())
    }
}

fn resolve_values_files(tree: &UnitTree, chart: &Chart, environment: &str) -> Vec<PathBuf> {
    if environment.is_empty() {
        return Vec::new();
    }

    let root = tree.root();
    let mut candidates = vec![root.paths().environment_values(environment)];
    if chart.owner() != root.id() {
        candidates.push(tree.get(chart.owner()).paths().environment_values(environment));
    }
    let file_name = values_file_name(environment);
    if let Some(deployments) = chart.path().parent() {
        candidates.push(deployments.join(&file_name));
    }
    candidates.push(chart.path().join(&file_name));

    candidates.into_iter().filter(|p| p.is_file()).collect()
}

fn collect_chart_files(chart_dir: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("Failed to read directory entry in {}", dir.display()))?;
        let path = entry.path();
        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat file: {}", path.display()))?;

        if ty.is_dir() {
            collect_chart_files(chart_dir, &path, files)?;
        } else if path.is_file() {
            let top_level = dir == chart_dir;
            if top_level && is_values_file(&entry.file_name().to_string_lossy()) {
                continue;
            }
            files.push(path);
        }
    }
    Ok(())
}

/// Digest of the concatenated contents of `files`, taken in sorted path order.
pub fn hash_files(files: &[PathBuf]) -> anyhow::Result<String> {
    let mut sorted: Vec<&PathBuf> = files.iter().collect();
    sorted.sort();

    let mut hasher = blake3::Hasher::new();
    for file in sorted {
        let content =
            fs::read(file).with_context(|| format!("Failed to read file: {}", file.display()))?;
        hasher.update(&content);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn hash_command(args: &[String], dir_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(args.join(" ").as_bytes());
    hasher.update(dir_hash.as_bytes());
    hasher.finalize().to_hex().to_string()
}
