//! Chart discovery.
//!
//! Charts are not persisted anywhere; they are the subdirectories of a unit's
//! `deployments/` directory at the time of the query.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::UnitKind;

use super::unit::{UnitId, UnitTree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    name: String,
    path: PathBuf,
    prefix: Option<String>,
    owner: UnitId,
}

impl Chart {
    pub fn new(name: impl Into<String>, path: PathBuf, owner: UnitId) -> Self {
        Self {
            name: name.into(),
            path,
            prefix: None,
            owner,
        }
    }

    /// Prefix the effective name with the owning unit's name.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Directory name of the chart.
    pub fn base_name(&self) -> &str {
        &self.name
    }

    /// Name used for release names, lookups and the fingerprint cache.
    pub fn name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> UnitId {
        self.owner
    }
}

/// Charts owned directly by `unit`, sorted by directory name.
pub fn unit_charts(tree: &UnitTree, unit: UnitId) -> anyhow::Result<Vec<Chart>> {
    let deployments = &tree.get(unit).paths().deployments;
    if !deployments.is_dir() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(deployments).with_context(|| {
        format!(
            "Failed to read deployments directory: {}",
            deployments.display()
        )
    })?;

    let mut charts = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| {
            format!("Failed to read directory entry in {}", deployments.display())
        })?;
        if entry.file_type()?.is_dir() {
            let name = entry.file_name().to_string_lossy().to_string();
            charts.push(Chart::new(name, entry.path(), unit));
        }
    }
    charts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(charts)
}

/// Charts of the whole tree: the top unit's own charts unprefixed, then each
/// service's charts prefixed with the service name.
pub fn all_charts(tree: &UnitTree) -> anyhow::Result<Vec<Chart>> {
    let root = tree.root();
    let mut charts = unit_charts(tree, root.id())?;

    if root.kind() == UnitKind::Root {
        for service in tree.services() {
            charts.extend(service_charts(tree, service.id())?);
        }
    }
    Ok(charts)
}

/// Charts of one service as they appear in the tree-wide listing.
pub fn service_charts(tree: &UnitTree, service: UnitId) -> anyhow::Result<Vec<Chart>> {
    let unit = tree.get(service);
    let charts = unit_charts(tree, service)?;
    if unit.parent().is_none() {
        return Ok(charts);
    }
    Ok(charts
        .into_iter()
        .map(|c| c.with_prefix(unit.name()))
        .collect())
}
