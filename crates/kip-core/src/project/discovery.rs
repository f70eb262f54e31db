//! Project discovery from a working directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::config::{CONFIG_FILE, ConfigStore, UnitConfig, UnitKind, find_config_dir};
use crate::context::RunContext;
use crate::error::{KipError, KipResult};

use super::paths::{DOTENV_FILE, SERVICES_DIR};
use super::unit::{Unit, UnitId, UnitTree};

/// A loaded unit tree plus the unit the user is standing in.
#[derive(Debug, Clone)]
pub struct Project {
    tree: UnitTree,
    focus: UnitId,
}

impl Project {
    pub fn new(tree: UnitTree, focus: UnitId) -> Self {
        Self { tree, focus }
    }

    /// Locate and load the project enclosing `start`.
    pub fn discover(start: &Path) -> KipResult<Self> {
        let dir = find_config_dir(start).ok_or_else(|| KipError::ProjectNotFound {
            start: start.to_path_buf(),
        })?;
        let config = load_config(&dir)?;
        debug!(dir = %dir.display(), kind = %config.kind, "found unit config");

        if config.kind == UnitKind::Leaf
            && let Some((root_dir, root_config)) = enclosing_root(&dir)?
        {
            let tree = load_tree(&root_dir, root_config)?;
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let focus = tree.find_service(&name).map(Unit::id).ok_or_else(|| {
                KipError::InvalidConfig {
                    path: dir.join(CONFIG_FILE),
                    message: format!("service \"{name}\" could not be attached to its project"),
                }
            })?;
            return Ok(Self::new(tree, focus));
        }

        let tree = load_tree(&dir, config)?;
        let focus = tree.root_id();
        Ok(Self::new(tree, focus))
    }

    pub fn tree(&self) -> &UnitTree {
        &self.tree
    }

    pub fn focus(&self) -> &Unit {
        self.tree.get(self.focus)
    }

    pub fn focus_id(&self) -> UnitId {
        self.focus
    }

    /// Top directory of the tree. Holds `.env` and the `.kip` cache.
    pub fn root_dir(&self) -> &Path {
        self.tree.root().dir()
    }

    /// Run context seeded from the process environment and the project `.env`.
    pub fn run_context(&self) -> anyhow::Result<RunContext> {
        let mut context = RunContext::from_process_env();
        context.load_dotenv(&self.root_dir().join(DOTENV_FILE))?;
        Ok(context)
    }
}

fn load_config(dir: &Path) -> KipResult<UnitConfig> {
    let store = ConfigStore::for_unit(dir);
    store.load().map_err(|e| KipError::ConfigParse {
        path: store.config_path().to_path_buf(),
        message: format!("{e:#}"),
    })
}

/// A root two levels up whose `services/` directory holds `leaf_dir`.
fn enclosing_root(leaf_dir: &Path) -> KipResult<Option<(PathBuf, UnitConfig)>> {
    let Some(services) = leaf_dir.parent() else {
        return Ok(None);
    };
    if services.file_name().is_none_or(|n| n != SERVICES_DIR) {
        return Ok(None);
    }
    let Some(root_dir) = services.parent() else {
        return Ok(None);
    };
    if !root_dir.join(CONFIG_FILE).is_file() {
        return Ok(None);
    }

    let config = load_config(root_dir)?;
    if config.kind != UnitKind::Root {
        return Ok(None);
    }
    Ok(Some((root_dir.to_path_buf(), config)))
}

fn load_tree(dir: &Path, config: UnitConfig) -> KipResult<UnitTree> {
    let kind = config.kind;
    let mut tree = UnitTree::new(dir, config);
    if kind != UnitKind::Root {
        return Ok(tree);
    }

    let services_dir = dir.join(SERVICES_DIR);
    if !services_dir.is_dir() {
        return Ok(tree);
    }

    let mut service_dirs = Vec::new();
    let entries = std::fs::read_dir(&services_dir).with_context(|| {
        format!(
            "Failed to read services directory: {}",
            services_dir.display()
        )
    })?;
    for entry in entries {
        let entry = entry.with_context(|| {
            format!("Failed to read directory entry in {}", services_dir.display())
        })?;
        if entry.file_type()?.is_dir() {
            service_dirs.push(entry.path());
        }
    }
    service_dirs.sort();

    for service_dir in service_dirs {
        if !service_dir.join(CONFIG_FILE).is_file() {
            warn!(dir = %service_dir.display(), "skipping service without kip.toml");
            continue;
        }
        let config = load_config(&service_dir)?;
        let id = tree.add_service(&service_dir, config)?;
        debug!(service = tree.get(id).name(), "loaded service");
    }

    Ok(tree)
}
