//! Config store for loading a unit's `kip.toml`.

use std::path::{Path, PathBuf};

use super::parser::{self, CONFIG_FILE};
use super::schema::UnitConfig;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store for the unit rooted at `unit_dir`.
    pub fn for_unit(unit_dir: &Path) -> Self {
        Self {
            config_path: unit_dir.join(CONFIG_FILE),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> anyhow::Result<UnitConfig> {
        parser::parse_kip_toml(&self.config_path)
    }
}

/// Nearest directory at or above `start` that holds a `kip.toml`.
pub fn find_config_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}
