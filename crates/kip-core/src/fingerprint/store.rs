//! Persisted fingerprint records, one file per chart and environment.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Cache directory under the project root.
pub const CACHE_DIR: &str = ".kip/cache/chart";

#[derive(Debug, Clone)]
pub struct FingerprintStore {
    cache_dir: PathBuf,
}

impl FingerprintStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Store rooted at `<project_root>/.kip/cache/chart`.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(CACHE_DIR))
    }

    /// `<cache>/<chart>/<environment>.hash`
    pub fn record_path(&self, chart: &str, environment: &str) -> PathBuf {
        self.cache_dir
            .join(chart)
            .join(format!("{environment}.hash"))
    }

    /// Last recorded hash. An absent record means no prior deploy.
    pub fn load(&self, chart: &str, environment: &str) -> anyhow::Result<Option<String>> {
        let path = self.record_path(chart, environment);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read fingerprint: {}", path.display())),
        }
    }

    /// Overwrite the record atomically (tmp + rename).
    pub fn save(&self, chart: &str, environment: &str, hash: &str) -> anyhow::Result<()> {
        let path = self.record_path(chart, environment);
        let dir = path
            .parent()
            .with_context(|| format!("Invalid fingerprint path: {}", path.display()))?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        let tmp_path = dir.join(format!("{environment}.hash.{}.tmp", std::process::id()));
        fs::write(&tmp_path, hash)
            .with_context(|| format!("Failed to write tmp fingerprint: {}", tmp_path.display()))?;

        #[cfg(windows)]
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to replace fingerprint: {}", path.display()))?;
        }

        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to rename tmp fingerprint: {}", tmp_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::for_project(tmp.path());
        assert_eq!(store.load("api", "dev").unwrap(), None);
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_tmp() {
        let tmp = TempDir::new().unwrap();
        let store = FingerprintStore::for_project(tmp.path());
        store.save("api", "dev", "first").unwrap();
        store.save("api", "dev", "second").unwrap();

        assert_eq!(store.load("api", "dev").unwrap().as_deref(), Some("second"));
        assert_eq!(store.load("api", "prod").unwrap(), None);
        assert_eq!(
            store.record_path("api", "dev"),
            tmp.path().join(".kip/cache/chart/api/dev.hash")
        );

        let leftovers: Vec<_> = fs::read_dir(tmp.path().join(".kip/cache/chart/api"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }
}
