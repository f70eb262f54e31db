//! External tool availability.

use std::ffi::OsString;
use std::path::PathBuf;

/// Tools the pipelines shell out to.
pub const REQUIRED_TOOLS: [&str; 3] = ["docker", "helm", "kubectl"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn is_installed(&self) -> bool {
        self.path.is_some()
    }
}

/// Look up every required tool on `PATH`.
pub fn check_dependencies() -> Vec<ToolStatus> {
    check_tools(&REQUIRED_TOOLS, std::env::var_os("PATH"))
}

/// Resolve each executable in `names` against `search_path`.
pub fn check_tools(names: &[&str], search_path: Option<OsString>) -> Vec<ToolStatus> {
    let cwd = std::env::current_dir().unwrap_or_default();
    names
        .iter()
        .map(|name| ToolStatus {
            name: name.to_string(),
            path: which::which_in(name, search_path.as_ref(), &cwd).ok(),
        })
        .collect()
}
