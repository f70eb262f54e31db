//! On-disk layout of a unit directory.

use std::path::{Component, Path, PathBuf};

pub const SERVICES_DIR: &str = "services";
pub const DEPLOYMENTS_DIR: &str = "deployments";
pub const ENVIRONMENTS_DIR: &str = "environments";
pub const SCRIPTS_DIR: &str = "scripts";
pub const DOCKERFILE: &str = "Dockerfile";
pub const DOTENV_FILE: &str = ".env";

/// Build path template tokens.
pub const ROOT_DIR_TOKEN: &str = "<rootDir>";
pub const LEAF_DIR_TOKEN: &str = "<leafDir>";

/// Fixed subdirectories of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPaths {
    pub root: PathBuf,
    pub services: PathBuf,
    pub deployments: PathBuf,
    pub environments: PathBuf,
    pub scripts: PathBuf,
}

impl UnitPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            services: root.join(SERVICES_DIR),
            deployments: root.join(DEPLOYMENTS_DIR),
            environments: root.join(ENVIRONMENTS_DIR),
            scripts: root.join(SCRIPTS_DIR),
        }
    }

    /// `environments/values-<env>.yaml` of this unit.
    pub fn environment_values(&self, environment: &str) -> PathBuf {
        self.environments.join(values_file_name(environment))
    }

    pub fn dockerfile(&self) -> PathBuf {
        self.root.join(DOCKERFILE)
    }
}

pub fn values_file_name(environment: &str) -> String {
    format!("values-{environment}.yaml")
}

/// Matches the `values-*.yaml` naming pattern.
pub fn is_values_file(name: &str) -> bool {
    name.starts_with("values-") && name.ends_with(".yaml") && name.len() > "values-.yaml".len()
}

/// Substitute the build path tokens. Unknown text is kept as-is.
pub fn render_build_path(template: &str, root_dir: &Path, leaf_dir: &Path) -> PathBuf {
    let rendered = template
        .replace(ROOT_DIR_TOKEN, &root_dir.to_string_lossy())
        .replace(LEAF_DIR_TOKEN, &leaf_dir.to_string_lossy());
    let path = PathBuf::from(rendered);
    if path.is_absolute() {
        path
    } else {
        leaf_dir.join(path)
    }
}

/// `path` expressed relative to `base`. Both should be absolute.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component<'_>> = normalize(path);
    let base: Vec<Component<'_>> = normalize(base);

    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for component in &path[common..] {
        rel.push(component.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

fn normalize(path: &Path) -> Vec<Component<'_>> {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
