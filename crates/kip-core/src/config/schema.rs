//! Schema for `kip.toml`.
//!
//! One file per unit directory. A root unit describes the whole project;
//! a leaf unit describes one service and may override any cascaded field.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Newest `schemaVersion` this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Fixed role of a unit in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Root,
    Leaf,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Leaf => write!(f, "leaf"),
        }
    }
}

/// Lifecycle point at which scripts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Hook {
    PreBuild,
    PostBuild,
    PrePush,
    PostPush,
    PreDeploy,
    PostDeploy,
}

impl Hook {
    pub const ALL: [Hook; 6] = [
        Hook::PreBuild,
        Hook::PostBuild,
        Hook::PrePush,
        Hook::PostPush,
        Hook::PreDeploy,
        Hook::PostDeploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreBuild => "pre-build",
            Self::PostBuild => "post-build",
            Self::PrePush => "pre-push",
            Self::PostPush => "post-push",
            Self::PreDeploy => "pre-deploy",
            Self::PostDeploy => "post-deploy",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hook {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hook::ALL
            .into_iter()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown hook: {s}"))
    }
}

/// Per-environment override record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentOverride {
    #[serde(default)]
    pub repository: Option<String>,

    #[serde(default)]
    pub extra_build_args: Option<Vec<String>>,
}

/// A declared lifecycle script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub name: String,

    /// Program to execute; relative paths resolve against the owning unit.
    pub command: String,

    #[serde(default)]
    pub bindings: Vec<Hook>,

    /// Environments the script is limited to; empty means all.
    #[serde(default)]
    pub environments: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl ScriptConfig {
    /// Whether this script runs for `hook` in `environment`.
    pub fn is_selected(&self, hook: Hook, environment: &str) -> bool {
        self.bindings.contains(&hook)
            && (self.environments.is_empty() || self.environments.iter().any(|e| e == environment))
    }
}

/// Root structure of `kip.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitConfig {
    pub kind: UnitKind,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub default_environment: Option<String>,

    /// Default image repository prefix, e.g. `registry.example.com/team/`.
    #[serde(default)]
    pub repository: Option<String>,

    #[serde(default)]
    pub extra_build_args: Option<Vec<String>>,

    /// Build context template; tokens `<rootDir>` and `<leafDir>`.
    #[serde(default)]
    pub build_path_template: Option<String>,

    /// Deadline for each external invocation, in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentOverride>,

    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl UnitConfig {
    pub fn new(kind: UnitKind) -> Self {
        Self {
            kind,
            schema_version: SCHEMA_VERSION,
            default_environment: None,
            repository: None,
            extra_build_args: None,
            build_path_template: None,
            timeout_seconds: None,
            environments: BTreeMap::new(),
            scripts: Vec::new(),
        }
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentOverride> {
        self.environments.get(name)
    }

    /// Validate invariants serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schema_version > SCHEMA_VERSION {
            anyhow::bail!(
                "schemaVersion {} is newer than supported version {}",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        let mut seen = std::collections::HashSet::new();
        for script in &self.scripts {
            if script.name.trim().is_empty() {
                anyhow::bail!("script name must not be empty");
            }
            if script.command.trim().is_empty() {
                anyhow::bail!("script \"{}\" has an empty command", script.name);
            }
            if !seen.insert(script.name.as_str()) {
                anyhow::bail!("script \"{}\" is declared more than once", script.name);
            }
        }

        for name in self.environments.keys() {
            if name.trim().is_empty() {
                anyhow::bail!("environment names must not be empty");
            }
        }

        Ok(())
    }
}
