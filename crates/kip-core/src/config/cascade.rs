//! Effective configuration of a unit.
//!
//! A field resolves to the unit's environment override, then the unit's own
//! value, then the parent's resolved value for the same environment, then the
//! field's zero value.

use std::time::Duration;

use crate::context::RunContext;
use crate::project::{UnitId, UnitTree};

use super::schema::UnitConfig;

/// Environment used when neither the caller nor any unit names one.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Deadline applied to each external invocation unless configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// Build context used when no unit declares a template.
pub const DEFAULT_BUILD_PATH_TEMPLATE: &str = "<leafDir>";

/// A configuration field that participates in the cascade.
pub trait CascadeField {
    type Value;

    /// Value set explicitly on this unit, environment override first.
    fn explicit(config: &UnitConfig, environment: &str) -> Option<Self::Value>;

    fn zero() -> Self::Value;
}

pub struct Repository;

impl CascadeField for Repository {
    type Value = String;

    fn explicit(config: &UnitConfig, environment: &str) -> Option<String> {
        config
            .environment(environment)
            .and_then(|o| o.repository.clone())
            .or_else(|| config.repository.clone())
    }

    fn zero() -> String {
        String::new()
    }
}

pub struct ExtraBuildArgs;

impl CascadeField for ExtraBuildArgs {
    type Value = Vec<String>;

    fn explicit(config: &UnitConfig, environment: &str) -> Option<Vec<String>> {
        config
            .environment(environment)
            .and_then(|o| o.extra_build_args.clone())
            .or_else(|| config.extra_build_args.clone())
    }

    fn zero() -> Vec<String> {
        Vec::new()
    }
}

pub struct BuildPathTemplate;

impl CascadeField for BuildPathTemplate {
    type Value = String;

    fn explicit(config: &UnitConfig, _environment: &str) -> Option<String> {
        config.build_path_template.clone()
    }

    fn zero() -> String {
        DEFAULT_BUILD_PATH_TEMPLATE.to_string()
    }
}

pub struct DefaultEnvironment;

impl CascadeField for DefaultEnvironment {
    type Value = String;

    fn explicit(config: &UnitConfig, _environment: &str) -> Option<String> {
        config.default_environment.clone()
    }

    fn zero() -> String {
        DEFAULT_ENVIRONMENT.to_string()
    }
}

pub struct TimeoutSeconds;

impl CascadeField for TimeoutSeconds {
    type Value = u64;

    fn explicit(config: &UnitConfig, _environment: &str) -> Option<u64> {
        config.timeout_seconds
    }

    fn zero() -> u64 {
        DEFAULT_TIMEOUT_SECS
    }
}

/// Resolve `F` for `unit`, walking up through its parents.
pub fn resolve<F: CascadeField>(tree: &UnitTree, unit: UnitId, environment: &str) -> F::Value {
    let mut current = Some(unit);
    while let Some(id) = current {
        let node = tree.get(id);
        if let Some(value) = F::explicit(node.config(), environment) {
            return value;
        }
        current = node.parent();
    }
    F::zero()
}

/// Fully resolved settings of one unit for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub environment: String,
    pub repository: String,
    pub extra_build_args: Vec<String>,
    pub build_path_template: String,
    pub timeout: Duration,
}

impl EffectiveConfig {
    /// Resolve every cascaded field. `${NAME}` placeholders in string fields
    /// are substituted from `context`.
    pub fn resolve(
        tree: &UnitTree,
        unit: UnitId,
        environment: &str,
        context: &RunContext,
    ) -> Self {
        let repository = resolve::<Repository>(tree, unit, environment);
        let extra_build_args = resolve::<ExtraBuildArgs>(tree, unit, environment)
            .iter()
            .map(|arg| context.substitute(arg))
            .collect();
        let build_path_template = resolve::<BuildPathTemplate>(tree, unit, environment);
        let timeout = Duration::from_secs(resolve::<TimeoutSeconds>(tree, unit, environment));

        Self {
            environment: environment.to_string(),
            repository: context.substitute(&repository),
            extra_build_args,
            build_path_template: context.substitute(&build_path_template),
            timeout,
        }
    }
}

/// The caller's environment, else the cascaded `defaultEnvironment`.
pub fn select_environment(tree: &UnitTree, unit: UnitId, requested: Option<&str>) -> String {
    match requested {
        Some(env) if !env.is_empty() => env.to_string(),
        _ => resolve::<DefaultEnvironment>(tree, unit, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EnvironmentOverride, UnitKind};
    use std::path::Path;

    fn tree(root: UnitConfig, leaf: UnitConfig) -> (UnitTree, UnitId) {
        let mut tree = UnitTree::new(Path::new("/work/shop"), root);
        let leaf = tree
            .add_service(Path::new("/work/shop/services/svc"), leaf)
            .unwrap();
        (tree, leaf)
    }

    fn root_with_prod_override() -> UnitConfig {
        let mut root = UnitConfig::new(UnitKind::Root);
        root.repository = Some("r/".to_string());
        root.environments.insert(
            "prod".to_string(),
            EnvironmentOverride {
                repository: Some("r-prod/".to_string()),
                extra_build_args: None,
            },
        );
        root
    }

    #[test]
    fn test_leaf_inherits_root_environment_override() {
        let (tree, svc) = tree(root_with_prod_override(), UnitConfig::new(UnitKind::Leaf));
        assert_eq!(resolve::<Repository>(&tree, svc, "prod"), "r-prod/");
        assert_eq!(resolve::<Repository>(&tree, svc, "dev"), "r/");
    }

    #[test]
    fn test_leaf_value_beats_root_for_every_environment() {
        let mut leaf = UnitConfig::new(UnitKind::Leaf);
        leaf.repository = Some("mine/".to_string());
        leaf.extra_build_args = Some(vec!["--pull".to_string()]);
        let mut root = root_with_prod_override();
        root.extra_build_args = Some(vec!["--no-cache".to_string()]);
        let (tree, svc) = tree(root, leaf);

        for env in ["prod", "dev", "staging"] {
            assert_eq!(resolve::<Repository>(&tree, svc, env), "mine/");
            assert_eq!(resolve::<ExtraBuildArgs>(&tree, svc, env), vec!["--pull"]);
        }
    }

    #[test]
    fn test_leaf_environment_override_beats_leaf_global() {
        let mut leaf = UnitConfig::new(UnitKind::Leaf);
        leaf.repository = Some("mine/".to_string());
        leaf.environments.insert(
            "prod".to_string(),
            EnvironmentOverride {
                repository: Some("mine-prod/".to_string()),
                extra_build_args: Some(vec![]),
            },
        );
        let (tree, svc) = tree(UnitConfig::new(UnitKind::Root), leaf);
        assert_eq!(resolve::<Repository>(&tree, svc, "prod"), "mine-prod/");
        assert!(resolve::<ExtraBuildArgs>(&tree, svc, "prod").is_empty());
    }

    #[test]
    fn test_zero_values() {
        let (tree, svc) = tree(UnitConfig::new(UnitKind::Root), UnitConfig::new(UnitKind::Leaf));
        assert_eq!(resolve::<Repository>(&tree, svc, "dev"), "");
        assert!(resolve::<ExtraBuildArgs>(&tree, svc, "dev").is_empty());
        assert_eq!(resolve::<BuildPathTemplate>(&tree, svc, "dev"), "<leafDir>");
        assert_eq!(resolve::<TimeoutSeconds>(&tree, svc, "dev"), DEFAULT_TIMEOUT_SECS);
        assert_eq!(select_environment(&tree, svc, None), "dev");
    }

    #[test]
    fn test_select_environment_prefers_request() {
        let mut root = UnitConfig::new(UnitKind::Root);
        root.default_environment = Some("staging".to_string());
        let (tree, svc) = tree(root, UnitConfig::new(UnitKind::Leaf));
        assert_eq!(select_environment(&tree, svc, None), "staging");
        assert_eq!(select_environment(&tree, svc, Some("prod")), "prod");
        assert_eq!(select_environment(&tree, svc, Some("")), "staging");
    }

    #[test]
    fn test_effective_config_substitutes_placeholders() {
        let mut root = UnitConfig::new(UnitKind::Root);
        root.repository = Some("reg.example.com/${TEAM}/".to_string());
        root.extra_build_args = Some(vec!["--build-arg=V=${VERSION}".to_string()]);
        root.timeout_seconds = Some(60);
        let (tree, svc) = tree(root, UnitConfig::new(UnitKind::Leaf));
        let context = RunContext::from_vars([("TEAM", "core")]);

        let effective = EffectiveConfig::resolve(&tree, svc, "dev", &context);
        assert_eq!(effective.repository, "reg.example.com/core/");
        assert_eq!(effective.extra_build_args, vec!["--build-arg=V="]);
        assert_eq!(effective.timeout, Duration::from_secs(60));
    }
}
