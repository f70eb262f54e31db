//! TOML parser for `kip.toml` with line context in error messages.

use std::path::Path;

use anyhow::{Context, Result};

use super::schema::UnitConfig;

/// Unit configuration file name.
pub const CONFIG_FILE: &str = "kip.toml";

/// Parse a `kip.toml` file.
pub fn parse_kip_toml(path: &Path) -> Result<UnitConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_kip_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse `kip.toml` content from a string.
pub fn parse_kip_toml_str(content: &str) -> Result<UnitConfig> {
    let config: UnitConfig =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;

    config.validate()?;

    Ok(config)
}

fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let message = error.message().to_string();

    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())]
                .matches('\n')
                .count()
                + 1;
            anyhow::anyhow!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                get_line_context(content, line_num),
                message
            )
        }
        None => anyhow::anyhow!("TOML parsing error: {}", message),
    }
}

fn get_line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 1).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Hook, UnitKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_root_config() {
        let toml = r#"
kind = "root"
schemaVersion = 1
defaultEnvironment = "dev"
repository = "r/"
extraBuildArgs = ["--pull"]
buildPathTemplate = "<rootDir>"

[environments.prod]
repository = "r-prod/"

[[scripts]]
name = "login"
command = "./scripts/login.sh"
bindings = ["pre-push", "pre-deploy"]
environments = ["prod"]
"#;

        let config = parse_kip_toml_str(toml).unwrap();
        assert_eq!(config.kind, UnitKind::Root);
        assert_eq!(config.default_environment.as_deref(), Some("dev"));
        assert_eq!(config.repository.as_deref(), Some("r/"));
        assert_eq!(config.extra_build_args, Some(vec!["--pull".to_string()]));
        assert_eq!(
            config.environment("prod").and_then(|e| e.repository.as_deref()),
            Some("r-prod/")
        );
        assert_eq!(config.scripts.len(), 1);
        assert_eq!(config.scripts[0].bindings, vec![Hook::PrePush, Hook::PreDeploy]);
    }

    #[test]
    fn test_parse_minimal_leaf() {
        let config = parse_kip_toml_str("kind = \"leaf\"\n").unwrap();
        assert_eq!(config.kind, UnitKind::Leaf);
        assert!(config.repository.is_none());
        assert!(config.scripts.is_empty());
    }

    #[test]
    fn test_kind_is_required() {
        assert!(parse_kip_toml_str("repository = \"r/\"\n").is_err());
    }

    #[test]
    fn test_unknown_hook_is_rejected() {
        let toml = r#"
kind = "root"

[[scripts]]
name = "x"
command = "true"
bindings = ["pre-release"]
"#;
        assert!(parse_kip_toml_str(toml).is_err());
    }

    #[test]
    fn test_error_includes_line_context() {
        let toml = "kind = \"root\"\nrepository = \n";
        let err = parse_kip_toml_str(toml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("TOML parsing error at line"), "unexpected message: {msg}");
        assert!(msg.contains(">>>"));
    }

    #[test]
    fn test_parse_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "kind = \"leaf\"\nrepository = \"svc/\"").unwrap();
        let config = parse_kip_toml(file.path()).unwrap();
        assert_eq!(config.repository.as_deref(), Some("svc/"));
    }
}
