//! Run context threaded through a single orchestration run.
//!
//! Hook scripts publish `KEY=VALUE` lines; those values land in the context
//! overlay instead of the process environment. Every later lookup and every
//! later external invocation sees the overlay.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

/// Variable that accumulates extra chart deploy arguments across hooks.
pub const HELM_ARGS_VAR: &str = "KIP_HELM_ARGS";

/// Key-value state for one command invocation.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    base: HashMap<String, String>,
    overlay: BTreeMap<String, String>,
}

impl RunContext {
    /// Snapshot the current process environment.
    pub fn from_process_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            base: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            overlay: BTreeMap::new(),
        }
    }

    /// Seed missing variables from a `.env` file. A missing file is not an error.
    pub fn load_dotenv(&mut self, path: &Path) -> anyhow::Result<()> {
        if !path.is_file() {
            return Ok(());
        }
        let entries = dotenvy::from_path_iter(path)
            .with_context(|| format!("Failed to read env file: {}", path.display()))?;

        for entry in entries {
            match entry {
                Ok((key, value)) => {
                    self.base.entry(key).or_insert(value);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping env file line"),
            }
        }
        debug!(path = %path.display(), "loaded env file");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.overlay
            .get(name)
            .or_else(|| self.base.get(name))
            .map(String::as_str)
    }

    /// Fold one published value into the overlay.
    ///
    /// `KIP_HELM_ARGS` appends to its current value; other keys overwrite.
    pub fn merge(&mut self, key: &str, value: &str) {
        let merged = if key == HELM_ARGS_VAR {
            let current = self.get(key).unwrap_or_default().trim();
            let value = value.trim();
            match (current.is_empty(), value.is_empty()) {
                (true, _) => value.to_string(),
                (false, true) => current.to_string(),
                (false, false) => format!("{current} {value}"),
            }
        } else {
            value.to_string()
        };
        self.overlay.insert(key.to_string(), merged);
    }

    /// Values published during this run, passed to every child process.
    pub fn overlay(&self) -> &BTreeMap<String, String> {
        &self.overlay
    }

    /// Aggregated extra deploy arguments.
    pub fn helm_args(&self) -> Vec<String> {
        self.get(HELM_ARGS_VAR)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Replace `${NAME}` tokens. Unknown names resolve to an empty string.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let name = &after[..end];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                out.push_str("${");
                rest = after;
                continue;
            }
            match self.get(name) {
                Some(value) => out.push_str(value),
                None => warn!(variable = name, "unresolved placeholder, substituting empty string"),
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        out
    }
}
