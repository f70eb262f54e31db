//! Container image references and the docker calls shared by every pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{KipError, KipResult};
use crate::process::{CommandRunner, CommandSpec};

pub const DOCKER: &str = "docker";

/// Tag a fresh build receives before it is re-tagged with its id and key.
pub fn temp_tag(key: &str) -> String {
    format!("temp-{key}")
}

/// `<repository><name>`; the repository carries its own trailing separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub name: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            name: name.into(),
        }
    }

    pub fn tagged(&self, tag: &str) -> String {
        format!("{}{}:{}", self.repository, self.name, tag)
    }
}

/// Everything a build or push worker needs for one service.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub name: String,
    /// Service directory.
    pub dir: PathBuf,
    /// Rendered build context.
    pub build_path: PathBuf,
    pub dockerfile: PathBuf,
    pub image: ImageRef,
    pub key: String,
    /// Cascaded build arguments followed by caller arguments.
    pub args: Vec<String>,
    /// Values published by hooks earlier in the run.
    pub envs: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ImageJob {
    pub fn has_dockerfile(&self) -> bool {
        self.dockerfile.is_file()
    }

    pub(crate) fn docker(&self, cwd: &Path) -> CommandSpec {
        CommandSpec::new(DOCKER, cwd)
            .envs(&self.envs)
            .timeout(self.timeout)
    }
}

/// Short id (12 hex chars) of `image:tag`.
///
/// A failed inspect means the image does not exist locally.
pub async fn inspect_image_id<R: CommandRunner>(
    runner: &R,
    spec: CommandSpec,
    image: &ImageRef,
    tag: &str,
    cancel: CancellationToken,
) -> KipResult<String> {
    let reference = image.tagged(tag);
    let spec = spec.args(["inspect", "--format", "{{.Id}}", reference.as_str()]);

    let output = match runner.run(spec, cancel).await {
        Ok(output) => output,
        Err(KipError::CommandFailed { .. }) => return Err(KipError::ImageNotFound { reference }),
        Err(e) => return Err(e),
    };

    let text = output.text();
    let id = text.trim();
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    match id.get(..12) {
        Some(short) => Ok(short.to_string()),
        None => Err(anyhow::anyhow!("unexpected image id for {reference}: {id:?}").into()),
    }
}

/// `--set` arguments binding a service's image name and tag into a chart.
pub fn image_set_args(service: &str, tag: &str) -> Vec<String> {
    let key = service.replace('-', "_");
    vec![
        "--set".to_string(),
        format!("global.services.{key}.name={service}"),
        "--set".to_string(),
        format!("global.services.{key}.tag={tag}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_reference() {
        let image = ImageRef::new("registry.example.com/team/", "api");
        assert_eq!(image.tagged("temp-latest"), "registry.example.com/team/api:temp-latest");
        assert_eq!(ImageRef::new("", "api").tagged("v1"), "api:v1");
    }

    #[test]
    fn test_image_set_args_replace_dashes() {
        assert_eq!(
            image_set_args("order-api", "0123456789ab"),
            vec![
                "--set",
                "global.services.order_api.name=order-api",
                "--set",
                "global.services.order_api.tag=0123456789ab",
            ]
        );
    }
}
