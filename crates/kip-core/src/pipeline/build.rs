//! Image build: build under a temporary tag, then tag with the image id and key.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::KipResult;
use crate::process::CommandRunner;
use crate::project::paths::relative_to;
use crate::scheduler::UnitOperation;

use super::image::{ImageJob, inspect_image_id, temp_tag};

pub struct BuildOperation<R> {
    runner: Arc<R>,
}

impl<R> BuildOperation<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> UnitOperation for BuildOperation<R> {
    type Unit = ImageJob;

    fn name(&self) -> &'static str {
        "build"
    }

    fn label(&self) -> &'static str {
        "Building"
    }

    fn unit_name<'a>(&self, unit: &'a ImageJob) -> &'a str {
        &unit.name
    }

    fn precondition(&self, unit: &ImageJob) -> Result<(), String> {
        if unit.has_dockerfile() {
            Ok(())
        } else {
            Err("no Dockerfile".to_string())
        }
    }

    async fn run(&self, job: ImageJob, cancel: CancellationToken) -> KipResult<Vec<u8>> {
        let temp = temp_tag(&job.key);
        let dockerfile = relative_to(&job.dockerfile, &job.build_path);

        let spec = job
            .docker(&job.build_path)
            .env("DOCKER_BUILDKIT", "1")
            .arg("build")
            .arg(job.build_path.to_string_lossy())
            .arg("-f")
            .arg(dockerfile.to_string_lossy())
            .arg("-t")
            .arg(job.image.tagged(&temp))
            .args(job.args.iter().cloned());
        let output = self.runner.run(spec, cancel.clone()).await?;

        let id = inspect_image_id(
            self.runner.as_ref(),
            job.docker(&job.dir),
            &job.image,
            &temp,
            cancel.clone(),
        )
        .await?;

        for tag in [id.as_str(), job.key.as_str()] {
            let spec = job
                .docker(&job.dir)
                .arg("tag")
                .arg(job.image.tagged(&temp))
                .arg(job.image.tagged(tag));
            self.runner.run(spec, cancel.clone()).await?;
        }

        info!(unit = %job.name, image = %job.image.tagged(&id), "built image");
        Ok(output.output)
    }
}
