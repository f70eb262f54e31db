//! Image push: resolve the id behind `<key>` and push the id-tagged image.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::KipResult;
use crate::process::CommandRunner;
use crate::scheduler::UnitOperation;

use super::image::{ImageJob, inspect_image_id};

pub struct PushOperation<R> {
    runner: Arc<R>,
}

impl<R> PushOperation<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> UnitOperation for PushOperation<R> {
    type Unit = ImageJob;

    fn name(&self) -> &'static str {
        "push"
    }

    fn label(&self) -> &'static str {
        "Pushing"
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
        let id = inspect_image_id(
            self.runner.as_ref(),
            job.docker(&job.dir),
            &job.image,
            &job.key,
            cancel.clone(),
        )
        .await?;

        let reference = job.image.tagged(&id);
        let spec = job
            .docker(&job.dir)
            .arg("push")
            .arg(reference.as_str())
            .args(job.args.iter().cloned());
        let output = self.runner.run(spec, cancel).await?;

        info!(unit = %job.name, image = %reference, "pushed image");
        Ok(output.output)
    }
}
