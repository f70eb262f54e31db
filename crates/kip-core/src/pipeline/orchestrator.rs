//! Top-level sequencing of build, push and deploy.
//!
//! Every operation runs `pre-*` hooks, the work itself, then `post-*` hooks.
//! Hooks always complete before the first worker is dispatched, and every
//! step reads the same [`RunContext`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{EffectiveConfig, Hook, UnitKind, select_environment};
use crate::context::RunContext;
use crate::error::{KipError, KipResult};
use crate::events::{Event, EventSink, NoopSink};
use crate::fingerprint::{ChangeDetector, FingerprintStore};
use crate::process::{CommandRunner, CommandSpec, OutputMode};
use crate::project::paths::render_build_path;
use crate::project::{Chart, Project, Unit, UnitId, all_charts, service_charts, unit_charts};
use crate::scheduler::{BatchReport, DEFAULT_CONCURRENCY, ParallelScheduler};
use crate::script::ScriptRunner;

use super::build::BuildOperation;
use super::image::{DOCKER, ImageJob, ImageRef, image_set_args, inspect_image_id, temp_tag};
use super::push::PushOperation;

pub const HELM: &str = "helm";

/// Tag key used when none is given.
pub const DEFAULT_KEY: &str = "latest";

/// Options shared by build, push and deploy.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overrides the cascaded `defaultEnvironment`.
    pub environment: Option<String>,
    /// Overrides the cascaded repository for every service.
    pub repository: Option<String>,
    pub key: String,
    pub services: Vec<String>,
    pub charts: Vec<String>,
    pub parallel: usize,
    pub force: bool,
    /// Overrides the cascaded `timeoutSeconds`.
    pub timeout: Option<Duration>,
    /// Trailing arguments passed through to docker or helm.
    pub extra_args: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            environment: None,
            repository: None,
            key: DEFAULT_KEY.to_string(),
            services: Vec::new(),
            charts: Vec::new(),
            parallel: DEFAULT_CONCURRENCY,
            force: false,
            timeout: None,
            extra_args: Vec::new(),
        }
    }
}

/// Charts applied and skipped by one deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub environment: String,
    pub deployed: Vec<String>,
    pub unchanged: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartEntry {
    pub name: String,
    pub owner: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptEntry {
    pub unit: String,
    pub name: String,
    pub command: String,
    pub bindings: Vec<Hook>,
    pub environments: Vec<String>,
}

pub struct Orchestrator<R> {
    project: Project,
    runner: Arc<R>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    detector: ChangeDetector,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(project: Project, runner: Arc<R>) -> Self {
        let detector = ChangeDetector::new(FingerprintStore::for_project(project.root_dir()));
        Self {
            project,
            runner,
            events: Arc::new(NoopSink),
            cancel: CancellationToken::new(),
            detector,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn environment(&self, options: &RunOptions) -> String {
        select_environment(
            self.project.tree(),
            self.project.focus_id(),
            options.environment.as_deref(),
        )
    }

    pub async fn build(
        &self,
        options: &RunOptions,
        context: &mut RunContext,
    ) -> KipResult<BatchReport> {
        let environment = self.environment(options);
        let services = self.selected_services(options)?;
        info!(environment = %environment, services = services.len(), "build");

        self.run_hook(Hook::PreBuild, &environment, options, context)
            .await?;
        let jobs: Vec<ImageJob> = services
            .iter()
            .map(|unit| self.image_job(unit, &environment, options, context, true))
            .collect();
        let report = self
            .scheduler(options)
            .run(
                Arc::new(BuildOperation::new(self.runner.clone())),
                jobs,
                self.events.clone(),
                self.cancel.clone(),
            )
            .await?
            .into_result()?;
        self.run_hook(Hook::PostBuild, &environment, options, context)
            .await?;
        Ok(report)
    }

    pub async fn push(
        &self,
        options: &RunOptions,
        context: &mut RunContext,
    ) -> KipResult<BatchReport> {
        let environment = self.environment(options);
        let services = self.selected_services(options)?;
        info!(environment = %environment, services = services.len(), "push");

        self.run_hook(Hook::PrePush, &environment, options, context)
            .await?;
        let jobs: Vec<ImageJob> = services
            .iter()
            .map(|unit| self.image_job(unit, &environment, options, context, false))
            .collect();
        let report = self
            .scheduler(options)
            .run(
                Arc::new(PushOperation::new(self.runner.clone())),
                jobs,
                self.events.clone(),
                self.cancel.clone(),
            )
            .await?
            .into_result()?;
        self.run_hook(Hook::PostPush, &environment, options, context)
            .await?;
        Ok(report)
    }

    pub async fn deploy(
        &self,
        options: &RunOptions,
        context: &mut RunContext,
    ) -> KipResult<DeployReport> {
        let environment = self.environment(options);
        let charts = self.selected_charts(options)?;
        if charts.is_empty() {
            return Err(KipError::NothingToDeploy);
        }
        info!(environment = %environment, charts = charts.len(), "deploy");

        self.run_hook(Hook::PreDeploy, &environment, options, context)
            .await?;

        let mut extra_args = options.extra_args.clone();
        extra_args.extend(self.image_args(&environment, options, context).await?);

        let mut report = DeployReport {
            environment: environment.clone(),
            ..Default::default()
        };
        for chart in &charts {
            let plan =
                self.detector
                    .plan(self.project.tree(), chart, &environment, context, &extra_args)?;

            if !options.force && !self.detector.is_changed(&plan)? {
                debug!(chart = %plan.chart, environment = %environment, "chart unchanged");
                self.events.emit(Event::ChartUnchanged {
                    chart: plan.chart.clone(),
                    environment: environment.clone(),
                });
                report.unchanged.push(plan.chart);
                continue;
            }

            self.events.emit(Event::ChartDeploying {
                chart: plan.chart.clone(),
                environment: environment.clone(),
            });
            let started = Instant::now();
            let spec = CommandSpec::new(HELM, &plan.cwd)
                .args(plan.args.iter().cloned())
                .envs(context.overlay())
                .timeout(self.timeout_for(chart.owner(), &environment, options, context))
                .mode(OutputMode::Inherit);
            info!(chart = %plan.chart, command = %spec, "deploying chart");
            self.runner.run(spec, self.cancel.clone()).await?;

            self.detector.record_deployed(&plan)?;
            self.events.emit(Event::ChartDeployed {
                chart: plan.chart.clone(),
                environment: environment.clone(),
                duration: started.elapsed(),
            });
            report.deployed.push(plan.chart);
        }

        self.run_hook(Hook::PostDeploy, &environment, options, context)
            .await?;
        Ok(report)
    }

    /// Build, push and deploy with one option set and one run context.
    pub async fn bpd(
        &self,
        options: &RunOptions,
        context: &mut RunContext,
    ) -> KipResult<DeployReport> {
        self.build(options, context).await?;
        self.push(options, context).await?;
        self.deploy(options, context).await
    }

    /// Run one named script of `service`, or of the focus unit.
    pub async fn run_script(
        &self,
        name: &str,
        service: Option<&str>,
        args: &[String],
        options: &RunOptions,
        context: &mut RunContext,
    ) -> KipResult<()> {
        let unit = match service {
            Some(service) => self.project.tree().service(service)?,
            None => self.project.focus(),
        };
        let script = unit.script(name)?;
        let environment = self.environment(options);
        self.script_runner(unit.id(), &environment, options, context)
            .run(unit, script, args, context)
            .await
    }

    /// Image `--set` arguments deploy would append, after the caller's arguments.
    pub async fn helm_args(
        &self,
        options: &RunOptions,
        context: &RunContext,
    ) -> KipResult<Vec<String>> {
        let environment = self.environment(options);
        let mut args = options.extra_args.clone();
        args.extend(self.image_args(&environment, options, context).await?);
        Ok(args)
    }

    /// Charts reachable from the focus unit.
    pub fn charts(&self) -> KipResult<Vec<Chart>> {
        let tree = self.project.tree();
        let focus = self.project.focus();
        let charts = if focus.id() == tree.root_id() {
            all_charts(tree)?
        } else {
            service_charts(tree, focus.id())?
        };
        Ok(charts)
    }

    pub fn chart_entries(&self) -> KipResult<Vec<ChartEntry>> {
        let tree = self.project.tree();
        Ok(self
            .charts()?
            .into_iter()
            .map(|chart| ChartEntry {
                name: chart.name(),
                owner: tree.get(chart.owner()).name().to_string(),
                path: chart.path().to_path_buf(),
            })
            .collect())
    }

    /// Scripts of the focus unit followed by those of its services.
    pub fn script_entries(&self) -> Vec<ScriptEntry> {
        let focus = self.project.focus();
        let mut units = vec![focus];
        if focus.kind() == UnitKind::Root {
            units.extend(self.project.tree().services());
        }

        units
            .into_iter()
            .flat_map(|unit| {
                unit.scripts().iter().map(|s| ScriptEntry {
                    unit: unit.name().to_string(),
                    name: s.name.clone(),
                    command: s.command.clone(),
                    bindings: s.bindings.clone(),
                    environments: s.environments.clone(),
                })
            })
            .collect()
    }

    /// Services in scope: explicit names, else every service under the focus.
    fn selected_services(&self, options: &RunOptions) -> KipResult<Vec<&Unit>> {
        let tree = self.project.tree();
        if !options.services.is_empty() {
            return options
                .services
                .iter()
                .map(|name| tree.service(name))
                .collect();
        }
        Ok(self.scope_services())
    }

    fn scope_services(&self) -> Vec<&Unit> {
        let focus = self.project.focus();
        match focus.kind() {
            UnitKind::Root => self.project.tree().services(),
            UnitKind::Leaf => vec![focus],
        }
    }

    /// Named charts, then charts of named services; everything when neither
    /// is given.
    fn selected_charts(&self, options: &RunOptions) -> KipResult<Vec<Chart>> {
        let available = self.charts()?;
        if options.charts.is_empty() && options.services.is_empty() {
            return Ok(available);
        }

        let tree = self.project.tree();
        let mut selected: Vec<Chart> = Vec::new();
        for name in &options.charts {
            let chart = available
                .iter()
                .find(|c| &c.name() == name)
                .ok_or_else(|| KipError::ChartNotFound(name.clone()))?;
            selected.push(chart.clone());
        }
        for name in &options.services {
            let service = tree.service(name)?;
            let charts = if service.parent().is_some() {
                service_charts(tree, service.id())?
            } else {
                unit_charts(tree, service.id())?
            };
            selected.extend(charts);
        }

        let mut seen = std::collections::HashSet::new();
        selected.retain(|c| seen.insert(c.name()));
        Ok(selected)
    }

    async fn image_args(
        &self,
        environment: &str,
        options: &RunOptions,
        context: &RunContext,
    ) -> KipResult<Vec<String>> {
        let mut args = Vec::new();
        for unit in self.scope_services() {
            let job = self.image_job(unit, environment, options, context, false);
            if !job.has_dockerfile() {
                self.events.emit(Event::ServiceSkipped {
                    name: job.name.clone(),
                    reason: "no Dockerfile".to_string(),
                });
                continue;
            }
            let id = inspect_image_id(
                self.runner.as_ref(),
                CommandSpec::new(DOCKER, &job.dir)
                    .envs(&job.envs)
                    .timeout(job.timeout),
                &job.image,
                &temp_tag(&options.key),
                self.cancel.clone(),
            )
            .await?;
            args.extend(image_set_args(&job.name, &id));
        }
        Ok(args)
    }

    fn image_job(
        &self,
        unit: &Unit,
        environment: &str,
        options: &RunOptions,
        context: &RunContext,
        with_build_args: bool,
    ) -> ImageJob {
        let tree = self.project.tree();
        let effective = EffectiveConfig::resolve(tree, unit.id(), environment, context);
        let repository = match &options.repository {
            Some(repository) => context.substitute(repository),
            None => effective.repository,
        };

        let mut args = Vec::new();
        if with_build_args {
            args.extend(effective.extra_build_args);
        }
        args.extend(options.extra_args.iter().cloned());

        ImageJob {
            name: unit.name().to_string(),
            dir: unit.dir().to_path_buf(),
            build_path: render_build_path(
                &effective.build_path_template,
                tree.root().dir(),
                unit.dir(),
            ),
            dockerfile: unit.paths().dockerfile(),
            image: ImageRef::new(repository, unit.name()),
            key: options.key.clone(),
            args,
            envs: context.overlay().clone(),
            timeout: options.timeout.unwrap_or(effective.timeout),
        }
    }

    fn timeout_for(
        &self,
        unit: UnitId,
        environment: &str,
        options: &RunOptions,
        context: &RunContext,
    ) -> Duration {
        options.timeout.unwrap_or_else(|| {
            EffectiveConfig::resolve(self.project.tree(), unit, environment, context).timeout
        })
    }

    fn scheduler(&self, options: &RunOptions) -> ParallelScheduler {
        ParallelScheduler::new(options.parallel)
    }

    fn script_runner(
        &self,
        unit: UnitId,
        environment: &str,
        options: &RunOptions,
        context: &RunContext,
    ) -> ScriptRunner<R> {
        ScriptRunner::new(
            self.runner.clone(),
            self.events.clone(),
            self.timeout_for(unit, environment, options, context),
            self.cancel.clone(),
        )
    }

    async fn run_hook(
        &self,
        hook: Hook,
        environment: &str,
        options: &RunOptions,
        context: &mut RunContext,
    ) -> KipResult<()> {
        let focus = self.project.focus();
        self.script_runner(focus.id(), environment, options, context)
            .run_hook(focus, hook, environment, context)
            .await
    }
}
