//! Kip - build, push and deploy multi-service projects
//!
//! Usage:
//!   kip build -s api           # Build one service image
//!   kip push                   # Push every service image
//!   kip deploy -e prod -a      # Deploy every chart to prod
//!   kip bpd -e dev             # Build, push and deploy
//!   kip run migrate -- --dry   # Run a declared script

mod progress;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kip_core::error::KipError;
use kip_core::pipeline::{DeployReport, Orchestrator, RunOptions};
use kip_core::process::SystemRunner;
use kip_core::project::Project;
use kip_core::scheduler::DEFAULT_CONCURRENCY;
use kip_core::tooling;

use crate::progress::ConsoleSink;

#[derive(Parser)]
#[command(name = "kip")]
#[command(about = "Build, push and deploy multi-service projects", long_about = None)]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build service images
    Build(PipelineArgs),

    /// Push service images
    Push(PipelineArgs),

    /// Deploy charts, skipping those whose inputs are unchanged
    Deploy(DeployArgs),

    /// Build, push and deploy
    Bpd(DeployArgs),

    /// Run a declared script
    Run {
        /// Script name
        name: String,
        /// Service owning the script (defaults to the current unit)
        #[arg(short, long)]
        service: Option<String>,
        #[arg(short, long)]
        environment: Option<String>,
        /// Arguments appended to the script's own
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Print the image arguments deploy would add
    #[command(name = "helm-args", alias = "helmargs")]
    HelmArgs {
        #[arg(short, long)]
        environment: Option<String>,
        #[arg(short, long)]
        repository: Option<String>,
        #[arg(short, long, default_value = "latest")]
        key: String,
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Inspect charts
    Chart {
        #[command(subcommand)]
        command: ListCommand,
    },

    /// Inspect scripts
    Script {
        #[command(subcommand)]
        command: ListCommand,
    },

    /// Verify docker, helm and kubectl are installed
    Check,
}

#[derive(Subcommand)]
enum ListCommand {
    /// List every entry in the project
    List {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Args, Clone)]
struct PipelineArgs {
    /// Environment (defaults to the configured defaultEnvironment)
    #[arg(short, long)]
    environment: Option<String>,
    /// Repository to tag images with (overrides configuration)
    #[arg(short, long)]
    repository: Option<String>,
    /// Key to tag the latest image with
    #[arg(short, long, default_value = "latest")]
    key: String,
    /// Services to include (repeatable)
    #[arg(short = 's', long = "service", value_name = "SERVICE")]
    services: Vec<String>,
    /// Include every service (default when none is named)
    #[arg(short, long)]
    all: bool,
    /// Number of images processed in parallel
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    parallel: usize,
    /// Deadline for each external command, in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Print captured output of successful units
    #[arg(long)]
    debug: bool,
    /// Extra arguments passed to docker or helm
    #[arg(last = true)]
    extra_args: Vec<String>,
}

#[derive(Args, Clone)]
struct DeployArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,
    /// Charts to deploy (repeatable)
    #[arg(short = 'c', long = "chart", value_name = "CHART")]
    charts: Vec<String>,
    /// Deploy even when the fingerprint is unchanged
    #[arg(short, long)]
    force: bool,
}

impl PipelineArgs {
    fn options(&self) -> RunOptions {
        let services = if self.all && self.services.is_empty() {
            Vec::new()
        } else {
            if self.all {
                warn!("--all is ignored when --service is used");
            }
            self.services.clone()
        };
        RunOptions {
            environment: self.environment.clone(),
            repository: self.repository.clone(),
            key: self.key.clone(),
            services,
            parallel: self.parallel,
            timeout: self.timeout.map(Duration::from_secs),
            extra_args: self.extra_args.clone(),
            ..Default::default()
        }
    }
}

impl DeployArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            charts: self.charts.clone(),
            force: self.force,
            ..self.pipeline.options()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "kip=debug,kip_core=debug,info"
    } else {
        "kip=info,kip_core=info,warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run_cli(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", style("error:").red().bold());
    if let Some(output) = err.downcast_ref::<KipError>().and_then(KipError::output)
        && !output.is_empty()
    {
        eprintln!("{}", String::from_utf8_lossy(output));
    }
}

async fn run_cli(command: Commands) -> Result<()> {
    if let Commands::Check = command {
        return run_check();
    }

    let project = Project::discover(&std::env::current_dir()?)?;
    let mut context = project.run_context()?;

    let debug = match &command {
        Commands::Build(args) | Commands::Push(args) => args.debug,
        Commands::Deploy(args) | Commands::Bpd(args) => args.pipeline.debug,
        _ => false,
    };
    let sink = Arc::new(ConsoleSink::new(debug));
    let ticker = sink.spawn_ticker();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping running commands");
            trigger.cancel();
        }
    });

    let orchestrator = Orchestrator::new(project, Arc::new(SystemRunner))
        .with_events(sink.clone())
        .with_cancel(cancel);

    let result = match command {
        Commands::Build(args) => {
            let options = args.options();
            orchestrator.build(&options, &mut context).await.map(|_| ())
        }
        Commands::Push(args) => {
            let options = args.options();
            orchestrator.push(&options, &mut context).await.map(|_| ())
        }
        Commands::Deploy(args) => {
            let options = args.options();
            orchestrator
                .deploy(&options, &mut context)
                .await
                .map(|report| print_deploy_summary(&report))
        }
        Commands::Bpd(args) => {
            let options = args.options();
            orchestrator
                .bpd(&options, &mut context)
                .await
                .map(|report| print_deploy_summary(&report))
        }
        Commands::Run {
            name,
            service,
            environment,
            args,
        } => {
            let options = RunOptions {
                environment,
                ..Default::default()
            };
            orchestrator
                .run_script(&name, service.as_deref(), &args, &options, &mut context)
                .await
        }
        Commands::HelmArgs {
            environment,
            repository,
            key,
            args,
        } => {
            let options = RunOptions {
                environment,
                repository,
                key,
                extra_args: args,
                ..Default::default()
            };
            orchestrator
                .helm_args(&options, &context)
                .await
                .map(|args| println!("{}", args.join(" ")))
        }
        Commands::Chart {
            command: ListCommand::List { format },
        } => {
            if let Some(ticker) = ticker {
                ticker.abort();
            }
            return list_charts(&orchestrator, format);
        }
        Commands::Script {
            command: ListCommand::List { format },
        } => {
            if let Some(ticker) = ticker {
                ticker.abort();
            }
            return list_scripts(&orchestrator, format);
        }
        Commands::Check => return run_check(),
    };

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    result.map_err(Into::into)
}

fn print_deploy_summary(report: &DeployReport) {
    if report.deployed.is_empty() {
        println!(
            "Nothing changed in {}, {} chart(s) up to date",
            style(&report.environment).yellow(),
            report.unchanged.len()
        );
    } else {
        println!(
            "Deployed {} to {}",
            report.deployed.join(", "),
            style(&report.environment).yellow()
        );
    }
}

fn list_charts(orchestrator: &Orchestrator<SystemRunner>, format: OutputFormat) -> Result<()> {
    let charts = orchestrator.chart_entries()?;
    match format {
        OutputFormat::Table => {
            println!("{:<32} {:<20} PATH", "NAME", "OWNER");
            for chart in &charts {
                println!(
                    "{:<32} {:<20} {}",
                    chart.name,
                    chart.owner,
                    chart.path.display()
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&charts)?),
    }
    Ok(())
}

fn list_scripts(orchestrator: &Orchestrator<SystemRunner>, format: OutputFormat) -> Result<()> {
    let scripts = orchestrator.script_entries();
    match format {
        OutputFormat::Table => {
            println!("{:<20} {:<20} {:<32} COMMAND", "UNIT", "NAME", "BINDINGS");
            for script in &scripts {
                let bindings: Vec<&str> = script.bindings.iter().map(|b| b.as_str()).collect();
                println!(
                    "{:<20} {:<20} {:<32} {}",
                    script.unit,
                    script.name,
                    bindings.join(","),
                    script.command
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&scripts)?),
    }
    Ok(())
}

fn run_check() -> Result<()> {
    let statuses = tooling::check_dependencies();
    for status in &statuses {
        match &status.path {
            Some(path) => println!(
                "{} {} {}",
                style("✓").green(),
                status.name,
                style(path.display()).dim()
            ),
            None => println!("{} {} not found on PATH", style("✗").red(), status.name),
        }
    }

    let missing: Vec<&str> = statuses
        .iter()
        .filter(|s| !s.is_installed())
        .map(|s| s.name.as_str())
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("missing required tools: {}", missing.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_flags() {
        let cli = Cli::parse_from([
            "kip", "deploy", "-e", "prod", "-c", "web", "-c", "redis", "-f", "-p", "2", "--",
            "--atomic",
        ]);
        let Commands::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        let options = args.options();
        assert_eq!(options.environment.as_deref(), Some("prod"));
        assert_eq!(options.charts, vec!["web", "redis"]);
        assert!(options.force);
        assert_eq!(options.parallel, 2);
        assert_eq!(options.key, "latest");
        assert_eq!(options.extra_args, vec!["--atomic"]);
    }

    #[test]
    fn test_all_is_ignored_with_services() {
        let cli = Cli::parse_from(["kip", "build", "-a", "-s", "api", "--timeout", "60"]);
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        let options = args.options();
        assert_eq!(options.services, vec!["api"]);
        assert_eq!(options.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_helm_args_alias() {
        let cli = Cli::parse_from(["kip", "helmargs", "-k", "v2"]);
        assert!(matches!(cli.command, Commands::HelmArgs { ref key, .. } if key == "v2"));
    }
}
