//! Build command

use std::sync::Arc;

use clap::Args;
use console::style;
use keel_tasks::{
    BuildReport, ExecutorOptions, TaskExecutor, TaskGraph, TaskReporterRegistry, TaskStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::workspace::{select_targets, Workspace};
use crate::cli::output::{self, ConsoleReporter};
use crate::cli::{Cli, OutputFormat};

/// Build tasks and their dependencies
#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Task names (`:app:jarJvm`) or action names (`jar`); none builds everything
    pub targets: Vec<String>,

    /// Maximum concurrent tasks
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Run every task even if it is up to date
    #[arg(long)]
    pub no_cache: bool,

    /// Show execution plan without running
    #[arg(long)]
    pub dry_run: bool,
}

impl BuildCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(targets = ?self.targets, jobs = ?self.jobs, no_cache = self.no_cache, dry_run = self.dry_run, "executing build command");
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let workspace = Workspace::load()?;
        let graph = select_targets(workspace.task_graph()?, &self.targets)?;

        if graph.is_empty() {
            if !cli.quiet {
                output::success("No tasks to run.");
            }
            return Ok(());
        }

        if self.dry_run {
            return print_plan(cli, &graph);
        }

        if cli.prints_text() {
            output::info(&format!(
                "{} task{} in {} wave{}",
                graph.len(),
                if graph.len() == 1 { "" } else { "s" },
                graph.waves().len(),
                if graph.waves().len() == 1 { "" } else { "s" },
            ));
            println!();
        }

        let context = workspace.context();
        context.init()?;
        let cache = workspace.cache(&context, self.no_cache);

        let mut reporters = TaskReporterRegistry::new();
        if cli.prints_text() {
            reporters.register(ConsoleReporter::new(cli.verbose));
        }

        let concurrency = self
            .jobs
            .unwrap_or_else(|| workspace.config.build.effective_concurrency());
        let cancellation = CancellationToken::new();
        let executor = TaskExecutor::new(Arc::new(context.clone()), Arc::new(cache), Arc::new(reporters))
            .with_options(ExecutorOptions { concurrency })
            .with_cancellation(cancellation.clone());

        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping build");
                cancellation.cancel();
            }
        });
        let report = executor.execute(&graph).await;
        interrupt.abort();
        context.teardown();

        print_report(cli, &report)?;
        report.into_result()?;
        Ok(())
    }
}

fn print_plan(cli: &Cli, graph: &TaskGraph) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        let plan: Vec<serde_json::Value> = graph
            .waves()
            .iter()
            .enumerate()
            .map(|(i, wave)| {
                serde_json::json!({
                    "wave": i,
                    "tasks": wave.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else if !cli.quiet {
        println!("{}", graph.execution_plan());
        println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
    }
    Ok(())
}

fn print_report(cli: &Cli, report: &BuildReport) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        let summary = serde_json::json!({
            "success": report.is_success(),
            "total": report.statuses.len(),
            "completed": report.completed(),
            "up_to_date": report.skipped(),
            "failed": report.failed(),
            "poisoned": report.poisoned(),
            "cancelled": report.cancelled_tasks(),
            "duration_ms": report.duration.as_millis() as u64,
            "tasks": report.statuses.iter().map(|(name, status)| {
                let mut entry = serde_json::json!({
                    "name": name.to_string(),
                    "status": status.label(),
                    "outputs": report
                        .result(name)
                        .map(|r| r.output_paths())
                        .unwrap_or_default(),
                });
                match status {
                    TaskStatus::Failed(error) => entry["error"] = error.clone().into(),
                    TaskStatus::Poisoned { by } => entry["blocked_by"] = by.to_string().into(),
                    _ => {}
                }
                entry
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if cli.quiet {
        return Ok(());
    }

    let failures = report.failures();
    if !failures.is_empty() {
        println!();
        println!(
            "  {} {} task{} failed:",
            style("✗").red().bold(),
            failures.len(),
            if failures.len() == 1 { "" } else { "s" }
        );
        for (name, error) in failures {
            println!("    {} {}: {}", style("✗").red(), name, error);
        }
    } else if report.cancelled {
        output::warning("Build cancelled");
    } else {
        println!();
        output::success("Build completed successfully!");
    }
    Ok(())
}
