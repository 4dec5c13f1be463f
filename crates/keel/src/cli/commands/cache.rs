//! Cache management command

use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;
use tracing::info;

use keel_tasks::TaskCache;

use super::workspace::Workspace;
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Task cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Remove old cache records
    Prune(CachePruneCommand),
    /// Remove every cache record
    Clean(CacheCleanCommand),
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Remove old cache records
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days
    #[arg(long, default_value = "7")]
    pub max_age_days: u64,
}

/// Remove every cache record
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let workspace = Workspace::load()?;
        let context = workspace.context();
        let cache = TaskCache::new(context.cache_root());
        info!(cache_dir = %cache.cache_dir().display(), "executing cache command");

        match &self.action {
            CacheAction::Status(cmd) => cmd.execute(cli, &cache),
            CacheAction::Prune(cmd) => cmd.execute(cli, &cache),
            CacheAction::Clean(cmd) => cmd.execute(cli, &cache),
        }
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let stats = cache.status()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_dir": cache.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", output::header("Task Cache Status"));
            println!();
            println!("  Location: {}", output::path_style().apply_to(cache.cache_dir().display()));
            println!("  Entries:  {}", stats.entries);
            println!("  Size:     {}", style(stats.formatted_size()).yellow());
        }

        Ok(())
    }
}

impl CachePruneCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let max_age = Duration::from_secs(self.max_age_days * 24 * 60 * 60);

        if cli.prints_text() {
            output::info(&format!(
                "Pruning cache records older than {} days...",
                self.max_age_days
            ));
        }

        let stats = cache.prune(max_age)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "total": stats.total,
                "removed": stats.removed,
                "kept": stats.kept,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} of {} records ({} kept)",
                stats.removed, stats.total, stats.kept
            ));
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli, cache: &TaskCache) -> anyhow::Result<()> {
        let cache_dir = cache.cache_dir();

        if !cache_dir.exists() {
            if !cli.quiet {
                output::success("Cache directory does not exist.");
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove all cache records at {}?",
                    cache_dir.display()
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let removed = cache.clean()?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::json!({ "removed": removed }));
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} records from {}",
                removed,
                output::path_style().apply_to(cache_dir.display())
            ));
        }

        Ok(())
    }
}
