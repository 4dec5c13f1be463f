//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{BuildCommand, CacheCommand, CompletionsCommand, InitCommand, TasksCommand};

/// Keel - multiplatform build tool
#[derive(Debug, Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Project directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build tasks (all of them when no target is given)
    Build(BuildCommand),

    /// List the task graph
    Tasks(TasksCommand),

    /// Task cache management
    Cache(CacheCommand),

    /// Write a default project file
    Init(InitCommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(&self) -> anyhow::Result<()> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match &self.command {
            Commands::Build(cmd) => cmd.execute(self),
            Commands::Tasks(cmd) => cmd.execute(self),
            Commands::Cache(cmd) => cmd.execute(self),
            Commands::Init(cmd) => cmd.execute(self),
            Commands::Completions(cmd) => cmd.execute(self),
        }
    }

    /// Whether human-readable progress should be printed
    pub fn prints_text(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_flags() {
        let cli = Cli::try_parse_from([
            "keel", "-C", "/p", "--format", "json", "build", ":app:jarJvm", "jar", "-j", "3",
            "--no-cache", "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.directory, Some(PathBuf::from("/p")));
        match cli.command {
            Commands::Build(cmd) => {
                assert_eq!(cmd.targets, vec![":app:jarJvm", "jar"]);
                assert_eq!(cmd.jobs, Some(3));
                assert!(cmd.no_cache);
                assert!(cmd.dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["keel", "-v", "-q", "tasks"]).is_err());
    }
}
