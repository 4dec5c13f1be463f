//! Tasks command

use clap::Args;
use console::style;
use tracing::info;

use super::workspace::{select_targets, Workspace};
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// List the task graph
#[derive(Debug, Args)]
pub struct TasksCommand {
    /// Only show these targets and what they depend on
    pub targets: Vec<String>,

    /// Only list tasks of this action
    #[arg(long)]
    pub action: Option<String>,
}

impl TasksCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(targets = ?self.targets, action = ?self.action, "executing tasks command");
        let workspace = Workspace::load()?;
        let graph = select_targets(workspace.task_graph()?, &self.targets)?;

        let nodes: Vec<_> = graph
            .nodes()
            .filter(|n| self.action.is_none() || n.task.kind() == self.action.as_deref())
            .collect();

        if cli.format == OutputFormat::Json {
            let tasks: Vec<serde_json::Value> = nodes
                .iter()
                .map(|n| {
                    serde_json::json!({
                        "name": n.name.to_string(),
                        "action": n.task.kind(),
                        "wave": n.wave,
                        "description": n.task.description(),
                        "dependencies": n.dependencies.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&tasks)?);
            return Ok(());
        }

        if cli.quiet {
            for node in &nodes {
                println!("{}", node.name);
            }
            return Ok(());
        }

        println!(
            "{}",
            output::header(&format!(
                "{} ({} tasks)",
                workspace.config.name.as_deref().unwrap_or("tasks"),
                nodes.len()
            ))
        );
        println!();
        for node in &nodes {
            println!(
                "  {} {}",
                style(&node.name).bold(),
                style(format!("wave {}", node.wave)).dim()
            );
            if cli.verbose {
                println!("{}", output::key_value("runs", &node.task.description()));
            }
            for dep in &node.dependencies {
                println!("    {} {}", style("↳").dim(), dep);
            }
        }
        Ok(())
    }
}
