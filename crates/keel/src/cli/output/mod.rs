//! Output formatting utilities

use std::time::Duration;

use console::{style, Style};
use keel_tasks::{TaskEvent, TaskReporter};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Duration in seconds with one decimal
pub fn seconds(duration: &Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// Live progress printed to the terminal
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { task, description } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(task).bold(),
                    if self.verbose {
                        style(format!("({})", description)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output {
                task,
                line,
                is_stderr,
            } => {
                if self.verbose {
                    let prefix = style(format!("[{}]", task)).dim();
                    if *is_stderr {
                        println!("    {} {}", prefix.red(), line);
                    } else {
                        println!("    {} {}", prefix, line);
                    }
                }
            }
            TaskEvent::Completed { task, duration } => {
                println!(
                    "  {} {} {}",
                    style("✓").green(),
                    style(task).green(),
                    style(seconds(duration)).dim()
                );
            }
            TaskEvent::UpToDate { task, .. } => {
                println!(
                    "  {} {} {}",
                    style("✓").cyan(),
                    style(task).cyan(),
                    style("(up to date)").dim()
                );
            }
            TaskEvent::Failed {
                task,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(task).red(),
                    style(seconds(duration)).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Poisoned { task, by } => {
                if self.verbose {
                    println!(
                        "  {} {} {}",
                        style("○").yellow(),
                        style(task).yellow(),
                        style(format!("(blocked by {})", by)).dim()
                    );
                }
            }
            TaskEvent::AllCompleted {
                total,
                completed,
                skipped,
                failed,
                poisoned,
                cancelled,
                duration,
            } => {
                println!();
                println!(
                    "  {} {} tasks: {} ran, {} up to date, {} failed, {} blocked, {} cancelled ({})",
                    if *failed == 0 && *cancelled == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    total,
                    completed,
                    skipped,
                    failed,
                    poisoned,
                    cancelled,
                    seconds(duration)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(&Duration::from_millis(1300)), "1.3s");
        assert_eq!(seconds(&Duration::from_secs(3)), "3.0s");
    }
}
