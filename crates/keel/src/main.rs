//! Keel - multiplatform build tool

mod cli;
mod exit_codes;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use keel_core::BuildContext;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cli::{output, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli);

    match cli.execute() {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err(e) => {
            let code = exit_codes::for_error(&e);
            if code != exit_codes::CANCELLED {
                output::error(&format!("{:#}", e));
            }
            ExitCode::from(code)
        }
    }
}

/// Set up tracing with two layers:
/// - Console: RUST_LOG, else `info` with --verbose, `error` with --quiet, `warn` otherwise
/// - File: debug-level JSON in the project's logs root when a project file is found
fn init_tracing(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(log_dir) = log_directory(cli.directory.as_deref()) {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "keel.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_filter(console_filter),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_filter(EnvFilter::new("debug")),
            )
            .init();

        return Some(guard);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    None
}

/// Log directory of the enclosing project, created if needed
fn log_directory(directory: Option<&Path>) -> Option<PathBuf> {
    let start = match directory {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().ok()?,
    };
    let config_path = keel_core::config::find_config(&start)?;
    let root = keel_core::config::project_root_of(&config_path);
    let context = match keel_core::config::load_config(&config_path) {
        Ok(config) => BuildContext::from_config(root, &config),
        Err(_) => BuildContext::new(root),
    };
    let log_dir = context.logs_root();
    std::fs::create_dir_all(&log_dir).ok()?;
    Some(log_dir)
}
