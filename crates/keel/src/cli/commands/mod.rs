//! CLI commands

mod build;
mod cache;
mod completions;
mod init;
mod tasks;
mod workspace;

pub use build::BuildCommand;
pub use cache::CacheCommand;
pub use completions::CompletionsCommand;
pub use init::InitCommand;
pub use tasks::TasksCommand;
