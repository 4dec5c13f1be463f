//! Init command

use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use tracing::info;

use keel_core::config::defaults::{DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_YAML};
use keel_core::config::{find_config, Config};

use crate::cli::output;
use crate::cli::Cli;

/// Write a default project file
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Overwrite an existing project file
    #[arg(short, long)]
    pub force: bool,

    /// Project file format
    #[arg(long = "config-format", value_enum, default_value = "toml")]
    pub config_format: ConfigFormat,
}

/// Format of the generated project file
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    fn file_name(&self) -> &'static str {
        match self {
            Self::Toml => DEFAULT_CONFIG_TOML,
            Self::Yaml => DEFAULT_CONFIG_YAML,
        }
    }
}

impl InitCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, format = ?self.config_format, "executing init command");
        let cwd = std::env::current_dir()?;
        let path = write_default_config(&cwd, self.config_format, self.force)?;

        if !cli.quiet {
            output::success(&format!(
                "Created project file at {}",
                output::path_style().apply_to(path.display())
            ));
            println!();
            println!("Next steps:");
            println!("  1. Describe your modules and actions in {}", path.display());
            println!("  2. Run {} to inspect the task graph", output::path_style().apply_to("keel tasks"));
            println!("  3. Run {} to build", output::path_style().apply_to("keel build"));
        }
        Ok(())
    }
}

/// Write the default project file into `dir`, returning its path
fn write_default_config(dir: &Path, format: ConfigFormat, force: bool) -> anyhow::Result<PathBuf> {
    let path = dir.join(format.file_name());
    if !force {
        if let Some(existing) = find_config(dir).filter(|p| p.parent() == Some(dir)) {
            anyhow::bail!(
                "Project file already exists at {}. Use --force to overwrite.",
                existing.display()
            );
        }
    }

    let content = match format {
        ConfigFormat::Toml => DEFAULT_CONFIG_TEMPLATE.to_string(),
        ConfigFormat::Yaml => {
            let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE)?;
            format!("# keel project configuration\n{}", serde_yaml::to_string(&config)?)
        }
    };

    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::config::load_config;
    use tempfile::TempDir;

    #[test]
    fn test_writes_loadable_toml() {
        let temp = TempDir::new().unwrap();
        let path = write_default_config(temp.path(), ConfigFormat::Toml, false).unwrap();
        assert_eq!(path, temp.path().join("keel.toml"));
        let config = load_config(&path).unwrap();
        assert_eq!(config.actions.len(), 3);
    }

    #[test]
    fn test_writes_loadable_yaml() {
        let temp = TempDir::new().unwrap();
        let path = write_default_config(temp.path(), ConfigFormat::Yaml, false).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.modules.len(), 2);
    }

    #[test]
    fn test_refuses_overwrite_without_force() {
        let temp = TempDir::new().unwrap();
        write_default_config(temp.path(), ConfigFormat::Toml, false).unwrap();
        assert!(write_default_config(temp.path(), ConfigFormat::Yaml, false).is_err());
        assert!(write_default_config(temp.path(), ConfigFormat::Toml, true).is_ok());
    }
}
