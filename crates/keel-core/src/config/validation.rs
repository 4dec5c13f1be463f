//! Configuration validation

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::model::Project;

use super::types::{ActionConfig, Config, OutputKind};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid name pattern")
    })
}

/// Check a module or action name against the allowed character set
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_build(config)?;
    validate_modules(config)?;
    validate_actions(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_build(config: &Config) -> Result<()> {
    if config.build.output_dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "build.output_dir".to_string(),
            message: "output directory cannot be empty".to_string(),
        }
        .into());
    }

    if config.build.task_timeout_secs == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "build.task_timeout_secs".to_string(),
            message: "timeout must be greater than zero".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_modules(config: &Config) -> Result<()> {
    if !config.modules.is_empty() {
        debug!(count = config.modules.len(), "validating modules");
    }
    for (i, module) in config.modules.iter().enumerate() {
        if !is_valid_name(&module.name) {
            return Err(ConfigError::InvalidValue {
                field: format!("modules[{}].name", i),
                message: format!("'{}' is not a valid module name", module.name),
            }
            .into());
        }

        if module.platforms.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("modules[{}].platforms", i),
                message: format!("module '{}' must declare at least one platform", module.name),
            }
            .into());
        }
    }

    Project::check_modules(&config.modules)?;
    Ok(())
}

fn validate_actions(config: &Config) -> Result<()> {
    let mut by_name: HashMap<&str, &ActionConfig> = HashMap::new();
    for (i, action) in config.actions.iter().enumerate() {
        if !is_valid_name(&action.name) {
            return Err(ConfigError::InvalidValue {
                field: format!("actions[{}].name", i),
                message: format!("'{}' is not a valid action name", action.name),
            }
            .into());
        }
        if by_name.insert(action.name.as_str(), action).is_some() {
            return Err(ConfigError::InvalidValue {
                field: format!("actions[{}].name", i),
                message: format!("action '{}' is declared more than once", action.name),
            }
            .into());
        }

        match (action.output, &action.command) {
            (OutputKind::Classpath, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    field: format!("actions[{}].command", i),
                    message: "classpath actions are built in and take no command".to_string(),
                }
                .into());
            }
            (OutputKind::Classpath, None) | (_, Some(_)) => {}
            (_, None) => {
                return Err(ConfigError::MissingField(format!("actions[{}].command", i)).into());
            }
        }

        if action.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: format!("actions[{}].timeout_secs", i),
                message: "timeout must be greater than zero".to_string(),
            }
            .into());
        }
    }

    for (i, action) in config.actions.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &action.depends_on {
            let Some(peer) = by_name.get(dep.as_str()) else {
                return Err(ConfigError::InvalidValue {
                    field: format!("actions[{}].depends_on", i),
                    message: format!("unknown action '{}'", dep),
                }
                .into());
            };
            if !seen.insert(dep.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("actions[{}].depends_on", i),
                    message: format!("action '{}' is listed twice", dep),
                }
                .into());
            }
            // A cell without a build type cannot pick one of the peer's variants
            if peer.build_types && !action.build_types {
                return Err(ConfigError::InvalidValue {
                    field: format!("actions[{}].depends_on", i),
                    message: format!(
                        "'{}' is not expanded over build types but depends on '{}' which is",
                        action.name, dep
                    ),
                }
                .into());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Module, Platform, ProductType};

    fn config_with_module() -> Config {
        Config {
            modules: vec![Module::new("core", ProductType::Lib).with_platforms([Platform::Jvm])],
            ..Config::default()
        }
    }

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("core"));
        assert!(is_valid_name("shared-ui.v2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(":core"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name("-lead"));
    }

    #[test]
    fn test_validate_module_without_platforms() {
        let mut config = Config::default();
        config.modules.push(Module::new("core", ProductType::Lib));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_unknown_module_dependency() {
        let mut config = config_with_module();
        config.modules.push(
            Module::new("app", ProductType::JvmApp)
                .with_platforms([Platform::Jvm])
                .with_dependency("nope", Default::default()),
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_action_without_command() {
        let mut config = config_with_module();
        config.actions.push(ActionConfig::new("compile"));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_classpath_action_without_command() {
        let mut config = config_with_module();
        config
            .actions
            .push(ActionConfig::new("runtimeClasspath").with_output(OutputKind::Classpath));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_unknown_depends_on() {
        let mut config = config_with_module();
        config
            .actions
            .push(ActionConfig::new("jar").with_command("true").with_depends_on("compile"));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_duplicate_action() {
        let mut config = config_with_module();
        config.actions.push(ActionConfig::new("compile").with_command("true"));
        config.actions.push(ActionConfig::new("compile").with_command("true"));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_build_type_mismatch() {
        let mut config = config_with_module();
        config.actions.push(
            ActionConfig::new("compile")
                .with_command("true")
                .with_build_types(true),
        );
        config
            .actions
            .push(ActionConfig::new("lint").with_command("true").with_depends_on("compile"));
        assert!(validate_config(&config).is_err());
    }
}
