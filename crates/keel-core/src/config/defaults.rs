//! Default configuration values

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "keel.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "keel.yaml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".keel.toml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ALT_CONFIG_FILE,
        ".keel.yaml",
    ]
}

/// Generate default configuration YAML
pub fn default_config_yaml() -> String {
    let config = Config::default();
    serde_yaml::to_string(&config).unwrap_or_default()
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# keel project configuration

name = "my-project"

[build]
# 0 = use all available cores
concurrency = 0
output_dir = "build"

[cache]
enabled = true
dir = ".keel/cache"

[[modules]]
name = "core"
type = "lib"
platforms = ["jvm"]

[[modules]]
name = "app"
type = "jvm-app"
platforms = ["jvm"]
dependencies = [{ module = "core" }]

[[actions]]
name = "compile"
command = "javac -d {output} $(find src -name '*.java')"
output = "classes"
inputs = ["src/**/*.java"]
module_dependencies = "compile"
tests = true

[[actions]]
name = "jar"
command = "jar cf {output}/{module}.jar -C $KEEL_DEPENDENCY_OUTPUTS ."
output = "jar"
depends_on = ["compile"]

[[actions]]
name = "runtimeClasspath"
output = "classpath"
depends_on = ["jar"]
module_dependencies = "runtime"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_and_validates() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.actions.len(), 3);
        crate::config::validate_config(&config).unwrap();
    }

    #[test]
    fn test_default_yaml_roundtrips() {
        let yaml = default_config_yaml();
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.modules.is_empty());
    }
}
