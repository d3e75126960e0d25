//! Default configuration values

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "cairn.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "cairn.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".cairn.toml",
        ".cairn.yaml",
    ]
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# cairn configuration

[engine]
concurrency = 4
force = false
dry_run = false

[state]
dir = ".cairn"
lockfile = "cairn.lock"
compaction_interval = 64

# [[tasks]]
# id = "compile"
# command = "cc -o out/app src/main.c"
# depends_on = ["src/main.c"]
# produces = ["out/app"]
"#;
