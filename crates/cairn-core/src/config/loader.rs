//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    validate_config(&config)?;
    debug!(path = %path.display(), tasks = config.tasks.len(), "config loaded and validated");
    Ok(config)
}

/// Find configuration file in directory or parent directories.
///
/// The first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<(Config, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

/// Load configuration or use defaults.
///
/// Only a missing file falls back to defaults; a file that exists but fails to
/// parse or validate is reported as an error.
pub fn load_config_or_default(dir: &Path) -> Result<(Config, Option<PathBuf>)> {
    match find_config(dir) {
        Some(path) => {
            let config = load_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            warn!(dir = %dir.display(), "no config found, using defaults");
            Ok((Config::default(), None))
        }
    }
}

/// The project root that owns a config file: its parent directory
pub fn project_root(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("cairn.toml");
        std::fs::write(&config_path, "[engine]\nconcurrency = 2").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_toml_over_yaml() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("cairn.toml");
        let yaml_path = temp.path().join("cairn.yaml");
        std::fs::write(&toml_path, "[engine]\nconcurrency = 2").unwrap();
        std::fs::write(&yaml_path, "engine:\n  concurrency: 3").unwrap();

        let found = find_config(temp.path()).unwrap();
        assert_eq!(found, toml_path);
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let config_path = temp.path().join("cairn.toml");
        std::fs::write(&config_path, "").unwrap();

        let found = find_config(&nested).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_load_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("cairn.toml");
        std::fs::write(
            &config_path,
            "[engine]\nconcurrency = 2\n\n[[tasks]]\nid = \"a\"\ncommand = \"true\"\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.engine.concurrency, 2);
        assert_eq!(config.tasks[0].id, "a");
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("cairn.yaml");
        std::fs::write(
            &config_path,
            "engine:\n  max_failures: 1\ntasks:\n  - id: a\n    command: \"true\"\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.engine.max_failures, Some(1));
    }

    #[test]
    fn test_load_config_or_default_rejects_invalid_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("cairn.toml"), "[engine]\nconcurrency = 0\n").unwrap();

        assert!(load_config_or_default(temp.path()).is_err());
    }

    #[test]
    fn test_project_root() {
        assert_eq!(project_root(Path::new("cairn.toml")), PathBuf::from("."));
        assert_eq!(
            project_root(Path::new("proj/cairn.toml")),
            PathBuf::from("proj")
        );
    }
}
