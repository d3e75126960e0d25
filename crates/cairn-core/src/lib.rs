//! Cairn Core - Shared foundations for the cairn build engine
//!
//! This crate provides the configuration system, the error taxonomy shared by
//! the engine and the command-line front end, and small value types such as
//! task priorities.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    find_config, load_config, load_config_from_dir, load_config_or_default, project_root, Config,
    EngineConfig, StateConfig, TaskConfig,
};
pub use error::{CairnError, ConfigError, Result};
pub use types::Priority;
