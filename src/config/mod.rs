//! Settings loading and validation for funnel.
//!
//! This module handles all aspects of configuration:
//! - The schema in [`settings`]
//! - File discovery and YAML parsing in [`loader`]
//! - `FUNNEL_*` environment overrides in [`env_layer`]
//!
//! # Example
//!
//! ```
//! use funnel::config::{load_settings_with, EnvLayer};
//! use std::fs;
//!
//! let temp = tempfile::TempDir::new().unwrap();
//! let path = temp.path().join("config.yml");
//! fs::write(&path, "cache_format: chunked\n").unwrap();
//!
//! let env = EnvLayer::from_vars("example", [("FUNNEL_READONLY", "true")]);
//! let settings = load_settings_with(Some(path.as_path()), &env).unwrap();
//! assert_eq!(settings.serializer(), "dataset.chunked");
//! assert!(settings.readonly);
//! ```

pub mod env_layer;
pub mod loader;
pub mod settings;

pub use env_layer::{EnvLayer, ENV_PREFIX};
pub use loader::{
    default_config_path, load_settings, load_settings_file, load_settings_with, parse_settings,
};
pub use settings::{CacheFormat, Settings};
