//! Settings file discovery and loading.
//!
//! Settings are layered, later layers overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. The settings file (`~/.config/funnel/config.yml`, or an explicit path)
//! 3. `FUNNEL_*` environment variables

use std::fs;
use std::path::{Path, PathBuf};

use super::env_layer::EnvLayer;
use super::settings::Settings;
use crate::error::{FunnelError, Result};

/// Location of the user's settings file, whether or not it exists.
pub fn default_config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("funnel").join("config.yml"))
}

/// Parse YAML settings.
///
/// An empty document yields the defaults; unknown fields are rejected.
pub fn parse_settings(content: &str, source_path: &Path) -> Result<Settings> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(content).map_err(|e| FunnelError::ConfigParse {
        path: source_path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load one settings file.
pub fn load_settings_file(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FunnelError::not_found("settings file", path.display().to_string())
        } else {
            FunnelError::Io(e)
        }
    })?;
    parse_settings(&content, path)
}

/// Resolve settings from a file and an environment layer.
///
/// An explicit `path` must exist; the default location is optional.
pub fn load_settings_with(path: Option<&Path>, env: &EnvLayer) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => load_settings_file(path)?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!("Loading settings from {}", path.display());
                load_settings_file(&path)?
            }
            None => Settings::default(),
        },
    };
    env.apply(&mut settings)?;
    settings.validate()?;
    Ok(settings)
}

/// Resolve settings from `path` (or the default location) and the process
/// environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    load_settings_with(path, &EnvLayer::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DuplicateKeyPolicy;
    use crate::config::CacheFormat;
    use tempfile::TempDir;

    #[test]
    fn parse_full_file() {
        let settings = parse_settings(
            r#"
cache_dir: /data/funnel
cache_format: chunked
on_duplicate_key: check_collision
verify_checksums: false
storage_options:
  anon: "true"
"#,
            Path::new("config.yml"),
        )
        .unwrap();

        assert_eq!(settings.cache_dir, "/data/funnel");
        assert_eq!(settings.cache_format, CacheFormat::Chunked);
        assert_eq!(settings.on_duplicate_key, DuplicateKeyPolicy::CheckCollision);
        assert!(!settings.verify_checksums);
        assert_eq!(settings.storage_options["anon"], "true");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = parse_settings("readonly: true\n", Path::new("config.yml")).unwrap();
        assert!(settings.readonly);
        assert_eq!(settings.cache_dir, Settings::default().cache_dir);
    }

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(
            parse_settings("\n", Path::new("config.yml")).unwrap(),
            Settings::default()
        );
    }

    #[test]
    fn invalid_yaml_names_the_file() {
        let err = parse_settings("cache_format: netcdf\n", Path::new("/etc/funnel.yml")).unwrap_err();
        assert!(matches!(err, FunnelError::ConfigParse { .. }));
        assert!(err.to_string().contains("/etc/funnel.yml"));

        let err = parse_settings("metadata_store: 5\n", Path::new("x.yml")).unwrap_err();
        assert!(matches!(err, FunnelError::ConfigParse { .. }));

        let err = parse_settings("cache_size: 5\n", Path::new("x.yml")).unwrap_err();
        assert!(err.to_string().contains("cache_size"));
    }

    #[test]
    fn explicit_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.yml");
        let err = load_settings_with(Some(missing.as_path()), &EnvLayer::default()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn environment_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        fs::write(&path, "cache_dir: /from/file\non_duplicate_key: overwrite\n").unwrap();

        let env = EnvLayer::from_vars("test", [("FUNNEL_CACHE_DIR", "/from/env")]);
        let settings = load_settings_with(Some(path.as_path()), &env).unwrap();

        assert_eq!(settings.cache_dir, "/from/env");
        assert_eq!(settings.on_duplicate_key, DuplicateKeyPolicy::Overwrite);
    }
}
