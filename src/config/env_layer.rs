//! `FUNNEL_*` environment overrides.
//!
//! Each recognized variable overrides one settings field:
//!
//! | Variable                   | Field              |
//! |----------------------------|--------------------|
//! | `FUNNEL_CACHE_DIR`         | `cache_dir`        |
//! | `FUNNEL_CACHE_FORMAT`      | `cache_format`     |
//! | `FUNNEL_READONLY`          | `readonly`         |
//! | `FUNNEL_ON_DUPLICATE_KEY`  | `on_duplicate_key` |
//! | `FUNNEL_VERIFY_CHECKSUMS`  | `verify_checksums` |
//! | `FUNNEL_METADATA_STORE`    | `metadata_store`   |
//! | `FUNNEL_DATABASE_URL`      | `database_url`     |
//! | `FUNNEL_STORAGE_OPTION_<K>`| `storage_options[k]` |

use std::collections::BTreeMap;

use super::settings::Settings;
use crate::error::{FunnelError, Result};

/// Prefix shared by every recognized variable.
pub const ENV_PREFIX: &str = "FUNNEL_";
const STORAGE_OPTION_PREFIX: &str = "STORAGE_OPTION_";

/// A layer of `FUNNEL_*` variables with the source they came from.
///
/// ```
/// use funnel::config::{EnvLayer, Settings};
///
/// let mut layer = EnvLayer::new("test");
/// layer.set("FUNNEL_READONLY", "true");
/// layer.set("PATH", "/usr/bin");
///
/// let mut settings = Settings::default();
/// layer.apply(&mut settings).unwrap();
/// assert!(settings.readonly);
/// assert_eq!(layer.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnvLayer {
    /// Recognized variables, prefix stripped.
    pub vars: BTreeMap<String, String>,
    /// Where the variables came from (for debugging).
    pub source: String,
}

impl EnvLayer {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            vars: BTreeMap::new(),
            source: source.into(),
        }
    }

    /// Capture the `FUNNEL_*` variables of the current process.
    pub fn from_env() -> Self {
        Self::from_vars("process environment", std::env::vars())
    }

    /// Build a layer from arbitrary name/value pairs, keeping only
    /// `FUNNEL_*` names.
    pub fn from_vars<I, K, V>(source: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut layer = Self::new(source);
        for (key, value) in vars {
            layer.set(key, value);
        }
        layer
    }

    /// Add a variable; names without the `FUNNEL_` prefix are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(name) = key.strip_prefix(ENV_PREFIX) {
            self.vars.insert(name.to_string(), value.into());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars
            .contains_key(key.strip_prefix(ENV_PREFIX).unwrap_or(key))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Override `settings` with every variable in this layer.
    ///
    /// Unknown `FUNNEL_*` names and unparsable values are errors.
    pub fn apply(&self, settings: &mut Settings) -> Result<()> {
        for (name, value) in &self.vars {
            let invalid = |expected: &str| {
                FunnelError::validation(format!(
                    "{}{}={:?} from {}: expected {}",
                    ENV_PREFIX, name, value, self.source, expected
                ))
            };
            match name.as_str() {
                "CACHE_DIR" => settings.cache_dir = value.clone(),
                "CACHE_FORMAT" => settings.cache_format = value.parse()?,
                "READONLY" => settings.readonly = parse_bool(value).ok_or_else(|| invalid("a boolean"))?,
                "ON_DUPLICATE_KEY" => settings.on_duplicate_key = value.parse()?,
                "VERIFY_CHECKSUMS" => {
                    settings.verify_checksums =
                        parse_bool(value).ok_or_else(|| invalid("a boolean"))?
                }
                "METADATA_STORE" => settings.metadata_store = value.parse()?,
                "DATABASE_URL" => settings.database_url = Some(value.clone()),
                other => match other.strip_prefix(STORAGE_OPTION_PREFIX) {
                    Some(option) if !option.is_empty() => {
                        settings
                            .storage_options
                            .insert(option.to_ascii_lowercase(), value.clone());
                    }
                    _ => return Err(invalid("a known funnel setting")),
                },
            }
            tracing::debug!("Setting {}{} from {}", ENV_PREFIX, name, self.source);
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
