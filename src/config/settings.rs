//! Settings schema.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::{default_cache_dir, CacheStore, CacheStoreOptions, DuplicateKeyPolicy};
use crate::error::{FunnelError, Result};
use crate::metadata::MetadataStoreKind;
use crate::serializers::{DATASET_CHUNKED, DATASET_CONTAINER};
use crate::storage::{StorageLocation, StorageOptions};

/// On-disk format for cached datasets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFormat {
    /// One file per dataset.
    #[default]
    Container,
    /// One directory of chunk files per dataset.
    Chunked,
}

impl CacheFormat {
    /// Name of the serializer writing this format.
    pub fn serializer(&self) -> &'static str {
        match self {
            CacheFormat::Container => DATASET_CONTAINER,
            CacheFormat::Chunked => DATASET_CHUNKED,
        }
    }
}

impl std::fmt::Display for CacheFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheFormat::Container => write!(f, "container"),
            CacheFormat::Chunked => write!(f, "chunked"),
        }
    }
}

impl FromStr for CacheFormat {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container" => Ok(CacheFormat::Container),
            "chunked" => Ok(CacheFormat::Chunked),
            other => Err(FunnelError::validation(format!(
                "unknown cache format '{}' (expected container or chunked)",
                other
            ))),
        }
    }
}

/// Process-wide funnel settings.
///
/// ```yaml
/// cache_dir: /data/funnel
/// cache_format: chunked
/// on_duplicate_key: overwrite
/// metadata_store: sql
/// database_url: sqlite:////data/funnel/funnel.db
/// storage_options:
///   anon: "true"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root of the cache store: a path or a storage URI.
    pub cache_dir: String,
    pub cache_format: CacheFormat,
    pub storage_options: StorageOptions,
    pub readonly: bool,
    pub on_duplicate_key: DuplicateKeyPolicy,
    pub verify_checksums: bool,
    pub metadata_store: MetadataStoreKind,
    /// SQLite URL; defaults to `funnel.db` under a local `cache_dir`.
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir().to_string_lossy().into_owned(),
            cache_format: CacheFormat::default(),
            storage_options: StorageOptions::new(),
            readonly: false,
            on_duplicate_key: DuplicateKeyPolicy::default(),
            verify_checksums: true,
            metadata_store: MetadataStoreKind::default(),
            database_url: None,
        }
    }
}

impl Settings {
    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.trim().is_empty() {
            return Err(FunnelError::validation("cache_dir must not be empty"));
        }
        if self.metadata_store == MetadataStoreKind::Sql && self.database_url.is_none() {
            let local = !self.cache_dir.contains("://") || self.cache_dir.starts_with("file://");
            if !local {
                return Err(FunnelError::validation(format!(
                    "database_url is required for a sql metadata store over {}",
                    self.cache_dir
                )));
            }
        }
        Ok(())
    }

    /// Serializer for cached datasets.
    pub fn serializer(&self) -> &'static str {
        self.cache_format.serializer()
    }

    /// The configured database URL, or `funnel.db` inside a local cache dir.
    pub fn database_url(&self) -> Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }
        let location = StorageLocation::parse(&self.cache_dir)?;
        let path = PathBuf::from(location.path).join("funnel.db");
        Ok(format!("sqlite:///{}", path.display()))
    }

    /// Open the cache store these settings describe.
    pub fn open_cache_store(&self) -> Result<CacheStore> {
        self.validate()?;
        let options = CacheStoreOptions::default()
            .readonly(self.readonly)
            .on_duplicate_key(self.on_duplicate_key)
            .verify_checksums(self.verify_checksums)
            .storage_options(self.storage_options.clone());
        CacheStore::open(&self.cache_dir, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert!(settings.cache_dir.ends_with("funnel"));
        assert_eq!(settings.cache_format, CacheFormat::Container);
        assert_eq!(settings.on_duplicate_key, DuplicateKeyPolicy::Skip);
        assert_eq!(settings.metadata_store, MetadataStoreKind::Memory);
        assert!(settings.verify_checksums);
        assert!(!settings.readonly);
        assert_eq!(settings.serializer(), DATASET_CONTAINER);
    }

    #[test]
    fn database_url_defaults_under_cache_dir() {
        let settings = Settings {
            cache_dir: "/data/funnel".into(),
            ..Settings::default()
        };
        assert_eq!(
            settings.database_url().unwrap(),
            "sqlite:////data/funnel/funnel.db"
        );

        let settings = Settings {
            database_url: Some("sqlite:///other.db".into()),
            ..settings
        };
        assert_eq!(settings.database_url().unwrap(), "sqlite:///other.db");
    }

    #[test]
    fn database_url_expands_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let settings = Settings {
            cache_dir: "~/funnel-cache".into(),
            metadata_store: MetadataStoreKind::Sql,
            ..Settings::default()
        };
        let expected = home.join("funnel-cache").join("funnel.db");
        assert_eq!(
            settings.database_url().unwrap(),
            format!("sqlite:///{}", expected.display())
        );

        let settings = Settings {
            cache_dir: "file:///data/funnel".into(),
            ..settings
        };
        assert_eq!(
            settings.database_url().unwrap(),
            "sqlite:////data/funnel/funnel.db"
        );
    }

    #[test]
    fn sql_over_remote_storage_needs_database_url() {
        let settings = Settings {
            cache_dir: "memory://cache".into(),
            metadata_store: MetadataStoreKind::Sql,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn open_cache_store_uses_settings() {
        let temp = TempDir::new().unwrap();
        let settings = Settings {
            cache_dir: temp.path().to_string_lossy().into_owned(),
            on_duplicate_key: DuplicateKeyPolicy::Overwrite,
            ..Settings::default()
        };
        let store = settings.open_cache_store().unwrap();
        assert_eq!(store.on_duplicate_key(), DuplicateKeyPolicy::Overwrite);
        assert!(temp.path().join("funnel_metadata_store").is_dir());
    }

    #[test]
    fn cache_format_parses() {
        assert_eq!("chunked".parse::<CacheFormat>().unwrap(), CacheFormat::Chunked);
        assert_eq!(CacheFormat::Chunked.serializer(), DATASET_CHUNKED);
        assert!("netcdf".parse::<CacheFormat>().is_err());
    }
}
