//! Searchable artifact indexes over a cache store.
//!
//! A [`MetadataStore`] delegates bytes to its [`CacheStore`] and keeps an
//! index of the [`Artifact`]s the cache store reports. The cache store alone
//! decides duplicate-key outcomes; an index records exactly what it is told.
//!
//! Three variants are provided:
//!
//! - [`MemoryMetadataStore`] - process-local index
//! - [`SqlMetadataStore`] - SQLite table `artifacts`, safe to share between
//!   processes
//! - [`CacheMetadataStore`] - no index of its own; reads the cache store's
//!   sidecars
//!
//! # Example
//!
//! ```
//! use funnel::cache::CacheStore;
//! use funnel::metadata::{MemoryMetadataStore, MetadataStore, MetadataStoreOptions};
//! use funnel::value::{CacheValue, Kwargs};
//! use serde_json::json;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache = CacheStore::new(dir.path().to_str().unwrap()).unwrap();
//! let store = MemoryMetadataStore::new(cache, MetadataStoreOptions::default());
//! store.put("foo", &json!({"a": 1}).into(), Default::default()).unwrap();
//! assert!(store.contains("foo").unwrap());
//! assert_eq!(
//!     store.get("foo", &Kwargs::new()).unwrap(),
//!     CacheValue::from(json!({"a": 1}))
//! );
//! ```

pub mod memory;
pub mod sidecar;
pub mod sql;
pub mod table;

pub use memory::MemoryMetadataStore;
pub use sidecar::CacheMetadataStore;
pub use sql::SqlMetadataStore;
pub use table::ArtifactTable;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{Artifact, CacheStore, GetOptions, PutOptions};
use crate::config::Settings;
use crate::error::{FunnelError, Result};
use crate::serializers::AUTO;
use crate::value::{CacheValue, Kwargs};

/// Store-level defaults shared by every metadata store.
#[derive(Debug, Clone)]
pub struct MetadataStoreOptions {
    /// A readonly index never records and never writes to the cache store.
    pub readonly: bool,
    /// Serializer used when a put asks for `"auto"`.
    pub serializer: String,
    /// Dump kwargs used when a put passes none.
    pub dump_kwargs: Kwargs,
    /// Load kwargs layered between the artifact's and the call's.
    pub load_kwargs: Kwargs,
}

impl Default for MetadataStoreOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            serializer: AUTO.to_string(),
            dump_kwargs: Kwargs::new(),
            load_kwargs: Kwargs::new(),
        }
    }
}

impl MetadataStoreOptions {
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = name.into();
        self
    }

    pub fn dump_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.dump_kwargs = kwargs;
        self
    }

    pub fn load_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.load_kwargs = kwargs;
        self
    }

    /// Fill the gaps of a put request with the store defaults.
    pub fn prepare_put(&self, mut options: PutOptions) -> PutOptions {
        if options.serializer == AUTO {
            options.serializer = self.serializer.clone();
        }
        if options.dump_kwargs.is_empty() {
            options.dump_kwargs = self.dump_kwargs.clone();
        }
        options
    }

    /// Store defaults overlaid by call-time kwargs, key by key.
    pub fn layer_load(&self, call: &Kwargs) -> Kwargs {
        let mut kwargs = self.load_kwargs.clone();
        kwargs.extend(call.clone());
        kwargs
    }
}

/// A searchable index of artifacts backed by a cache store.
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    /// The cache store holding the bytes.
    fn cache_store(&self) -> &CacheStore;

    fn options(&self) -> &MetadataStoreOptions;

    fn readonly(&self) -> bool {
        self.options().readonly
    }

    /// Store `value` through the cache store and record the resulting
    /// artifact. Returns `None` when nothing was stored.
    fn put(&self, key: &str, value: &CacheValue, options: PutOptions)
        -> Result<Option<Artifact>>;

    /// The recorded artifact for `key`.
    fn artifact(&self, key: &str) -> Result<Artifact>;

    /// Whether `key` is recorded.
    fn contains(&self, key: &str) -> Result<bool>;

    /// Every recorded artifact, in key order.
    fn artifacts(&self) -> Result<Vec<Artifact>>;

    /// Load the value recorded under `key`.
    ///
    /// Load kwargs resolve per key: call-time over store defaults over the
    /// artifact's own.
    fn get(&self, key: &str, load_kwargs: &Kwargs) -> Result<CacheValue> {
        let artifact = self.artifact(key)?;
        let options = GetOptions::new()
            .serializer(artifact.serializer)
            .load_kwargs(self.options().layer_load(load_kwargs));
        self.cache_store().get_with(key, options)
    }

    /// Artifacts whose custom fields equal every entry of `filter`.
    fn search(&self, filter: &Kwargs) -> Result<Vec<Artifact>> {
        Ok(self
            .artifacts()?
            .into_iter()
            .filter(|artifact| artifact.matches(filter))
            .collect())
    }

    /// Tabular view of every recorded artifact.
    fn as_table(&self) -> Result<ArtifactTable> {
        Ok(ArtifactTable::new(&self.artifacts()?))
    }
}

/// Which metadata store variant to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataStoreKind {
    #[default]
    Memory,
    Sql,
    /// Sidecars of the cache store serve as the index.
    Cache,
}

impl std::fmt::Display for MetadataStoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataStoreKind::Memory => write!(f, "memory"),
            MetadataStoreKind::Sql => write!(f, "sql"),
            MetadataStoreKind::Cache => write!(f, "cache"),
        }
    }
}

impl FromStr for MetadataStoreKind {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(MetadataStoreKind::Memory),
            "sql" => Ok(MetadataStoreKind::Sql),
            "cache" => Ok(MetadataStoreKind::Cache),
            other => Err(FunnelError::validation(format!(
                "unknown metadata store '{}' (expected memory, sql or cache)",
                other
            ))),
        }
    }
}

/// Build the cache store and metadata store described by `settings`.
pub fn open_metadata_store(settings: &Settings) -> Result<Arc<dyn MetadataStore>> {
    let cache = settings.open_cache_store()?;
    let options = MetadataStoreOptions::default().readonly(settings.readonly);
    tracing::debug!(
        "Opening {} metadata store over {}",
        settings.metadata_store,
        cache.location()
    );
    let store: Arc<dyn MetadataStore> = match settings.metadata_store {
        MetadataStoreKind::Memory => Arc::new(MemoryMetadataStore::new(cache, options)),
        MetadataStoreKind::Sql => Arc::new(SqlMetadataStore::open(
            &settings.database_url()?,
            cache,
            options,
        )?),
        MetadataStoreKind::Cache => Arc::new(CacheMetadataStore::new(cache, options)),
    };
    Ok(store)
}
