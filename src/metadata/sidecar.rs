//! Metadata store indexed by the cache store's own sidecars.
//!
//! No separate index exists: every lookup reads the `.artifact.json`
//! sidecars, so any process sharing the cache location sees the same
//! artifacts without a database.

use super::{MetadataStore, MetadataStoreOptions};
use crate::cache::{Artifact, CacheStore, PutOptions};
use crate::error::Result;
use crate::value::CacheValue;

/// Metadata store using the cache store as its database.
#[derive(Debug)]
pub struct CacheMetadataStore {
    cache_store: CacheStore,
    options: MetadataStoreOptions,
}

impl CacheMetadataStore {
    pub fn new(cache_store: CacheStore, options: MetadataStoreOptions) -> Self {
        Self {
            cache_store,
            options,
        }
    }
}

impl MetadataStore for CacheMetadataStore {
    fn cache_store(&self) -> &CacheStore {
        &self.cache_store
    }

    fn options(&self) -> &MetadataStoreOptions {
        &self.options
    }

    fn put(&self, key: &str, value: &CacheValue, options: PutOptions) -> Result<Option<Artifact>> {
        if self.options.readonly {
            tracing::debug!("Metadata store is readonly, not storing '{}'", key);
            return Ok(None);
        }
        self.cache_store
            .put_with(key, value, self.options.prepare_put(options))
    }

    fn artifact(&self, key: &str) -> Result<Artifact> {
        self.cache_store.artifact(key)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        self.cache_store.contains(key)
    }

    fn artifacts(&self) -> Result<Vec<Artifact>> {
        self.cache_store.artifacts()
    }
}
