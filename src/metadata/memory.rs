//! In-memory metadata store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{MetadataStore, MetadataStoreOptions};
use crate::cache::{Artifact, CacheStore, PutOptions};
use crate::error::{FunnelError, Result};
use crate::value::CacheValue;

/// Metadata store keeping its index in process memory.
#[derive(Debug)]
pub struct MemoryMetadataStore {
    cache_store: CacheStore,
    options: MetadataStoreOptions,
    index: RwLock<BTreeMap<String, Artifact>>,
}

impl MemoryMetadataStore {
    pub fn new(cache_store: CacheStore, options: MetadataStoreOptions) -> Self {
        Self {
            cache_store,
            options,
            index: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of recorded artifacts.
    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_index().is_empty()
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Artifact>> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn cache_store(&self) -> &CacheStore {
        &self.cache_store
    }

    fn options(&self) -> &MetadataStoreOptions {
        &self.options
    }

    fn put(&self, key: &str, value: &CacheValue, options: PutOptions) -> Result<Option<Artifact>> {
        if self.options.readonly {
            tracing::debug!("Metadata store is readonly, not recording '{}'", key);
            return Ok(None);
        }
        let artifact = self
            .cache_store
            .put_with(key, value, self.options.prepare_put(options))?;
        if let Some(artifact) = &artifact {
            self.index
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key.to_string(), artifact.clone());
        }
        Ok(artifact)
    }

    fn artifact(&self, key: &str) -> Result<Artifact> {
        self.read_index()
            .get(key)
            .cloned()
            .ok_or_else(|| FunnelError::not_found("key", key))
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read_index().contains_key(key))
    }

    fn artifacts(&self) -> Result<Vec<Artifact>> {
        Ok(self.read_index().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStoreOptions, DuplicateKeyPolicy};
    use crate::storage::MemoryBackend;
    use crate::value::Kwargs;
    use serde_json::json;
    use std::sync::Arc;

    fn store(policy: DuplicateKeyPolicy) -> MemoryMetadataStore {
        let cache = CacheStore::open(
            "memory://meta",
            CacheStoreOptions::default()
                .on_duplicate_key(policy)
                .backend(Arc::new(MemoryBackend::new())),
        )
        .unwrap();
        MemoryMetadataStore::new(cache, MetadataStoreOptions::default())
    }

    #[test]
    fn put_records_artifact() {
        let store = store(DuplicateKeyPolicy::Skip);
        let artifact = store
            .put("foo", &json!([1, 2]).into(), PutOptions::new())
            .unwrap()
            .unwrap();

        assert_eq!(store.artifact("foo").unwrap(), artifact);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("foo", &Kwargs::new()).unwrap(),
            CacheValue::from(json!([1, 2]))
        );
    }

    #[test]
    fn skip_records_existing_artifact() {
        let store = store(DuplicateKeyPolicy::Skip);
        let first = store.put("k", &json!(1).into(), PutOptions::new()).unwrap();
        let second = store.put("k", &json!(2).into(), PutOptions::new()).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get("k", &Kwargs::new()).unwrap(), CacheValue::from(json!(1)));
    }

    #[test]
    fn overwrite_records_new_artifact() {
        let store = store(DuplicateKeyPolicy::Overwrite);
        store.put("k", &json!(1).into(), PutOptions::new()).unwrap();
        let second = store
            .put("k", &json!(2).into(), PutOptions::new())
            .unwrap()
            .unwrap();

        assert_eq!(store.artifact("k").unwrap(), second);
        assert_eq!(store.get("k", &Kwargs::new()).unwrap(), CacheValue::from(json!(2)));
    }

    #[test]
    fn unrecorded_key_is_not_found() {
        let store = store(DuplicateKeyPolicy::Skip);
        assert!(!store.contains("nope").unwrap());
        assert!(store.get("nope", &Kwargs::new()).unwrap_err().is_not_found());
    }

    #[test]
    fn search_filters_on_custom_fields() {
        let store = store(DuplicateKeyPolicy::Skip);
        for (key, variable) in [("a", "TEMP"), ("b", "SALT"), ("c", "TEMP")] {
            let mut fields = Kwargs::new();
            fields.insert("variable".into(), json!(variable));
            store
                .put(key, &json!(key).into(), PutOptions::new().custom_fields(fields))
                .unwrap();
        }

        let mut filter = Kwargs::new();
        filter.insert("variable".into(), json!("TEMP"));
        let keys: Vec<String> = store
            .search(&filter)
            .unwrap()
            .into_iter()
            .map(|a| a.key)
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(store.as_table().unwrap().len(), 3);
    }

    #[test]
    fn readonly_store_records_nothing() {
        let cache = CacheStore::open(
            "memory://meta",
            CacheStoreOptions::default().backend(Arc::new(MemoryBackend::new())),
        )
        .unwrap();
        let store = MemoryMetadataStore::new(cache, MetadataStoreOptions::default().readonly(true));

        assert!(store.put("k", &json!(1).into(), PutOptions::new()).unwrap().is_none());
        assert!(store.is_empty());
        assert!(!store.cache_store().contains("k").unwrap());
    }
}
