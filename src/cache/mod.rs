//! Key/value cache store.
//!
//! A [`CacheStore`] serializes values under string keys on a storage
//! backend and records an [`Artifact`] sidecar for every key. What happens
//! when a key is written twice is decided by the store's
//! [`DuplicateKeyPolicy`].
//!
//! # Example
//!
//! ```
//! use funnel::cache::CacheStore;
//! use funnel::value::CacheValue;
//! use serde_json::json;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = CacheStore::new(dir.path().to_str().unwrap()).unwrap();
//! store.put("foo", &json!([1, 2, 3]).into()).unwrap();
//! assert_eq!(store.keys().unwrap(), vec!["foo"]);
//! assert_eq!(store.get("foo").unwrap(), CacheValue::from(json!([1, 2, 3])));
//! ```

pub mod artifact;
pub mod store;

pub use artifact::{Artifact, DuplicateKeyPolicy};
pub use store::{
    validate_key, CacheStore, CacheStoreOptions, GetOptions, PutOptions, ARTIFACT_SUFFIX,
    METADATA_PREFIX,
};

/// Default root for on-disk cache stores.
pub fn default_cache_dir() -> std::path::PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("funnel")
}
