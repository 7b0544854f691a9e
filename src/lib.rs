//! funnel - a content-addressable cache for expensive-to-compute datasets.
//!
//! Values are written under caller-chosen keys through pluggable
//! serializers, described by sidecar metadata, and indexed by a searchable
//! metadata store. On top of that, a [`collection::Collection`] caches the
//! output of catalog queries run through operator chains, keyed by the hash
//! of the recipe that produced them.
//!
//! # Modules
//!
//! - [`cache`] - The cache store, artifacts and duplicate-key policies
//! - [`collection`] - Catalog-backed collections and recipe keys
//! - [`config`] - Settings loading and validation
//! - [`derived`] - Derived variables and query-dependent operators
//! - [`error`] - Error types and result aliases
//! - [`logging`] - Tracing subscriber setup
//! - [`metadata`] - Memory and SQL metadata stores
//! - [`serializers`] - Serializer registry and built-in formats
//! - [`storage`] - Storage backends (local disk, in-memory)
//! - [`value`] - Cacheable values and the in-memory dataset model
//!
//! # Example
//!
//! ```
//! use funnel::cache::CacheStore;
//! use funnel::value::CacheValue;
//! use serde_json::json;
//!
//! let store = CacheStore::new("memory://lib-example").unwrap();
//! store.put("foo", &json!([1, 2, 3]).into()).unwrap();
//! assert_eq!(store.keys().unwrap(), vec!["foo"]);
//! assert_eq!(store.get("foo").unwrap(), CacheValue::from(json!([1, 2, 3])));
//! ```

pub mod cache;
pub mod collection;
pub mod config;
pub mod derived;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod serializers;
pub mod storage;
pub mod value;

pub use error::{FunnelError, Result};
