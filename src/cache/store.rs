//! Cache store implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::artifact::{Artifact, DuplicateKeyPolicy};
use crate::error::{FunnelError, Result};
use crate::serializers::{Serializer, SerializerRegistry, AUTO};
use crate::storage::{self, Backend, StorageLocation, StorageOptions};
use crate::value::{CacheValue, Kwargs};

/// Subdirectory of the store root holding artifact sidecars.
pub const METADATA_PREFIX: &str = "funnel_metadata_store";
/// Suffix of every sidecar file.
pub const ARTIFACT_SUFFIX: &str = ".artifact.json";
/// Scratch subdirectory where values are dumped before being moved into place.
pub const STAGING_PREFIX: &str = ".funnel-staging";

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

fn scratch_name() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Check that `key` names a location inside the store.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(FunnelError::validation("cache key must not be empty"));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(FunnelError::validation(format!(
                "cache key '{}' has an empty or relative path segment",
                key
            )));
        }
    }
    let first = key.split('/').next().unwrap_or(key);
    if first == METADATA_PREFIX || first == STAGING_PREFIX {
        return Err(FunnelError::validation(format!(
            "cache key '{}' uses the reserved prefix '{}'",
            key, first
        )));
    }
    Ok(())
}

/// Construction options for a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheStoreOptions {
    /// Passed to the storage backend.
    pub storage_options: StorageOptions,
    /// A readonly store never writes; `put` becomes a no-op.
    pub readonly: bool,
    pub on_duplicate_key: DuplicateKeyPolicy,
    pub serializers: Arc<SerializerRegistry>,
    /// Verify the recorded checksum before every load.
    pub verify_checksums: bool,
    /// Use this backend instead of the one named by the URI scheme.
    pub backend: Option<Arc<dyn Backend>>,
}

impl Default for CacheStoreOptions {
    fn default() -> Self {
        Self {
            storage_options: StorageOptions::new(),
            readonly: false,
            on_duplicate_key: DuplicateKeyPolicy::default(),
            serializers: SerializerRegistry::global(),
            verify_checksums: true,
            backend: None,
        }
    }
}

impl CacheStoreOptions {
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn on_duplicate_key(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.on_duplicate_key = policy;
        self
    }

    pub fn serializers(mut self, registry: Arc<SerializerRegistry>) -> Self {
        self.serializers = registry;
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn storage_options(mut self, options: StorageOptions) -> Self {
        self.storage_options = options;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

/// Per-call options for [`CacheStore::put_with`].
#[derive(Debug, Clone)]
pub struct PutOptions {
    /// Serializer name, or `"auto"` to dispatch on the value.
    pub serializer: String,
    pub dump_kwargs: Kwargs,
    /// Recorded on the artifact and applied on every later load.
    pub load_kwargs: Kwargs,
    pub custom_fields: Kwargs,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            serializer: AUTO.to_string(),
            dump_kwargs: Kwargs::new(),
            load_kwargs: Kwargs::new(),
            custom_fields: Kwargs::new(),
        }
    }
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
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

    pub fn custom_fields(mut self, fields: Kwargs) -> Self {
        self.custom_fields = fields;
        self
    }
}

/// Per-call options for [`CacheStore::get_with`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Load with this serializer instead of the recorded one.
    pub serializer: Option<String>,
    /// Overlaid key by key on the artifact's load kwargs.
    pub load_kwargs: Kwargs,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = Some(name.into());
        self
    }

    pub fn load_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.load_kwargs = kwargs;
        self
    }
}

/// Key/value store persisting serialized values and their artifacts.
///
/// Values live at `<root>/<key>`, sidecars at
/// `<root>/funnel_metadata_store/<key>.artifact.json`. A key is present
/// exactly when its sidecar is.
#[derive(Debug, Clone)]
pub struct CacheStore {
    location: StorageLocation,
    backend: Arc<dyn Backend>,
    readonly: bool,
    on_duplicate_key: DuplicateKeyPolicy,
    serializers: Arc<SerializerRegistry>,
    verify_checksums: bool,
}

impl CacheStore {
    /// Open a store at `uri` with default options.
    pub fn new(uri: &str) -> Result<Self> {
        Self::open(uri, CacheStoreOptions::default())
    }

    /// Open a store at `uri`.
    ///
    /// Unless readonly, the root and the sidecar directory are created.
    pub fn open(uri: &str, options: CacheStoreOptions) -> Result<Self> {
        let location = StorageLocation::parse(uri)?;
        let backend = match options.backend {
            Some(backend) => backend,
            None => storage::open_backend(&location, &options.storage_options)?,
        };

        let store = Self {
            location,
            backend,
            readonly: options.readonly,
            on_duplicate_key: options.on_duplicate_key,
            serializers: options.serializers,
            verify_checksums: options.verify_checksums,
        };
        if !store.readonly {
            store.backend.makedirs(&store.location.path)?;
            store.backend.makedirs(&store.metadata_dir())?;
        }
        tracing::debug!(
            "Opened cache store at {} (on_duplicate_key={}, readonly={})",
            store.location,
            store.on_duplicate_key,
            store.readonly
        );
        Ok(store)
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn on_duplicate_key(&self) -> DuplicateKeyPolicy {
        self.on_duplicate_key
    }

    pub fn serializers(&self) -> &Arc<SerializerRegistry> {
        &self.serializers
    }

    fn metadata_dir(&self) -> String {
        self.location.join(METADATA_PREFIX)
    }

    /// Backend path of the value stored under `key`.
    pub fn value_path(&self, key: &str) -> String {
        self.location.join(key)
    }

    /// Backend path of the sidecar describing `key`.
    pub fn sidecar_path(&self, key: &str) -> String {
        storage::join_path(&self.metadata_dir(), &format!("{}{}", key, ARTIFACT_SUFFIX))
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.backend.exists(&self.sidecar_path(key))
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let dir = self.metadata_dir();
        if !self.backend.exists(&dir)? {
            return Ok(Vec::new());
        }
        let mut keys: Vec<String> = self
            .backend
            .list_files(&dir)?
            .into_iter()
            .filter_map(|file| file.strip_suffix(ARTIFACT_SUFFIX).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// The artifact recorded for `key`.
    pub fn artifact(&self, key: &str) -> Result<Artifact> {
        if !self.contains(key)? {
            return Err(FunnelError::not_found("key", key));
        }
        let path = self.sidecar_path(key);
        let corrupt = |message: String| FunnelError::CorruptArtifact {
            key: key.to_string(),
            path: path.clone(),
            message,
        };
        let raw = self.backend.read(&path).map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))
    }

    /// Artifacts of every stored key, in key order.
    pub fn artifacts(&self) -> Result<Vec<Artifact>> {
        self.keys()?.iter().map(|key| self.artifact(key)).collect()
    }

    /// Store `value` under `key` with the default options.
    pub fn put(&self, key: &str, value: &CacheValue) -> Result<Option<Artifact>> {
        self.put_with(key, value, PutOptions::default())
    }

    /// Store `value` under `key`, following the duplicate-key policy.
    ///
    /// Returns the artifact describing what is stored afterwards, or `None`
    /// for a readonly store.
    pub fn put_with(
        &self,
        key: &str,
        value: &CacheValue,
        options: PutOptions,
    ) -> Result<Option<Artifact>> {
        validate_key(key)?;
        if self.readonly {
            tracing::debug!("Cache store {} is readonly, not storing '{}'", self.location, key);
            return Ok(None);
        }
        let serializer = self.serializers.resolve(&options.serializer, value)?;

        if self.contains(key)? {
            match self.on_duplicate_key {
                DuplicateKeyPolicy::Skip => {
                    tracing::debug!("Key '{}' already cached, skipping write", key);
                    return self.artifact(key).map(Some);
                }
                DuplicateKeyPolicy::RaiseError => {
                    return Err(FunnelError::DuplicateKey {
                        key: key.to_string(),
                    });
                }
                DuplicateKeyPolicy::CheckCollision => {
                    return self.check_collision(key, value, &serializer, &options).map(Some);
                }
                DuplicateKeyPolicy::Overwrite => {
                    tracing::debug!("Overwriting cached key '{}'", key);
                }
            }
        }

        let staged = self.stage(key, value, &serializer, &options.dump_kwargs)?;
        let checksum = storage::checksum(self.backend(), &staged)?;
        let target = self.value_path(key);
        self.backend.remove(&target)?;
        self.backend.rename(&staged, &target)?;

        let artifact = Artifact::new(key, serializer.name())
            .with_load_kwargs(options.load_kwargs)
            .with_dump_kwargs(options.dump_kwargs)
            .with_custom_fields(options.custom_fields)
            .with_checksum(checksum);
        self.write_sidecar(&artifact)?;
        tracing::debug!("Stored '{}' with serializer '{}'", key, artifact.serializer);
        Ok(Some(artifact))
    }

    /// Dump `value` into a fresh scratch location and return its path.
    fn stage(
        &self,
        key: &str,
        value: &CacheValue,
        serializer: &Serializer,
        dump_kwargs: &Kwargs,
    ) -> Result<String> {
        let staged = storage::join_path(&self.location.join(STAGING_PREFIX), &scratch_name());
        if let Err(source) = serializer.dump(value, self.backend(), &staged, dump_kwargs) {
            let _ = self.backend.remove(&staged);
            return Err(FunnelError::Serialization {
                action: "dump",
                key: key.to_string(),
                serializer: serializer.name().to_string(),
                source: Box::new(source),
            });
        }
        Ok(staged)
    }

    fn check_collision(
        &self,
        key: &str,
        value: &CacheValue,
        serializer: &Serializer,
        options: &PutOptions,
    ) -> Result<Artifact> {
        let existing = self.artifact(key)?;
        let staged = self.stage(key, value, serializer, &options.dump_kwargs)?;
        let incoming = storage::checksum(self.backend(), &staged);
        self.backend.remove(&staged)?;
        let incoming = incoming?;

        let stored = match &existing.checksum {
            Some(checksum) => checksum.clone(),
            None => storage::checksum(self.backend(), &self.value_path(key))?,
        };
        if stored == incoming {
            tracing::debug!("Key '{}' already holds identical content", key);
            Ok(existing)
        } else {
            Err(FunnelError::Collision {
                key: key.to_string(),
                message: format!(
                    "stored checksum {} differs from new content {}",
                    stored, incoming
                ),
            })
        }
    }

    fn write_sidecar(&self, artifact: &Artifact) -> Result<()> {
        let path = self.sidecar_path(&artifact.key);
        let temp = format!("{}.tmp-{}", path, scratch_name());
        self.backend
            .write(&temp, serde_json::to_string_pretty(artifact)?.as_bytes())?;
        self.backend.rename(&temp, &path)
    }

    /// Load the value stored under `key` with the default options.
    pub fn get(&self, key: &str) -> Result<CacheValue> {
        self.get_with(key, GetOptions::default())
    }

    /// Load the value stored under `key`.
    pub fn get_with(&self, key: &str, options: GetOptions) -> Result<CacheValue> {
        let artifact = self.artifact(key)?;
        let name = options
            .serializer
            .unwrap_or_else(|| artifact.serializer.clone());
        let serializer = self.serializers.get(&name)?;

        let mut load_kwargs = artifact.load_kwargs.clone();
        load_kwargs.extend(options.load_kwargs);

        let path = self.value_path(key);
        if self.verify_checksums {
            if let Some(expected) = &artifact.checksum {
                let actual = storage::checksum(self.backend(), &path)?;
                if &actual != expected {
                    return Err(FunnelError::ChecksumMismatch {
                        key: key.to_string(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        tracing::debug!("Loading '{}' with serializer '{}'", key, name);
        serializer
            .load(self.backend(), &path, &load_kwargs)
            .map_err(|source| FunnelError::Serialization {
                action: "load",
                key: key.to_string(),
                serializer: name,
                source: Box::new(source),
            })
    }

    /// Remove the value and sidecar of `key`, returning the removed paths.
    ///
    /// With `dry_run` nothing is removed and the paths are only logged.
    pub fn delete(&self, key: &str, dry_run: bool) -> Result<Vec<String>> {
        if !self.contains(key)? {
            return Err(FunnelError::not_found("key", key));
        }
        let paths = vec![self.value_path(key), self.sidecar_path(key)];
        if dry_run {
            tracing::info!("Dry run: would delete {:?}", paths);
            return Ok(paths);
        }
        if self.readonly {
            return Err(FunnelError::validation(format!(
                "cannot delete '{}' from readonly cache store {}",
                key, self.location
            )));
        }
        // sidecar first so a half-finished delete reads as absent
        self.backend.remove(&paths[1])?;
        self.backend.remove(&paths[0])?;
        tracing::debug!("Deleted '{}'", key);
        Ok(paths)
    }
}
