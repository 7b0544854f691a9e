//! Serializer registry and automatic format selection.
//!
//! A [`Serializer`] is a named pair of load/dump functions operating on a
//! path inside a storage [`Backend`]. The [`SerializerRegistry`] maps names
//! to zero-argument factories producing serializers, and resolves `"auto"`
//! by looking the value's [`ValueKind`] up in an ordered dispatch table.
//!
//! # Built-in serializers
//!
//! - [`OBJECT`] - self-describing generic object format (the fallback)
//! - [`DATASET_CONTAINER`] - single-file array-native format
//! - [`DATASET_CHUNKED`] - chunked directory format
//!
//! # Example
//!
//! ```
//! use funnel::serializers::{SerializerRegistry, DATASET_CONTAINER, OBJECT};
//! use funnel::value::{CacheValue, Dataset};
//!
//! let registry = SerializerRegistry::with_builtins();
//! let list = CacheValue::from(serde_json::json!([1, 2, 3]));
//! assert_eq!(registry.pick_default(&list), OBJECT);
//! assert_eq!(registry.pick_default(&CacheValue::from(Dataset::new())), DATASET_CONTAINER);
//! ```

pub mod chunked;
pub mod container;
pub mod object;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{FunnelError, Result};
use crate::storage::Backend;
use crate::value::{CacheValue, Kwargs, ValueKind};

/// Name that asks the registry to choose a serializer.
pub const AUTO: &str = "auto";
/// Generic object serializer.
pub const OBJECT: &str = "object";
/// Single-file dataset serializer.
pub const DATASET_CONTAINER: &str = "dataset.container";
/// Chunked directory dataset serializer.
pub const DATASET_CHUNKED: &str = "dataset.chunked";

static GLOBAL: LazyLock<Arc<SerializerRegistry>> =
    LazyLock::new(|| Arc::new(SerializerRegistry::with_builtins()));

/// Reads a value from `path`.
pub type LoadFn = fn(&dyn Backend, &str, &Kwargs) -> Result<CacheValue>;

/// Writes a value to `path`.
pub type DumpFn = fn(&CacheValue, &dyn Backend, &str, &Kwargs) -> Result<()>;

/// Zero-argument constructor registered under a name.
pub type SerializerFactory = fn() -> Serializer;

/// A named load/dump pair for one storage format.
#[derive(Debug, Clone)]
pub struct Serializer {
    name: String,
    load: LoadFn,
    dump: DumpFn,
}

impl Serializer {
    pub fn new(name: impl Into<String>, load: LoadFn, dump: DumpFn) -> Self {
        Self {
            name: name.into(),
            load,
            dump,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the value stored at `path`.
    pub fn load(&self, backend: &dyn Backend, path: &str, kwargs: &Kwargs) -> Result<CacheValue> {
        (self.load)(backend, path, kwargs)
    }

    /// Write `value` at `path`.
    pub fn dump(
        &self,
        value: &CacheValue,
        backend: &dyn Backend,
        path: &str,
        kwargs: &Kwargs,
    ) -> Result<()> {
        (self.dump)(value, backend, path, kwargs)
    }
}

/// What happens when a name is registered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    /// Re-registration is an error.
    Strict,
    /// Re-registration warns and the last registration wins.
    Permissive,
}

/// Registry of serializers by name.
pub struct SerializerRegistry {
    mode: RegistryMode,
    factories: RwLock<BTreeMap<String, SerializerFactory>>,
    defaults: RwLock<Vec<(ValueKind, String)>>,
    fallback: String,
}

impl SerializerRegistry {
    /// Create an empty registry whose fallback is [`OBJECT`].
    pub fn new(mode: RegistryMode) -> Self {
        Self {
            mode,
            factories: RwLock::new(BTreeMap::new()),
            defaults: RwLock::new(Vec::new()),
            fallback: OBJECT.to_string(),
        }
    }

    /// Create a permissive registry with the built-in serializers.
    pub fn with_builtins() -> Self {
        let registry = Self::new(RegistryMode::Permissive);
        {
            let mut factories = registry.factories_mut();
            factories.insert(OBJECT.to_string(), object::serializer as SerializerFactory);
            factories.insert(DATASET_CONTAINER.to_string(), container::serializer);
            factories.insert(DATASET_CHUNKED.to_string(), chunked::serializer);
        }
        registry
            .defaults_mut()
            .push((ValueKind::Dataset, DATASET_CONTAINER.to_string()));
        registry
    }

    /// The process-wide default registry, shared by stores that are not
    /// given their own.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    fn factories(&self) -> RwLockReadGuard<'_, BTreeMap<String, SerializerFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn factories_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, SerializerFactory>> {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn defaults(&self) -> RwLockReadGuard<'_, Vec<(ValueKind, String)>> {
        self.defaults
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn defaults_mut(&self) -> RwLockWriteGuard<'_, Vec<(ValueKind, String)>> {
        self.defaults
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a serializer factory under `name`.
    pub fn register(&self, name: impl Into<String>, factory: SerializerFactory) -> Result<()> {
        let name = name.into();
        if name == AUTO {
            return Err(FunnelError::validation(
                "'auto' is reserved and cannot name a serializer",
            ));
        }

        let mut factories = self.factories_mut();
        if factories.contains_key(&name) {
            match self.mode {
                RegistryMode::Strict => {
                    return Err(FunnelError::validation(format!(
                        "serializer '{}' is already registered",
                        name
                    )));
                }
                RegistryMode::Permissive => {
                    tracing::warn!("Overwriting serializer '{}' definition", name);
                }
            }
        }
        factories.insert(name, factory);
        Ok(())
    }

    /// Build the serializer registered under `name`.
    pub fn get(&self, name: &str) -> Result<Serializer> {
        let factory = self
            .factories()
            .get(name)
            .copied()
            .ok_or_else(|| FunnelError::not_found("serializer", name))?;
        Ok(factory())
    }

    pub fn has(&self, name: &str) -> bool {
        self.factories().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories().keys().cloned().collect()
    }

    /// Map values of `kind` to the serializer `name` when `"auto"` is asked
    /// for.
    ///
    /// Existing mappings are never replaced; mapping an already-mapped kind
    /// is an error.
    pub fn register_default(&self, kind: ValueKind, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if !self.has(&name) {
            return Err(FunnelError::not_found("serializer", name));
        }
        let mut defaults = self.defaults_mut();
        if let Some((_, existing)) = defaults.iter().find(|(k, _)| *k == kind) {
            return Err(FunnelError::validation(format!(
                "{} values already default to '{}'",
                kind, existing
            )));
        }
        defaults.push((kind, name));
        Ok(())
    }

    /// Name of the default serializer for `value`.
    pub fn pick_default(&self, value: &CacheValue) -> String {
        let kind = value.kind();
        self.defaults()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Resolve a requested name, treating `"auto"` as dispatch on `value`.
    pub fn resolve(&self, requested: &str, value: &CacheValue) -> Result<Serializer> {
        if requested == AUTO {
            self.get(&self.pick_default(value))
        } else {
            self.get(requested)
        }
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("mode", &self.mode)
            .field("names", &self.names())
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Reject kwargs outside `allowed`.
pub(crate) fn check_kwargs(serializer: &str, kwargs: &Kwargs, allowed: &[&str]) -> Result<()> {
    let unknown: Vec<&str> = kwargs
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(FunnelError::validation(format!(
            "unsupported keyword argument(s) for '{}': {}",
            serializer,
            unknown.join(", ")
        )))
    }
}

/// The `drop_variables` load kwarg as a list of names.
pub(crate) fn drop_variables(serializer: &str, kwargs: &Kwargs) -> Result<Vec<String>> {
    let Some(value) = kwargs.get("drop_variables") else {
        return Ok(Vec::new());
    };
    let invalid = || {
        FunnelError::validation(format!(
            "'{}': drop_variables must be a string or a list of strings",
            serializer
        ))
    };
    match value {
        serde_json::Value::String(name) => Ok(vec![name.clone()]),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Dataset;
    use serde_json::json;

    fn custom() -> Serializer {
        object::serializer()
    }

    #[test]
    fn builtins_are_registered() {
        let registry = SerializerRegistry::with_builtins();
        assert!(registry.has(OBJECT));
        assert!(registry.has(DATASET_CONTAINER));
        assert!(registry.has(DATASET_CHUNKED));
        assert_eq!(registry.names().len(), 3);
        assert_eq!(registry.get(DATASET_CHUNKED).unwrap().name(), DATASET_CHUNKED);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = SerializerRegistry::with_builtins();
        let err = registry.get("my_func").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn pick_default_dispatches_on_kind() {
        let registry = SerializerRegistry::with_builtins();
        assert_eq!(registry.pick_default(&json!(["foo", "bar"]).into()), OBJECT);
        assert_eq!(registry.pick_default(&json!({"foo": "bar"}).into()), OBJECT);
        assert_eq!(registry.pick_default(&CacheValue::Bytes(vec![0])), OBJECT);
        assert_eq!(
            registry.pick_default(&Dataset::new().into()),
            DATASET_CONTAINER
        );
    }

    #[test]
    fn resolve_auto_uses_dispatch() {
        let registry = SerializerRegistry::with_builtins();
        let serializer = registry.resolve(AUTO, &Dataset::new().into()).unwrap();
        assert_eq!(serializer.name(), DATASET_CONTAINER);
        let serializer = registry
            .resolve(DATASET_CHUNKED, &Dataset::new().into())
            .unwrap();
        assert_eq!(serializer.name(), DATASET_CHUNKED);
    }

    #[test]
    fn strict_registry_rejects_duplicates() {
        let registry = SerializerRegistry::new(RegistryMode::Strict);
        registry.register("custom", custom).unwrap();
        let err = registry.register("custom", custom).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn permissive_registry_overwrites() {
        let registry = SerializerRegistry::with_builtins();
        registry.register(DATASET_CHUNKED, custom).unwrap();
        assert_eq!(registry.get(DATASET_CHUNKED).unwrap().name(), OBJECT);
    }

    #[test]
    fn overwrite_logs_a_warning() {
        let registry = SerializerRegistry::with_builtins();
        let (_, logs) = crate::logging::capture_logs(|| {
            registry.register("my.format", custom).unwrap();
        });
        assert!(!logs.contains("Overwriting"));

        let (_, logs) = crate::logging::capture_logs(|| {
            registry.register("my.format", custom).unwrap();
        });
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("Overwriting serializer 'my.format' definition"));
    }

    #[test]
    fn auto_is_reserved() {
        let registry = SerializerRegistry::new(RegistryMode::Permissive);
        assert!(registry.register(AUTO, custom).is_err());
    }

    #[test]
    fn register_default_extends_but_never_replaces() {
        let registry = SerializerRegistry::with_builtins();
        registry
            .register_default(ValueKind::Bytes, DATASET_CHUNKED)
            .unwrap();
        assert_eq!(
            registry.pick_default(&CacheValue::Bytes(vec![])),
            DATASET_CHUNKED
        );

        let err = registry
            .register_default(ValueKind::Dataset, DATASET_CHUNKED)
            .unwrap_err();
        assert!(err.to_string().contains("already default"));
        assert_eq!(
            registry.pick_default(&Dataset::new().into()),
            DATASET_CONTAINER
        );
    }

    #[test]
    fn register_default_requires_known_serializer() {
        let registry = SerializerRegistry::with_builtins();
        assert!(registry
            .register_default(ValueKind::Bytes, "missing")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn check_kwargs_names_unknown_keys() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("mode".into(), json!("w"));
        kwargs.insert("compression".into(), json!("zlib"));
        let err = check_kwargs("dataset.chunked", &kwargs, &["mode"]).unwrap_err();
        assert!(err.to_string().contains("compression"));
        assert!(check_kwargs("dataset.chunked", &kwargs, &["mode", "compression"]).is_ok());
    }

    #[test]
    fn drop_variables_accepts_string_or_list() {
        let mut kwargs = Kwargs::new();
        assert!(drop_variables("s", &kwargs).unwrap().is_empty());

        kwargs.insert("drop_variables".into(), json!("a"));
        assert_eq!(drop_variables("s", &kwargs).unwrap(), vec!["a"]);

        kwargs.insert("drop_variables".into(), json!(["a", "b"]));
        assert_eq!(drop_variables("s", &kwargs).unwrap(), vec!["a", "b"]);

        kwargs.insert("drop_variables".into(), json!(3));
        assert!(drop_variables("s", &kwargs).is_err());
    }
}
