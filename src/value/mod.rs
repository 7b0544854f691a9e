//! Cacheable values.
//!
//! Every value that passes through a cache store is a [`CacheValue`]. The
//! variant decides which serializer `"auto"` resolves to:
//!
//! - [`CacheValue::Object`] - scalars and collections (any JSON value)
//! - [`CacheValue::Dataset`] - array-native containers ([`Dataset`])
//! - [`CacheValue::Bytes`] - opaque blobs

pub mod dataset;

pub use dataset::{Dataset, Variable};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FunnelError, Result};

/// Keyword arguments re-applied on every load or dump.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// A value that can be stored in a cache store.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Scalar or collection value.
    Object(serde_json::Value),
    /// Array-native dataset.
    Dataset(Dataset),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

/// Classification of a [`CacheValue`] used by serializer dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Object,
    Dataset,
    Bytes,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Object => write!(f, "object"),
            ValueKind::Dataset => write!(f, "dataset"),
            ValueKind::Bytes => write!(f, "bytes"),
        }
    }
}

impl CacheValue {
    /// Build an object value from anything serde can serialize.
    pub fn object<T: Serialize>(value: &T) -> Result<Self> {
        Ok(CacheValue::Object(serde_json::to_value(value)?))
    }

    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            CacheValue::Object(_) => ValueKind::Object,
            CacheValue::Dataset(_) => ValueKind::Dataset,
            CacheValue::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// Deserialize an object value into a concrete type.
    pub fn into_object<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            CacheValue::Object(value) => Ok(serde_json::from_value(value)?),
            other => Err(FunnelError::validation(format!(
                "expected an object value, found {}",
                other.kind()
            ))),
        }
    }

    /// Borrow the dataset, if this is one.
    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            CacheValue::Dataset(ds) => Some(ds),
            _ => None,
        }
    }

    /// Take the dataset out of this value.
    pub fn into_dataset(self) -> Result<Dataset> {
        match self {
            CacheValue::Dataset(ds) => Ok(ds),
            other => Err(FunnelError::validation(format!(
                "expected a dataset value, found {}",
                other.kind()
            ))),
        }
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        CacheValue::Object(value)
    }
}

impl From<Dataset> for CacheValue {
    fn from(ds: Dataset) -> Self {
        CacheValue::Dataset(ds)
    }
}

impl TryFrom<CacheValue> for Dataset {
    type Error = FunnelError;

    fn try_from(value: CacheValue) -> Result<Self> {
        value.into_dataset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_follows_variant() {
        assert_eq!(CacheValue::from(json!([1, 2, 3])).kind(), ValueKind::Object);
        assert_eq!(
            CacheValue::from(Dataset::new()).kind(),
            ValueKind::Dataset
        );
        assert_eq!(CacheValue::Bytes(vec![1]).kind(), ValueKind::Bytes);
    }

    #[test]
    fn object_roundtrips_through_serde() {
        let value = CacheValue::object(&vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = value.into_object().unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn into_object_rejects_dataset() {
        let err = CacheValue::from(Dataset::new())
            .into_object::<Vec<i32>>()
            .unwrap_err();
        assert!(err.to_string().contains("found dataset"));
    }

    #[test]
    fn into_dataset_rejects_bytes() {
        assert!(CacheValue::Bytes(vec![]).into_dataset().is_err());
        assert!(CacheValue::from(Dataset::new()).as_dataset().is_some());
    }
}
