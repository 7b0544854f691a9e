//! Artifact records and the duplicate-key policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::FunnelError;
use crate::value::Kwargs;

/// Describes how a cached value was serialized.
///
/// Written once by `put` as a sidecar next to the value and never mutated;
/// an `overwrite` put replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Cache key the value is stored under.
    pub key: String,
    /// Name of the serializer that wrote the value.
    pub serializer: String,
    /// Keyword arguments applied on every load.
    #[serde(default)]
    pub load_kwargs: Kwargs,
    /// Keyword arguments the value was dumped with.
    #[serde(default)]
    pub dump_kwargs: Kwargs,
    /// Searchable, caller-defined fields.
    #[serde(default)]
    pub custom_fields: Kwargs,
    /// SHA-256 of the stored bytes.
    #[serde(default)]
    pub checksum: Option<String>,
    /// When the value was written.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact stamped with the current time.
    pub fn new(key: impl Into<String>, serializer: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            serializer: serializer.into(),
            load_kwargs: Kwargs::new(),
            dump_kwargs: Kwargs::new(),
            custom_fields: Kwargs::new(),
            checksum: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_load_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.load_kwargs = kwargs;
        self
    }

    pub fn with_dump_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.dump_kwargs = kwargs;
        self
    }

    pub fn with_custom_fields(mut self, fields: Kwargs) -> Self {
        self.custom_fields = fields;
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Age of the stored value.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// True when every entry of `filter` equals the same custom field.
    pub fn matches(&self, filter: &Kwargs) -> bool {
        filter
            .iter()
            .all(|(name, expected)| self.custom_fields.get(name) == Some(expected))
    }
}

/// What `put` does when the key is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeyPolicy {
    /// Keep the stored value and return its artifact.
    #[default]
    Skip,
    /// Replace the stored value and artifact.
    Overwrite,
    /// Compare checksums; equal content is kept, different content fails.
    CheckCollision,
    /// Fail without touching the stored value.
    RaiseError,
}

impl DuplicateKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKeyPolicy::Skip => "skip",
            DuplicateKeyPolicy::Overwrite => "overwrite",
            DuplicateKeyPolicy::CheckCollision => "check_collision",
            DuplicateKeyPolicy::RaiseError => "raise_error",
        }
    }
}

impl std::fmt::Display for DuplicateKeyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateKeyPolicy {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(DuplicateKeyPolicy::Skip),
            "overwrite" => Ok(DuplicateKeyPolicy::Overwrite),
            "check_collision" => Ok(DuplicateKeyPolicy::CheckCollision),
            "raise_error" => Ok(DuplicateKeyPolicy::RaiseError),
            other => Err(FunnelError::validation(format!(
                "unknown duplicate-key policy '{}' (expected skip, overwrite, check_collision or raise_error)",
                other
            ))),
        }
    }
}
