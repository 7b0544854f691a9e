//! Error types for funnel operations.
//!
//! This module defines [`FunnelError`], the error type shared by every store
//! and registry in the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Lookup failures (unknown key, unknown serializer) are always
//!   [`FunnelError::NotFound`] and are never turned into empty results
//! - Codec internals use `anyhow` for context and surface through
//!   [`FunnelError::Other`], wrapped in [`FunnelError::Serialization`] by the
//!   cache store so the failing key and format are always named
//! - Database errors from the SQL metadata store propagate unchanged

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for funnel operations.
#[derive(Debug, Error)]
pub enum FunnelError {
    /// A key, serializer or rule was looked up but is not registered.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Malformed configuration or arguments.
    #[error("Invalid configuration: {message}")]
    Validation { message: String },

    /// Failed to parse a settings file.
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// A derived variable was computed on a dataset lacking its inputs.
    #[error("Cannot compute '{variable}': variables missing: {}", .missing.join(", "))]
    MissingDependency {
        variable: String,
        missing: Vec<String>,
    },

    /// `put` under `raise_error` targeted an occupied key.
    #[error("Key already exists in cache store: {key}")]
    DuplicateKey { key: String },

    /// `put` under `check_collision` found different content at the key.
    #[error("Collision on key '{key}': {message}")]
    Collision { key: String, message: String },

    /// The metadata index refused a duplicate record.
    #[error("Integrity violation for key '{key}': {message}")]
    Integrity { key: String, message: String },

    /// The sidecar metadata of a key exists but cannot be read.
    #[error("Unable to load artifact sidecar {path} for key '{key}': {message}")]
    CorruptArtifact {
        key: String,
        path: String,
        message: String,
    },

    /// Stored bytes no longer match the recorded checksum.
    #[error("Checksum mismatch for key '{key}': expected {expected}, found {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// A serializer failed to load or dump a value.
    #[error("Unable to {action} artifact '{key}' with serializer '{serializer}': {source}")]
    Serialization {
        action: &'static str,
        key: String,
        serializer: String,
        #[source]
        source: Box<FunnelError>,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQL metadata store failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FunnelError {
    /// Shorthand for a [`FunnelError::NotFound`].
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        FunnelError::NotFound {
            what,
            key: key.into(),
        }
    }

    /// Shorthand for a [`FunnelError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        FunnelError::Validation {
            message: message.into(),
        }
    }

    /// True for lookups of absent keys, serializers or rules.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FunnelError::NotFound { .. })
    }
}

/// Result type alias for funnel operations.
pub type Result<T> = std::result::Result<T, FunnelError>;
