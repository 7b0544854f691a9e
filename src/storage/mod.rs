//! Storage backends addressed by URI.
//!
//! A cache store never touches the filesystem directly. It talks to a
//! [`Backend`], a small filesystem-like trait over `/`-separated paths, and
//! the backend is chosen from the scheme of the store's location:
//!
//! - `file://<path>` or a bare path - [`LocalBackend`]
//! - `memory://<path>` - the process-wide [`MemoryBackend`]
//!
//! Any other scheme (object storage and friends) is rejected by
//! [`open_backend`]; supply a custom [`Backend`] to the cache store instead.

pub mod local;
pub mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{FunnelError, Result};

/// Options handed to a backend, typically credentials.
pub type StorageOptions = BTreeMap<String, String>;

/// A filesystem-like storage backend.
///
/// Paths are absolute within the backend and use `/` as separator.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Scheme this backend serves (`"file"`, `"memory"`, ...).
    fn protocol(&self) -> &str;

    /// Whether a file or directory exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Whether `path` is a directory.
    fn is_dir(&self, path: &str) -> Result<bool>;

    /// Read a whole file.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a whole file, creating parent directories.
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Create a directory and its parents.
    fn makedirs(&self, path: &str) -> Result<()>;

    /// Remove a file or a directory tree. Absent paths are not an error.
    fn remove(&self, path: &str) -> Result<()>;

    /// Move a file or directory tree. An existing file at the destination is
    /// replaced; an existing directory is an error.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// All files below `path`, as paths relative to it, sorted.
    fn list_files(&self, path: &str) -> Result<Vec<String>>;
}

/// A parsed storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// Scheme, `"file"` when none was given.
    pub protocol: String,
    /// Path with the scheme stripped and no trailing separator.
    pub path: String,
}

impl StorageLocation {
    /// Parse a location URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let (protocol, rest) = match uri.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("file".to_string(), uri),
        };
        if protocol.is_empty() {
            return Err(FunnelError::validation(format!(
                "missing storage protocol in '{}'",
                uri
            )));
        }

        let path = match protocol.as_str() {
            "file" => expand_home(rest),
            "memory" => format!("/{}", rest.trim_start_matches('/')),
            _ => rest.to_string(),
        };
        let trimmed = path.trim_end_matches('/');
        let path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };

        Ok(Self { protocol, path })
    }

    /// Join a relative path onto this location's path.
    pub fn join(&self, relative: &str) -> String {
        join_path(&self.path, relative)
    }
}

impl std::fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.protocol, self.path)
    }
}

/// Join two `/`-separated paths.
pub fn join_path(base: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        base.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, relative)
    } else {
        format!("{}/{}", base, relative)
    }
}

fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.to_string_lossy(), &path[1..]);
        }
    }
    path.to_string()
}

/// Open the backend serving `location`.
pub fn open_backend(
    location: &StorageLocation,
    options: &StorageOptions,
) -> Result<Arc<dyn Backend>> {
    if !options.is_empty() {
        tracing::debug!(
            "Ignoring {} storage option(s) for {} backend",
            options.len(),
            location.protocol
        );
    }
    match location.protocol.as_str() {
        "file" | "local" => Ok(Arc::new(LocalBackend::new())),
        "memory" => Ok(Arc::new(MemoryBackend::shared())),
        other => Err(FunnelError::validation(format!(
            "unsupported storage protocol '{}'; supply a custom backend",
            other
        ))),
    }
}

/// SHA-256 over every file below `path`, visited in sorted path order.
///
/// A single file hashes as its bytes alone. Each directory entry is framed
/// by its relative path and length, so moving bytes between files or
/// renaming a file changes the digest.
pub fn checksum(backend: &dyn Backend, path: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    if backend.is_dir(path)? {
        let mut files = backend.list_files(path)?;
        files.sort();
        for relative in files {
            let bytes = backend.read(&join_path(path, &relative))?;
            hasher.update((relative.len() as u64).to_le_bytes());
            hasher.update(relative.as_bytes());
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
    } else {
        hasher.update(backend.read(path)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_path_is_file() {
        let loc = StorageLocation::parse("/tmp/cache/").unwrap();
        assert_eq!(loc.protocol, "file");
        assert_eq!(loc.path, "/tmp/cache");
    }

    #[test]
    fn parse_file_scheme() {
        let loc = StorageLocation::parse("file:///data/funnel").unwrap();
        assert_eq!(loc.protocol, "file");
        assert_eq!(loc.path, "/data/funnel");
        assert_eq!(loc.to_string(), "file:///data/funnel");
    }

    #[test]
    fn parse_memory_scheme_roots_path() {
        let loc = StorageLocation::parse("memory://").unwrap();
        assert_eq!(loc.protocol, "memory");
        assert_eq!(loc.path, "/");

        let loc = StorageLocation::parse("memory://scratch/a").unwrap();
        assert_eq!(loc.path, "/scratch/a");
    }

    #[test]
    fn parse_expands_home() {
        let loc = StorageLocation::parse("~/test").unwrap();
        assert!(!loc.path.starts_with('~'));
        assert!(loc.path.ends_with("/test"));
    }

    #[test]
    fn parse_rejects_empty_scheme() {
        assert!(StorageLocation::parse("://x").is_err());
    }

    #[test]
    fn open_backend_rejects_object_storage() {
        let loc = StorageLocation::parse("s3://bucket/prefix").unwrap();
        let err = open_backend(&loc, &StorageOptions::new()).unwrap_err();
        assert!(err.to_string().contains("'s3'"));
    }

    #[test]
    fn join_path_handles_separators() {
        assert_eq!(join_path("/a", "b/c"), "/a/b/c");
        assert_eq!(join_path("/", "b"), "/b");
        assert_eq!(join_path("/a", "/b"), "/a/b");
        assert_eq!(join_path("/a", ""), "/a");
    }

    #[test]
    fn checksum_is_order_stable() {
        let first = MemoryBackend::new();
        first.write("/d/b", b"2").unwrap();
        first.write("/d/a", b"1").unwrap();
        let second = MemoryBackend::new();
        second.write("/d/a", b"1").unwrap();
        second.write("/d/b", b"2").unwrap();

        assert_eq!(
            checksum(&first, "/d").unwrap(),
            checksum(&second, "/d").unwrap()
        );
    }

    #[test]
    fn checksum_frames_directory_entries() {
        let backend = MemoryBackend::new();
        backend.write("/split/a", b"12").unwrap();
        backend.write("/split/b", b"3").unwrap();
        backend.write("/moved/a", b"1").unwrap();
        backend.write("/moved/b", b"23").unwrap();
        backend.write("/renamed/a", b"12").unwrap();
        backend.write("/renamed/c", b"3").unwrap();
        backend.write("/flat", b"123").unwrap();

        let split = checksum(&backend, "/split").unwrap();
        assert_ne!(split, checksum(&backend, "/moved").unwrap());
        assert_ne!(split, checksum(&backend, "/renamed").unwrap());
        assert_ne!(split, checksum(&backend, "/flat").unwrap());
    }
}
