//! In-memory backend.
//!
//! Every `memory://` location in a process addresses the same filesystem,
//! so two cache stores opened on one memory URI see each other's values.
//! Use [`MemoryBackend::new`] for an isolated instance.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::Backend;
use crate::error::{FunnelError, Result};

static SHARED: LazyLock<MemoryBackend> = LazyLock::new(MemoryBackend::new);

#[derive(Debug, Default)]
struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl MemoryFs {
    fn add_parents(&mut self, path: &str) {
        let mut current = parent(path);
        while let Some(dir) = current {
            if !self.dirs.insert(dir.to_string()) {
                break;
            }
            current = parent(dir);
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }
}

fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(idx) if idx > 0 => Some(&path[..idx]),
        _ => None,
    }
}

fn prefix_of(dir: &str) -> String {
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{}/", dir)
    }
}

fn not_found(path: &str) -> FunnelError {
    std::io::Error::new(ErrorKind::NotFound, format!("no such file: {}", path)).into()
}

/// Backend keeping files in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    fs: Arc<RwLock<MemoryFs>>,
}

impl MemoryBackend {
    /// Create an isolated, empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the process-wide filesystem behind `memory://`.
    pub fn shared() -> Self {
        SHARED.clone()
    }

    fn read_fs(&self) -> RwLockReadGuard<'_, MemoryFs> {
        self.fs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_fs(&self) -> RwLockWriteGuard<'_, MemoryFs> {
        self.fs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Backend for MemoryBackend {
    fn protocol(&self) -> &str {
        "memory"
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let fs = self.read_fs();
        Ok(fs.files.contains_key(path) || fs.is_dir(path))
    }

    fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(self.read_fs().is_dir(path))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.read_fs()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut fs = self.write_fs();
        if fs.is_dir(path) {
            return Err(FunnelError::validation(format!(
                "cannot write file over directory: {}",
                path
            )));
        }
        fs.add_parents(path);
        fs.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn makedirs(&self, path: &str) -> Result<()> {
        let mut fs = self.write_fs();
        fs.add_parents(path);
        fs.dirs.insert(path.to_string());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let mut fs = self.write_fs();
        if fs.files.remove(path).is_some() {
            return Ok(());
        }
        let prefix = prefix_of(path);
        fs.files.retain(|p, _| !p.starts_with(&prefix));
        fs.dirs.retain(|p| p != path && !p.starts_with(&prefix));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut fs = self.write_fs();
        if fs.is_dir(to) {
            return Err(FunnelError::validation(format!(
                "rename target directory already exists: {}",
                to
            )));
        }

        if let Some(data) = fs.files.remove(from) {
            fs.add_parents(to);
            fs.files.insert(to.to_string(), data);
            return Ok(());
        }
        if !fs.is_dir(from) {
            return Err(not_found(from));
        }

        let from_prefix = prefix_of(from);
        let to_prefix = prefix_of(to);
        let moved_files: Vec<String> = fs
            .files
            .keys()
            .filter(|p| p.starts_with(&from_prefix))
            .cloned()
            .collect();
        for old in moved_files {
            if let Some(data) = fs.files.remove(&old) {
                let new = format!("{}{}", to_prefix, &old[from_prefix.len()..]);
                fs.files.insert(new, data);
            }
        }
        let moved_dirs: Vec<String> = fs
            .dirs
            .iter()
            .filter(|p| p.as_str() == from || p.starts_with(&from_prefix))
            .cloned()
            .collect();
        for old in moved_dirs {
            fs.dirs.remove(&old);
            let new = if old == from {
                to.to_string()
            } else {
                format!("{}{}", to_prefix, &old[from_prefix.len()..])
            };
            fs.dirs.insert(new);
        }
        fs.add_parents(to);
        Ok(())
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let fs = self.read_fs();
        let prefix = prefix_of(path);
        Ok(fs
            .files
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_registers_parent_dirs() {
        let backend = MemoryBackend::new();
        backend.write("/a/b/c", b"x").unwrap();

        assert!(backend.is_dir("/a").unwrap());
        assert!(backend.is_dir("/a/b").unwrap());
        assert!(!backend.is_dir("/a/b/c").unwrap());
        assert!(backend.exists("/a/b/c").unwrap());
    }

    #[test]
    fn read_missing_is_io_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.read("/nope").unwrap_err();
        assert!(matches!(err, FunnelError::Io(ref e) if e.kind() == ErrorKind::NotFound));
    }

    #[test]
    fn list_files_is_relative_and_sorted() {
        let backend = MemoryBackend::new();
        backend.write("/root/z", b"1").unwrap();
        backend.write("/root/a/b", b"2").unwrap();
        backend.write("/rootless", b"3").unwrap();

        assert_eq!(backend.list_files("/root").unwrap(), vec!["a/b", "z"]);
        assert_eq!(backend.list_files("/").unwrap().len(), 3);
    }

    #[test]
    fn remove_tree() {
        let backend = MemoryBackend::new();
        backend.write("/t/a", b"1").unwrap();
        backend.write("/t/b/c", b"2").unwrap();
        backend.write("/tt", b"3").unwrap();

        backend.remove("/t").unwrap();
        assert!(!backend.exists("/t").unwrap());
        assert!(!backend.exists("/t/b").unwrap());
        assert!(backend.exists("/tt").unwrap());
    }

    #[test]
    fn rename_moves_directory_tree() {
        let backend = MemoryBackend::new();
        backend.write("/stage/x/0", b"0").unwrap();
        backend.write("/stage/x/meta", b"m").unwrap();

        backend.rename("/stage/x", "/store/key").unwrap();

        assert_eq!(backend.list_files("/store/key").unwrap(), vec!["0", "meta"]);
        assert!(!backend.exists("/stage/x").unwrap());
        assert!(backend.is_dir("/store/key").unwrap());
    }

    #[test]
    fn rename_missing_source_fails() {
        let backend = MemoryBackend::new();
        assert!(backend.rename("/nope", "/there").is_err());
    }

    #[test]
    fn shared_instances_see_each_other() {
        let a = MemoryBackend::shared();
        let b = MemoryBackend::shared();
        a.write("/memory-backend-test/shared", b"1").unwrap();
        assert!(b.exists("/memory-backend-test/shared").unwrap());
        a.remove("/memory-backend-test").unwrap();
    }
}
