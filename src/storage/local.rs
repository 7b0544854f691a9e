//! Local filesystem backend.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::Backend;
use crate::error::{FunnelError, Result};

/// Backend over the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    fn resolve(path: &str) -> PathBuf {
        PathBuf::from(path)
    }

    fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                Self::collect_files(root, &path, out)?;
            } else if let Ok(relative) = path.strip_prefix(root) {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(parts.join("/"));
            }
        }
        Ok(())
    }
}

impl Backend for LocalBackend {
    fn protocol(&self) -> &str {
        "file"
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(Self::resolve(path).exists())
    }

    fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(Self::resolve(path).is_dir())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(Self::resolve(path))?)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = Self::resolve(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    fn makedirs(&self, path: &str) -> Result<()> {
        fs::create_dir_all(Self::resolve(path))?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let path = Self::resolve(path);
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to = Self::resolve(to);
        if to.is_dir() {
            return Err(FunnelError::validation(format!(
                "rename target directory already exists: {}",
                to.display()
            )));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(Self::resolve(from), &to)?;
        Ok(())
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let root = Self::resolve(path);
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        Self::collect_files(&root, &root, &mut files)?;
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root(temp: &TempDir) -> String {
        temp.path().to_string_lossy().into_owned()
    }

    #[test]
    fn write_creates_parents() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let path = format!("{}/a/b/c.bin", root(&temp));

        backend.write(&path, b"hello").unwrap();
        assert!(backend.exists(&path).unwrap());
        assert_eq!(backend.read(&path).unwrap(), b"hello");
    }

    #[test]
    fn list_files_is_recursive_and_sorted() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let base = root(&temp);
        backend.write(&format!("{}/z", base), b"1").unwrap();
        backend.write(&format!("{}/a/b", base), b"2").unwrap();

        assert_eq!(backend.list_files(&base).unwrap(), vec!["a/b", "z"]);
    }

    #[test]
    fn list_files_of_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let missing = format!("{}/nope", root(&temp));
        assert!(backend.list_files(&missing).unwrap().is_empty());
    }

    #[test]
    fn remove_handles_dirs_and_missing_paths() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let dir = format!("{}/tree", root(&temp));
        backend.write(&format!("{}/x/y", dir), b"1").unwrap();

        backend.remove(&dir).unwrap();
        assert!(!backend.exists(&dir).unwrap());
        backend.remove(&dir).unwrap();
    }

    #[test]
    fn rename_replaces_files_but_not_dirs() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new();
        let base = root(&temp);
        backend.write(&format!("{}/from", base), b"1").unwrap();
        backend.write(&format!("{}/to", base), b"2").unwrap();
        backend.write(&format!("{}/dir/x", base), b"3").unwrap();

        backend
            .rename(&format!("{}/from", base), &format!("{}/to", base))
            .unwrap();
        assert_eq!(backend.read(&format!("{}/to", base)).unwrap(), b"1");

        assert!(backend
            .rename(&format!("{}/to", base), &format!("{}/dir", base))
            .is_err());
        backend
            .rename(&format!("{}/to", base), &format!("{}/moved/to", base))
            .unwrap();
        assert_eq!(backend.read(&format!("{}/moved/to", base)).unwrap(), b"1");
    }
}
