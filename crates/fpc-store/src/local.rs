use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::CacheFs;

/// Disk-backed [`CacheFs`].
///
/// `write_atomic` writes into a `NamedTempFile` created in the target's own
/// directory (so the final rename never crosses a file-system boundary),
/// optionally `fsync`s it, then persists it over the target. If anything
/// fails before the rename, the temporary file is removed when dropped.
#[derive(Clone, Debug)]
pub struct LocalFs {
    sync_writes: bool,
}

impl LocalFs {
    /// Create a backend; `sync_writes` controls `fsync` before rename.
    pub fn new(sync_writes: bool) -> Self {
        Self { sync_writes }
    }
}

impl Default for LocalFs {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheFs for LocalFs {
    fn read(&self, path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        if path.file_name().is_none() {
            return Err(StoreError::InvalidPath(path.to_path_buf()));
        }
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(data)
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.flush().map_err(|e| StoreError::io(tmp.path(), e))?;
        if self.sync_writes {
            tmp.as_file()
                .sync_all()
                .map_err(|e| StoreError::io(tmp.path(), e))?;
        }
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

        debug!(path = %path.display(), len = data.len(), "atomic write");
        Ok(())
    }

    fn exists(&self, path: &Path) -> StoreResult<bool> {
        path.try_exists().map_err(|e| StoreError::io(path, e))
    }

    fn delete(&self, path: &Path) -> StoreResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::default();
        assert!(fs.read(&dir.path().join("absent")).unwrap().is_none());
        assert!(!fs.exists(&dir.path().join("absent")).unwrap());
    }

    #[test]
    fn write_atomic_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::default();
        let path = dir.path().join("cache.snapshot");

        fs.write_atomic(&path, b"first").unwrap();
        assert_eq!(fs.read(&path).unwrap().unwrap(), b"first");

        fs.write_atomic(&path, b"second, longer").unwrap();
        assert_eq!(fs.read(&path).unwrap().unwrap(), b"second, longer");
    }

    #[test]
    fn write_atomic_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(false);
        let path = dir.path().join("nested").join("deeper").join("cache.journal");
        fs.write_atomic(&path, b"data").unwrap();
        assert!(fs.exists(&path).unwrap());
    }

    #[test]
    fn write_atomic_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::default();
        fs.write_atomic(&dir.path().join("a"), b"1").unwrap();
        fs.write_atomic(&dir.path().join("a"), b"2").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a")]);
    }

    #[test]
    fn delete_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::default();
        let path = dir.path().join("victim");
        fs.write_atomic(&path, b"x").unwrap();

        assert!(fs.delete(&path).unwrap());
        assert!(!fs.delete(&path).unwrap());
        assert!(!fs.exists(&path).unwrap());
    }
}
