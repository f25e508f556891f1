use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::CacheFs;

/// In-memory, `BTreeMap`-based [`CacheFs`].
///
/// Intended for tests. Files are held behind a `RwLock`; whole-file replace
/// is trivially atomic. [`InMemoryFs::fail_writes`] makes every subsequent
/// `write_atomic` and `delete` fail without touching stored content, which
/// models a disk that goes away mid-save.
pub struct InMemoryFs {
    files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryFs {
    /// Create an empty file system.
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Toggle write-fault injection.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of files currently stored.
    pub fn len(&self) -> usize {
        self.files.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no files are stored.
    pub fn is_empty(&self) -> bool {
        self.files.read().expect("lock poisoned").is_empty()
    }

    /// Sorted list of all stored paths.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn check_writable(&self, path: &Path) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                path,
                io::Error::other("injected write failure"),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheFs for InMemoryFs {
    fn read(&self, path: &Path) -> StoreResult<Option<Vec<u8>>> {
        let files = self.files.read().expect("lock poisoned");
        Ok(files.get(path).cloned())
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        self.check_writable(path)?;
        let mut files = self.files.write().expect("lock poisoned");
        files.insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> StoreResult<bool> {
        let files = self.files.read().expect("lock poisoned");
        Ok(files.contains_key(path))
    }

    fn delete(&self, path: &Path) -> StoreResult<bool> {
        self.check_writable(path)?;
        let mut files = self.files.write().expect("lock poisoned");
        Ok(files.remove(path).is_some())
    }
}

impl std::fmt::Debug for InMemoryFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryFs")
            .field("file_count", &self.len())
            .finish()
    }
}
