use std::path::Path;

use crate::error::StoreResult;

/// Minimal file-system capability used by the cache engine.
///
/// All implementations must satisfy these invariants:
/// - `write_atomic` replaces the whole target or nothing; a concurrent or
///   later `read` never sees a prefix of the new content.
/// - `read` of a missing file is `Ok(None)`, not an error.
/// - Every file handle opened by an operation is closed before it returns,
///   on success and on failure.
pub trait CacheFs: Send + Sync {
    /// Read a whole file. Returns `Ok(None)` if it does not exist.
    fn read(&self, path: &Path) -> StoreResult<Option<Vec<u8>>>;

    /// Write `data` to a temporary location and atomically move it over `path`.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> StoreResult<()>;

    /// Check whether a file exists.
    fn exists(&self, path: &Path) -> StoreResult<bool>;

    /// Delete a file. Returns `true` if the file existed.
    fn delete(&self, path: &Path) -> StoreResult<bool>;
}
