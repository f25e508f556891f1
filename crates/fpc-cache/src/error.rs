//! Error types for the cache crate.

use std::path::PathBuf;

use fpc_store::StoreError;
use fpc_types::Stamp;

/// Errors that can occur during cache operations.
///
/// A missing key is never an error: lookups return `Option`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An entry was used in a way its lifecycle state forbids (mutating a
    /// sealed entry, persisting an unsealed one).
    #[error("invalid state for entry {action_key}: {reason}")]
    InvalidState {
        /// Action key of the offending entry.
        action_key: String,
        /// Description of the violated rule.
        reason: String,
    },

    /// A snapshot or journal file failed validation.
    #[error("corrupt data in {path}: {reason}")]
    CorruptData {
        /// The file being decoded.
        path: PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// A journal was written against a different snapshot.
    #[error("stale journal: base stamp {found} does not match snapshot stamp {expected:?}")]
    StaleJournal {
        /// Stamp of the loaded snapshot, if any.
        expected: Option<Stamp>,
        /// Base stamp found in the journal header.
        found: Stamp,
    },

    /// Underlying read/write/rename failure.
    #[error("I/O failure: {0}")]
    Io(#[from] StoreError),

    /// Encoding of an in-memory value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptData {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display() {
        let err = CacheError::InvalidState {
            action_key: "//pkg:lib".to_string(),
            reason: "entry is sealed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("//pkg:lib"));
        assert!(msg.contains("entry is sealed"));
    }

    #[test]
    fn stale_journal_display() {
        let err = CacheError::StaleJournal {
            expected: Some(Stamp::new(10, 0)),
            found: Stamp::new(7, 3),
        };
        let msg = err.to_string();
        assert!(msg.contains("7.3"));
        assert!(msg.contains("Stamp(10ms.0)"));
    }

    #[test]
    fn store_error_converts() {
        let err: CacheError = StoreError::InvalidPath(PathBuf::from("/")).into();
        assert!(matches!(err, CacheError::Io(_)));
    }
}
