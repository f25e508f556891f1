//! File-system capability layer for fpcache.
//!
//! The cache engine never touches `std::fs` directly. It is handed a
//! [`CacheFs`] capability exposing exactly the primitives its two-file
//! protocol needs: whole-file read, atomic replace, existence check, and
//! delete.
//!
//! # Backends
//!
//! - [`LocalFs`] -- real disk; writes go to a sibling temporary file that is
//!   renamed over the target
//! - [`InMemoryFs`] -- `BTreeMap`-based backend for tests, with write-fault
//!   injection
//!
//! # Design Rules
//!
//! 1. A reader never observes a partially written file: `write_atomic` either
//!    replaces the whole target or leaves it untouched.
//! 2. Missing files are not errors: `read` returns `Ok(None)`, `delete`
//!    returns `Ok(false)`.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod local;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use local::LocalFs;
pub use memory::InMemoryFs;
pub use traits::CacheFs;
