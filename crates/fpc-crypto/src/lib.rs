//! Hashing primitives for fpcache.
//!
//! Provides domain-separated BLAKE3 hashing for output file contents and for
//! the overall fingerprint of an action cache entry. All crypto operations
//! wrap established libraries; no custom cryptography.

pub mod hasher;

pub use hasher::{ContentHasher, DigestBuilder};
