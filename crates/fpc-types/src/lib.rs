//! Foundation types for fpcache.
//!
//! This crate provides the leaf value types shared by every other fpcache
//! crate. None of them perform I/O.
//!
//! # Key Types
//!
//! - [`Digest`] -- Fixed-size 32-byte fingerprint value
//! - [`Metadata`] -- Fingerprint of one action output (content digest or constant sentinel)
//! - [`Stamp`] -- Version token tying a journal to the snapshot it extends

pub mod digest;
pub mod error;
pub mod metadata;
pub mod stamp;

pub use digest::Digest;
pub use error::TypeError;
pub use metadata::Metadata;
pub use stamp::Stamp;
