//! Persistent action fingerprint cache.
//!
//! A build tool consults this cache to decide whether a previously executed
//! action can be skipped. For each action key it records an [`Entry`]: the
//! digests of the action's declared outputs plus one overall fingerprint.
//!
//! # Architecture
//!
//! - **Snapshot file** (`<root>.snapshot`): full point-in-time encoding of
//!   every entry, tagged with the [`Stamp`](fpc_types::Stamp) of the save
//!   that produced it
//! - **Journal file** (`<root>.journal`): append-only PUT/REMOVE records,
//!   tagged with the stamp of the snapshot they extend
//! - [`JournaledStore`]: in-memory map plus dirty-key tracking; decides per
//!   save whether to append to the journal or compact into a new snapshot
//! - [`codec`]: CRC-framed binary formats for both files
//!
//! # Key Types
//!
//! - [`Entry`] -- two-phase (building, then sealed) cached action result
//! - [`JournaledStore`] -- the store itself
//! - [`CacheConfig`] -- tunables (compaction ratio, fsync)
//! - [`StampClock`] -- monotonic version stamps from an injected [`Clock`]

pub mod clock;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use clock::{Clock, ManualClock, StampClock, SystemClock};
pub use config::CacheConfig;
pub use entry::{Entry, EntryState};
pub use error::{CacheError, CacheResult};
pub use store::{journal_path, snapshot_path, JournaledStore, LoadReport, LoadWarning, SaveOutcome};
