//! The journaled key/entry store.
//!
//! [`JournaledStore`] keeps the live map in memory and persists it across
//! two files tied together by a [`Stamp`]:
//!
//! - the snapshot is only ever replaced whole (atomic rename) during a full
//!   save, which also issues a fresh stamp and deletes the journal;
//! - the journal carries the stamp of the snapshot it extends and grows by
//!   one record per dirty key on each incremental save.
//!
//! On open, a journal whose base stamp differs from the snapshot stamp is
//! ignored. This also covers a crash between writing a new snapshot and
//! deleting the old journal.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fpc_store::{CacheFs, LocalFs};
use fpc_types::Stamp;
use tracing::{debug, warn};

use crate::clock::{Clock, StampClock, SystemClock};
use crate::codec::{self, JournalRecord, ReplayStop};
use crate::config::CacheConfig;
use crate::entry::Entry;
use crate::error::{CacheError, CacheResult};

/// Path of the snapshot file for a cache rooted at `root`.
pub fn snapshot_path(root: &Path) -> PathBuf {
    with_suffix(root, ".snapshot")
}

/// Path of the journal file for a cache rooted at `root`.
pub fn journal_path(root: &Path) -> PathBuf {
    with_suffix(root, ".journal")
}

fn with_suffix(root: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(root.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// What a call to [`JournaledStore::save`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing was dirty; no file was touched.
    Unchanged,
    /// Dirty keys were appended to the journal.
    Incremental { records: usize },
    /// The whole map was written to a new snapshot and the journal removed.
    Full { entries: usize, stamp: Stamp },
}

/// A recoverable problem found while loading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadWarning {
    /// The journal extends a different snapshot and was ignored.
    StaleJournal { expected: Stamp, found: Stamp },
    /// A journal exists but no snapshot was loaded; it was ignored.
    OrphanJournal { found: Stamp },
    /// The journal ends in an incomplete record; replay stopped before it.
    JournalTruncated { offset: usize },
    /// A journal record (or the journal header) failed validation; replay
    /// stopped there.
    JournalCorrupt { offset: usize, reason: String },
    /// The snapshot failed validation and the store started empty.
    SnapshotCorrupt { reason: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleJournal { expected, found } => write!(
                f,
                "discarded stale journal (base stamp {found}, snapshot stamp {expected})"
            ),
            Self::OrphanJournal { found } => {
                write!(f, "discarded journal with base stamp {found}: no snapshot loaded")
            }
            Self::JournalTruncated { offset } => {
                write!(f, "journal truncated at offset {offset}; incomplete record ignored")
            }
            Self::JournalCorrupt { offset, reason } => {
                write!(f, "journal corrupt at offset {offset}: {reason}; replay stopped")
            }
            Self::SnapshotCorrupt { reason } => {
                write!(f, "snapshot corrupt ({reason}); starting with an empty cache")
            }
        }
    }
}

/// Summary of what [`JournaledStore`] reconstructed from disk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries decoded from the snapshot.
    pub snapshot_entries: usize,
    /// Journal records replayed on top of the snapshot.
    pub journal_records: usize,
    /// Problems that were recovered from.
    pub warnings: Vec<LoadWarning>,
}

/// Persistent map from action key to sealed [`Entry`].
///
/// Single-writer: one owning thread drives `get`/`put`/`remove`/`save`.
/// Running two stores against the same root at once is unsupported.
pub struct JournaledStore {
    snapshot_path: PathBuf,
    journal_path: PathBuf,
    config: CacheConfig,
    fs: Arc<dyn CacheFs>,
    stamps: StampClock,
    /// Current logical state.
    live: BTreeMap<String, Entry>,
    /// Keys whose current value (or absence) is not yet on disk.
    dirty: BTreeSet<String>,
    /// Stamp of the snapshot on disk, if one was loaded or written.
    base_stamp: Option<Stamp>,
    /// Records in the on-disk journal since the last full save.
    journal_len: usize,
    report: LoadReport,
}

impl JournaledStore {
    /// Open the cache rooted at `root` on local disk.
    ///
    /// A corrupt snapshot fails with [`CacheError::CorruptData`]; see
    /// [`JournaledStore::open_or_empty`] for the lenient variant.
    pub fn open(root: impl AsRef<Path>, config: CacheConfig) -> CacheResult<Self> {
        let fs = Arc::new(LocalFs::new(config.sync_writes));
        Self::open_with(root, config, fs, Arc::new(SystemClock))
    }

    /// Like [`JournaledStore::open`], but a corrupt snapshot yields an empty
    /// store with a [`LoadWarning::SnapshotCorrupt`].
    pub fn open_or_empty(root: impl AsRef<Path>, config: CacheConfig) -> CacheResult<Self> {
        let fs = Arc::new(LocalFs::new(config.sync_writes));
        Self::open_or_empty_with(root, config, fs, Arc::new(SystemClock))
    }

    /// Open with injected file-system and clock capabilities.
    pub fn open_with(
        root: impl AsRef<Path>,
        config: CacheConfig,
        fs: Arc<dyn CacheFs>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let mut store = Self::empty(root.as_ref(), config, fs, clock)?;
        store.load()?;
        Ok(store)
    }

    /// Lenient [`JournaledStore::open_with`].
    pub fn open_or_empty_with(
        root: impl AsRef<Path>,
        config: CacheConfig,
        fs: Arc<dyn CacheFs>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let mut store = Self::empty(root.as_ref(), config, fs, clock)?;
        match store.load() {
            Ok(()) => Ok(store),
            Err(CacheError::CorruptData { path, reason }) => {
                warn!(path = %path.display(), %reason, "snapshot corrupt; starting empty");
                store.report.warnings.push(LoadWarning::SnapshotCorrupt { reason });
                Ok(store)
            }
            Err(e) => Err(e),
        }
    }

    fn empty(
        root: &Path,
        config: CacheConfig,
        fs: Arc<dyn CacheFs>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            snapshot_path: snapshot_path(root),
            journal_path: journal_path(root),
            config,
            fs,
            stamps: StampClock::new(clock),
            live: BTreeMap::new(),
            dirty: BTreeSet::new(),
            base_stamp: None,
            journal_len: 0,
            report: LoadReport::default(),
        })
    }

    /// Rebuild `live` from the snapshot and journal.
    ///
    /// On error nothing is modified.
    fn load(&mut self) -> CacheResult<()> {
        let mut live = BTreeMap::new();
        let mut base_stamp = None;
        let mut report = LoadReport::default();

        if let Some(bytes) = self.fs.read(&self.snapshot_path)? {
            let snapshot = codec::decode_snapshot(&bytes, &self.snapshot_path)?;
            report.snapshot_entries = snapshot.entries.len();
            live.extend(snapshot.entries);
            base_stamp = Some(snapshot.stamp);
            self.stamps.observe(snapshot.stamp);
        }

        if let Some(bytes) = self.fs.read(&self.journal_path)? {
            match codec::decode_journal(&bytes, base_stamp, &self.journal_path) {
                Ok(replay) => {
                    report.journal_records = replay.records.len();
                    for record in replay.records {
                        match record {
                            JournalRecord::Put { key, entry } => {
                                live.insert(key, entry);
                            }
                            JournalRecord::Remove { key } => {
                                live.remove(&key);
                            }
                        }
                    }
                    match replay.stop {
                        Some(ReplayStop::Truncated { offset }) => {
                            warn!(offset, "journal ends in an incomplete record; ignoring tail");
                            report.warnings.push(LoadWarning::JournalTruncated { offset });
                        }
                        Some(ReplayStop::Corrupt { offset, reason }) => {
                            warn!(offset, %reason, "corrupt journal record; replay stopped");
                            report.warnings.push(LoadWarning::JournalCorrupt { offset, reason });
                        }
                        None => {}
                    }
                }
                Err(CacheError::StaleJournal { expected, found }) => {
                    self.stamps.observe(found);
                    let warning = match expected {
                        Some(expected) => LoadWarning::StaleJournal { expected, found },
                        None => LoadWarning::OrphanJournal { found },
                    };
                    warn!(%warning, "ignoring journal");
                    report.warnings.push(warning);
                }
                Err(CacheError::CorruptData { reason, .. }) => {
                    warn!(%reason, "journal header corrupt; ignoring journal");
                    report
                        .warnings
                        .push(LoadWarning::JournalCorrupt { offset: 0, reason });
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            snapshot_entries = report.snapshot_entries,
            journal_records = report.journal_records,
            live = live.len(),
            "action cache loaded"
        );

        self.live = live;
        self.base_stamp = base_stamp;
        self.journal_len = report.journal_records;
        self.dirty.clear();
        self.report = report;
        Ok(())
    }

    // ---------------------------------------------------------------
    // In-memory operations
    // ---------------------------------------------------------------

    /// A new, empty building entry for `action_key`.
    pub fn create_entry(&self, action_key: impl Into<String>) -> Entry {
        Entry::new(action_key)
    }

    /// Look up a key. No side effects.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.live.get(key)
    }

    /// Store a sealed entry under `key`.
    ///
    /// Fails with [`CacheError::InvalidState`] if `entry` is still building;
    /// call [`Entry::digest`] first.
    pub fn put(&mut self, key: impl Into<String>, entry: Entry) -> CacheResult<()> {
        if !entry.is_sealed() {
            return Err(CacheError::InvalidState {
                action_key: entry.action_key().to_string(),
                reason: "only sealed entries can be stored".into(),
            });
        }
        let key = key.into();
        self.dirty.insert(key.clone());
        self.live.insert(key, entry);
        Ok(())
    }

    /// Remove `key`, recording a tombstone for the next save.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.dirty.insert(key.to_string());
        self.live.remove(key)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        let live = std::mem::take(&mut self.live);
        self.dirty.extend(live.into_keys());
    }

    /// Cache-hit query for the build orchestrator.
    pub fn lookup(&self, action_key: &str) -> Option<&Entry> {
        self.get(action_key)
    }

    /// Store a freshly computed, sealed entry.
    pub fn record(&mut self, action_key: impl Into<String>, entry: Entry) -> CacheResult<()> {
        self.put(action_key, entry)
    }

    /// Drop a stale entry.
    pub fn invalidate(&mut self, action_key: &str) -> Option<Entry> {
        self.remove(action_key)
    }

    /// Flush pending changes to disk.
    pub fn persist(&mut self) -> CacheResult<SaveOutcome> {
        self.save()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Live keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.live.keys().map(String::as_str)
    }

    /// Number of keys changed since the last save.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Number of records in the journal on disk since the last full save.
    pub fn journal_len(&self) -> usize {
        self.journal_len
    }

    /// Stamp of the snapshot the store is based on.
    pub fn base_stamp(&self) -> Option<Stamp> {
        self.base_stamp
    }

    /// What was recovered when the store was opened.
    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    /// The configuration in effect.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Snapshot file location.
    pub fn snapshot_file(&self) -> &Path {
        &self.snapshot_path
    }

    /// Journal file location.
    pub fn journal_file(&self) -> &Path {
        &self.journal_path
    }

    /// Write every entry, in key order, in human-readable form.
    pub fn dump(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "Action cache ({} records):", self.live.len())?;
        for (key, entry) in &self.live {
            write!(out, "{key} -> \n{entry}")?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Persist dirty keys.
    ///
    /// Chooses an incremental journal append or a full snapshot rewrite. On
    /// error the in-memory state is unchanged apart from what the disk now
    /// proves, so calling `save` again is always safe.
    pub fn save(&mut self) -> CacheResult<SaveOutcome> {
        if self.dirty.is_empty() {
            return Ok(SaveOutcome::Unchanged);
        }
        let ratio = self.journal_ratio();
        debug!(
            ratio,
            dirty = self.dirty.len(),
            journal_len = self.journal_len,
            "choosing save strategy"
        );
        match self.base_stamp {
            Some(base) if !self.should_compact() => self.save_incremental(base),
            _ => self.save_full(),
        }
    }

    /// Fold the journal and any dirty keys into a new snapshot.
    pub fn compact(&mut self) -> CacheResult<SaveOutcome> {
        if self.dirty.is_empty() && self.journal_len == 0 && self.base_stamp.is_some() {
            return Ok(SaveOutcome::Unchanged);
        }
        self.save_full()
    }

    /// Pending journal records relative to the live map size.
    pub fn journal_ratio(&self) -> f64 {
        let pending = self.journal_len + self.dirty.len();
        pending as f64 / self.live.len().max(1) as f64
    }

    fn should_compact(&self) -> bool {
        self.journal_ratio() > self.config.compaction_ratio
    }

    fn save_full(&mut self) -> CacheResult<SaveOutcome> {
        let stamp = self.stamps.next();
        let bytes = codec::encode_snapshot(
            stamp,
            self.live.iter().map(|(key, entry)| (key.as_str(), entry)),
        )?;
        self.fs.write_atomic(&self.snapshot_path, &bytes)?;

        // The new snapshot is on disk; any surviving journal now carries a
        // stale base stamp and will be ignored on open.
        self.base_stamp = Some(stamp);
        self.journal_len = 0;
        self.fs.delete(&self.journal_path)?;

        let entries = self.live.len();
        debug!(entries, %stamp, bytes = bytes.len(), "full save");
        self.dirty.clear();
        Ok(SaveOutcome::Full { entries, stamp })
    }

    fn save_incremental(&mut self, base: Stamp) -> CacheResult<SaveOutcome> {
        let (mut buf, kept) = match self.fs.read(&self.journal_path)? {
            Some(existing) => match codec::decode_journal(&existing, Some(base), &self.journal_path)
            {
                Ok(replay) => {
                    let mut buf = existing;
                    buf.truncate(replay.valid_len);
                    (buf, replay.records.len())
                }
                Err(CacheError::StaleJournal { .. } | CacheError::CorruptData { .. }) => {
                    debug!("replacing unusable journal");
                    (codec::encode_journal_header(base), 0)
                }
                Err(e) => return Err(e),
            },
            None => (codec::encode_journal_header(base), 0),
        };

        for key in &self.dirty {
            match self.live.get(key) {
                Some(entry) => codec::append_put(&mut buf, key, entry)?,
                None => codec::append_remove(&mut buf, key)?,
            }
        }
        self.fs.write_atomic(&self.journal_path, &buf)?;

        let records = self.dirty.len();
        self.journal_len = kept + records;
        self.dirty.clear();
        debug!(records, journal_len = self.journal_len, "incremental save");
        Ok(SaveOutcome::Incremental { records })
    }
}

impl fmt::Debug for JournaledStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournaledStore")
            .field("snapshot_path", &self.snapshot_path)
            .field("entries", &self.live.len())
            .field("dirty", &self.dirty.len())
            .field("journal_len", &self.journal_len)
            .field("base_stamp", &self.base_stamp)
            .finish()
    }
}
