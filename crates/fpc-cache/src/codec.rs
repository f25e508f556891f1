//! Binary encoding of snapshot and journal files.
//!
//! Both files share a 20-byte header and a CRC-checked frame format:
//!
//! ```text
//! header:  [4 bytes: magic][4 bytes: format version (LE u32)][12 bytes: stamp]
//! frame:   [4 bytes: body length (LE u32)][4 bytes: CRC32 of body (LE u32)][body]
//! ```
//!
//! A snapshot is `header | entry count (LE u32) | count x frame`, where each
//! body is the bincode encoding of `(key, entry record)`. Any defect makes
//! the whole snapshot corrupt.
//!
//! A journal is `header | frame*`, where each body is an opcode byte
//! followed by the bincode-encoded key and, for PUT, the entry record. The
//! journal is decoded record by record: a short tail is an interrupted
//! append and ends replay silently; a CRC mismatch or unknown opcode ends
//! replay at that record. Records before the stop point are kept.

use std::collections::BTreeMap;
use std::path::Path;

use fpc_types::{Digest, Metadata, Stamp};
use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::error::{CacheError, CacheResult};

/// Magic bytes opening a snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"FPCS";

/// Magic bytes opening a journal file.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FPCJ";

/// Current on-disk format version. Increment on breaking changes.
pub const FORMAT_VERSION: u32 = 1;

/// Header size: magic + version + stamp.
pub const HEADER_LEN: usize = 4 + 4 + Stamp::ENCODED_LEN;

/// Frame header size: 4 bytes length + 4 bytes CRC.
const FRAME_HEADER_LEN: usize = 8;

/// Journal record kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Upsert an entry.
    Put = 1,
    /// Delete a key (idempotent tombstone).
    Remove = 2,
}

impl Opcode {
    /// Parse an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Put),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// One decoded journal record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalRecord {
    /// `live[key] = entry`.
    Put { key: String, entry: Entry },
    /// Remove `key` if present.
    Remove { key: String },
}

impl JournalRecord {
    /// The key this record applies to.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Remove { key } => key,
        }
    }

    /// The record's opcode.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Put { .. } => Opcode::Put,
            Self::Remove { .. } => Opcode::Remove,
        }
    }
}

/// A fully decoded snapshot file.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Stamp of the full save that wrote the file.
    pub stamp: Stamp,
    /// Entries in file order.
    pub entries: Vec<(String, Entry)>,
}

/// Why journal replay ended before the end of the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayStop {
    /// The tail holds an incomplete record (interrupted append).
    Truncated { offset: usize },
    /// A record failed validation.
    Corrupt { offset: usize, reason: String },
}

/// Result of decoding a journal file.
#[derive(Clone, Debug)]
pub struct JournalReplay {
    /// Stamp of the snapshot this journal extends.
    pub base_stamp: Stamp,
    /// Complete, valid records in append order.
    pub records: Vec<JournalRecord>,
    /// Byte length of the header plus all valid records.
    pub valid_len: usize,
    /// Set if decoding stopped before the end of the file.
    pub stop: Option<ReplayStop>,
}

#[derive(Serialize)]
struct EntryRecordRef<'a> {
    action_key: &'a str,
    outputs: Vec<(&'a str, &'a Metadata)>,
    digest: Digest,
}

#[derive(Deserialize)]
struct EntryRecord {
    action_key: String,
    outputs: Vec<(String, Metadata)>,
    digest: Digest,
}

// ---------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------

/// Encode a complete snapshot file.
///
/// Every entry must be sealed; a building entry fails with
/// [`CacheError::InvalidState`].
pub fn encode_snapshot<'a, I>(stamp: Stamp, entries: I) -> CacheResult<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a Entry)>,
{
    let mut out = encode_header(SNAPSHOT_MAGIC, stamp);
    let count_at = out.len();
    out.extend_from_slice(&0u32.to_le_bytes());

    let mut count: u32 = 0;
    for (key, entry) in entries {
        let body = serialize(&(key, entry_record(entry)?))?;
        push_frame(&mut out, &body)?;
        count = count
            .checked_add(1)
            .ok_or_else(|| CacheError::Serialization("too many entries for one snapshot".into()))?;
    }
    out[count_at..count_at + 4].copy_from_slice(&count.to_le_bytes());
    Ok(out)
}

/// Encode a journal header for a journal extending the snapshot `base`.
pub fn encode_journal_header(base: Stamp) -> Vec<u8> {
    encode_header(JOURNAL_MAGIC, base)
}

/// Append a PUT record to an encoded journal.
pub fn append_put(buf: &mut Vec<u8>, key: &str, entry: &Entry) -> CacheResult<()> {
    let mut body = vec![Opcode::Put as u8];
    body.extend(serialize(&(key, entry_record(entry)?))?);
    push_frame(buf, &body)
}

/// Append a REMOVE record to an encoded journal.
pub fn append_remove(buf: &mut Vec<u8>, key: &str) -> CacheResult<()> {
    let mut body = vec![Opcode::Remove as u8];
    body.extend(serialize(&key)?);
    push_frame(buf, &body)
}

fn encode_header(magic: [u8; 4], stamp: Stamp) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(&magic);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&stamp.to_le_bytes());
    out
}

fn entry_record(entry: &Entry) -> CacheResult<EntryRecordRef<'_>> {
    let digest = entry.sealed_digest().ok_or_else(|| CacheError::InvalidState {
        action_key: entry.action_key().to_string(),
        reason: "cannot encode an unsealed entry".into(),
    })?;
    Ok(EntryRecordRef {
        action_key: entry.action_key(),
        outputs: entry.outputs().collect(),
        digest,
    })
}

fn serialize<T: Serialize>(value: &T) -> CacheResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))
}

fn push_frame(buf: &mut Vec<u8>, body: &[u8]) -> CacheResult<()> {
    let length = u32::try_from(body.len())
        .map_err(|_| CacheError::Serialization(format!("record of {} bytes too large", body.len())))?;
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(body).to_le_bytes());
    buf.extend_from_slice(body);
    Ok(())
}

// ---------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------

/// Decode a snapshot file. Any defect is [`CacheError::CorruptData`].
pub fn decode_snapshot(bytes: &[u8], source: &Path) -> CacheResult<Snapshot> {
    let stamp = decode_header(bytes, SNAPSHOT_MAGIC, source)?;
    let count_end = HEADER_LEN + 4;
    let count_bytes = bytes
        .get(HEADER_LEN..count_end)
        .ok_or_else(|| CacheError::corrupt(source, "truncated entry count"))?;
    let count = u32::from_le_bytes(le4(count_bytes));

    let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
    let mut offset = count_end;
    for index in 0..count {
        let (body, next) = match read_frame(bytes, offset) {
            Frame::Complete { body, next } => (body, next),
            Frame::End | Frame::Truncated => {
                return Err(CacheError::corrupt(
                    source,
                    format!("truncated at entry {index} of {count} (offset {offset})"),
                ));
            }
            Frame::Corrupt(reason) => {
                return Err(CacheError::corrupt(
                    source,
                    format!("entry {index} at offset {offset}: {reason}"),
                ));
            }
        };
        let (key, record): (String, EntryRecord) = bincode::deserialize(body).map_err(|e| {
            CacheError::corrupt(source, format!("entry {index} at offset {offset}: {e}"))
        })?;
        let entry = entry_from_record(record)
            .map_err(|reason| CacheError::corrupt(source, format!("entry {key}: {reason}")))?;
        entries.push((key, entry));
        offset = next;
    }

    if offset != bytes.len() {
        return Err(CacheError::corrupt(
            source,
            format!("{} trailing bytes after {count} entries", bytes.len() - offset),
        ));
    }

    Ok(Snapshot { stamp, entries })
}

/// Decode a journal file extending the snapshot stamped `expected_base`.
///
/// Header defects are [`CacheError::CorruptData`]; a base stamp that differs
/// from `expected_base` (or any journal when no snapshot is loaded) is
/// [`CacheError::StaleJournal`]. Record-level defects never fail the call;
/// they end replay and are reported in [`JournalReplay::stop`].
pub fn decode_journal(
    bytes: &[u8],
    expected_base: Option<Stamp>,
    source: &Path,
) -> CacheResult<JournalReplay> {
    let base_stamp = decode_header(bytes, JOURNAL_MAGIC, source)?;
    if expected_base != Some(base_stamp) {
        return Err(CacheError::StaleJournal {
            expected: expected_base,
            found: base_stamp,
        });
    }

    let mut records = Vec::new();
    let mut offset = HEADER_LEN;
    let stop = loop {
        let (body, next) = match read_frame(bytes, offset) {
            Frame::End => break None,
            Frame::Truncated => break Some(ReplayStop::Truncated { offset }),
            Frame::Corrupt(reason) => break Some(ReplayStop::Corrupt { offset, reason }),
            Frame::Complete { body, next } => (body, next),
        };
        match decode_record(body) {
            Ok(record) => records.push(record),
            Err(reason) => break Some(ReplayStop::Corrupt { offset, reason }),
        }
        offset = next;
    };

    Ok(JournalReplay {
        base_stamp,
        records,
        valid_len: offset,
        stop,
    })
}

fn decode_header(bytes: &[u8], magic: [u8; 4], source: &Path) -> CacheResult<Stamp> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::corrupt(
            source,
            format!("truncated header: {} of {HEADER_LEN} bytes", bytes.len()),
        ));
    }
    if bytes[..4] != magic {
        return Err(CacheError::corrupt(
            source,
            format!(
                "bad magic: expected {:?}, got {:?}",
                String::from_utf8_lossy(&magic),
                String::from_utf8_lossy(&bytes[..4])
            ),
        ));
    }
    let version = u32::from_le_bytes(le4(&bytes[4..8]));
    if version != FORMAT_VERSION {
        return Err(CacheError::corrupt(
            source,
            format!("unsupported format version {version} (expected {FORMAT_VERSION})"),
        ));
    }
    let mut stamp = [0u8; Stamp::ENCODED_LEN];
    stamp.copy_from_slice(&bytes[8..HEADER_LEN]);
    Ok(Stamp::from_le_bytes(stamp))
}

fn decode_record(body: &[u8]) -> Result<JournalRecord, String> {
    let (&op, payload) = body.split_first().ok_or("empty record body")?;
    match Opcode::from_byte(op) {
        Some(Opcode::Put) => {
            let (key, record): (String, EntryRecord) =
                bincode::deserialize(payload).map_err(|e| format!("undecodable PUT: {e}"))?;
            let entry = entry_from_record(record).map_err(|reason| format!("PUT {key}: {reason}"))?;
            Ok(JournalRecord::Put { key, entry })
        }
        Some(Opcode::Remove) => {
            let key: String =
                bincode::deserialize(payload).map_err(|e| format!("undecodable REMOVE: {e}"))?;
            Ok(JournalRecord::Remove { key })
        }
        None => Err(format!("unknown opcode {op:#04x}")),
    }
}

fn entry_from_record(record: EntryRecord) -> Result<Entry, String> {
    let expected = record.outputs.len();
    let outputs: BTreeMap<String, Metadata> = record.outputs.into_iter().collect();
    if outputs.len() != expected {
        return Err("duplicate output paths".into());
    }
    let entry = Entry::from_parts(record.action_key, outputs, record.digest);
    if !entry.verify_digest() {
        return Err("stored digest does not match outputs".into());
    }
    Ok(entry)
}

enum Frame<'a> {
    /// No bytes left at this offset.
    End,
    /// Fewer bytes remain than the frame claims.
    Truncated,
    /// The frame is complete but invalid.
    Corrupt(String),
    Complete { body: &'a [u8], next: usize },
}

fn read_frame(bytes: &[u8], offset: usize) -> Frame<'_> {
    if offset == bytes.len() {
        return Frame::End;
    }
    let Some(header) = bytes.get(offset..offset + FRAME_HEADER_LEN) else {
        return Frame::Truncated;
    };
    let length = u32::from_le_bytes(le4(&header[..4])) as usize;
    let expected_crc = u32::from_le_bytes(le4(&header[4..]));
    if length == 0 {
        return Frame::Corrupt("zero-length record".into());
    }

    let start = offset + FRAME_HEADER_LEN;
    let Some(body) = start.checked_add(length).and_then(|end| bytes.get(start..end)) else {
        return Frame::Truncated;
    };
    let actual_crc = crc32fast::hash(body);
    if actual_crc != expected_crc {
        return Frame::Corrupt(format!(
            "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        ));
    }
    Frame::Complete {
        body,
        next: start + length,
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> &'static Path {
        Path::new("/cache/test")
    }

    fn sealed(key: &str, files: &[(&str, Metadata)]) -> Entry {
        let mut entry = Entry::new(key);
        for (path, md) in files {
            entry.add_file(*path, *md).unwrap();
        }
        entry.digest();
        entry
    }

    fn sample() -> Vec<(String, Entry)> {
        vec![
            ("a".to_string(), sealed("a", &[("out/a.o", Metadata::Constant)])),
            (
                "b".to_string(),
                sealed(
                    "b",
                    &[
                        ("out/b.o", Metadata::content(Digest::from_hash([4; 32]), 77)),
                        ("out/b.h", Metadata::Constant),
                    ],
                ),
            ),
        ]
    }

    fn encode_sample(stamp: Stamp) -> Vec<u8> {
        let entries = sample();
        encode_snapshot(stamp, entries.iter().map(|(k, e)| (k.as_str(), e))).unwrap()
    }

    fn journal_with(records: usize) -> (Vec<u8>, Stamp) {
        let base = Stamp::new(5, 0);
        let mut buf = encode_journal_header(base);
        for i in 0..records {
            let key = format!("k{i}");
            append_put(&mut buf, &key, &sealed(&key, &[])).unwrap();
        }
        (buf, base)
    }

    #[test]
    fn snapshot_roundtrip() {
        let stamp = Stamp::new(1234, 2);
        let decoded = decode_snapshot(&encode_sample(stamp), src()).unwrap();
        assert_eq!(decoded.stamp, stamp);
        assert_eq!(decoded.entries, sample());
    }

    #[test]
    fn empty_snapshot() {
        let bytes = encode_snapshot(Stamp::zero(), std::iter::empty()).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        assert!(decode_snapshot(&bytes, src()).unwrap().entries.is_empty());
    }

    #[test]
    fn encode_rejects_building_entry() {
        let building = Entry::new("unsealed");
        let err = encode_snapshot(Stamp::zero(), [("k", &building)]).unwrap_err();
        assert!(matches!(err, CacheError::InvalidState { .. }));

        let mut buf = encode_journal_header(Stamp::zero());
        assert!(matches!(
            append_put(&mut buf, "k", &building),
            Err(CacheError::InvalidState { .. })
        ));
    }

    #[test]
    fn snapshot_bad_magic() {
        let mut bytes = encode_sample(Stamp::zero());
        bytes[..4].copy_from_slice(b"BAAD");
        let err = decode_snapshot(&bytes, src()).unwrap_err();
        assert!(matches!(err, CacheError::CorruptData { ref reason, .. } if reason.contains("magic")));
    }

    #[test]
    fn snapshot_bad_version() {
        let mut bytes = encode_sample(Stamp::zero());
        bytes[4..8].copy_from_slice(&999u32.to_le_bytes());
        let err = decode_snapshot(&bytes, src()).unwrap_err();
        assert!(matches!(err, CacheError::CorruptData { ref reason, .. } if reason.contains("999")));
    }

    #[test]
    fn snapshot_truncated_anywhere_is_corrupt() {
        let bytes = encode_sample(Stamp::zero());
        for cut in [0, 3, HEADER_LEN, HEADER_LEN + 2, HEADER_LEN + 10, bytes.len() - 1] {
            assert!(
                matches!(decode_snapshot(&bytes[..cut], src()), Err(CacheError::CorruptData { .. })),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn snapshot_trailing_bytes_are_corrupt() {
        let mut bytes = encode_sample(Stamp::zero());
        bytes.push(0);
        assert!(matches!(
            decode_snapshot(&bytes, src()),
            Err(CacheError::CorruptData { .. })
        ));
    }

    #[test]
    fn snapshot_flipped_payload_byte_is_corrupt() {
        let mut bytes = encode_sample(Stamp::zero());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = decode_snapshot(&bytes, src()).unwrap_err();
        assert!(matches!(err, CacheError::CorruptData { ref reason, .. } if reason.contains("CRC")));
    }

    #[test]
    fn journal_roundtrip() {
        let base = Stamp::new(42, 1);
        let entry = sealed("x", &[("o", Metadata::Constant)]);
        let mut buf = encode_journal_header(base);
        append_put(&mut buf, "x", &entry).unwrap();
        append_remove(&mut buf, "y").unwrap();

        let replay = decode_journal(&buf, Some(base), src()).unwrap();
        assert_eq!(replay.base_stamp, base);
        assert_eq!(replay.valid_len, buf.len());
        assert!(replay.stop.is_none());
        assert_eq!(
            replay.records,
            vec![
                JournalRecord::Put {
                    key: "x".into(),
                    entry
                },
                JournalRecord::Remove { key: "y".into() },
            ]
        );
        assert_eq!(replay.records[1].opcode(), Opcode::Remove);
        assert_eq!(replay.records[1].key(), "y");
    }

    #[test]
    fn journal_header_only() {
        let base = Stamp::new(1, 0);
        let replay = decode_journal(&encode_journal_header(base), Some(base), src()).unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, HEADER_LEN);
    }

    #[test]
    fn journal_with_other_base_is_stale() {
        let (buf, base) = journal_with(1);
        let other = Stamp::new(base.physical_ms + 1, 0);
        assert!(matches!(
            decode_journal(&buf, Some(other), src()),
            Err(CacheError::StaleJournal { found, .. }) if found == base
        ));
        assert!(matches!(
            decode_journal(&buf, None, src()),
            Err(CacheError::StaleJournal { expected: None, .. })
        ));
    }

    #[test]
    fn journal_truncated_tail_keeps_complete_records() {
        let (buf, base) = journal_with(3);
        let full = decode_journal(&buf, Some(base), src()).unwrap();

        for chop in 1..8 {
            let cut = &buf[..buf.len() - chop];
            let replay = decode_journal(cut, Some(base), src()).unwrap();
            assert_eq!(replay.records.len(), 2, "chop {chop}");
            assert!(matches!(replay.stop, Some(ReplayStop::Truncated { .. })));
            assert_eq!(replay.records[..], full.records[..2]);
            assert!(replay.valid_len < cut.len());
        }
    }

    #[test]
    fn journal_corrupt_record_stops_replay() {
        let (mut buf, base) = journal_with(3);
        let second = {
            let (one, _) = journal_with(1);
            one.len()
        };
        // Flip a byte inside the second record's body.
        buf[second + FRAME_HEADER_LEN + 2] ^= 0xff;

        let replay = decode_journal(&buf, Some(base), src()).unwrap();
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.valid_len, second);
        assert!(matches!(
            replay.stop,
            Some(ReplayStop::Corrupt { offset, ref reason }) if offset == second && reason.contains("CRC")
        ));
    }

    #[test]
    fn journal_unknown_opcode_stops_replay() {
        let base = Stamp::zero();
        let mut buf = encode_journal_header(base);
        append_remove(&mut buf, "ok").unwrap();
        let bad_at = buf.len();
        push_frame(&mut buf, &[0x7f, 0, 0]).unwrap();
        append_remove(&mut buf, "never-reached").unwrap();

        let replay = decode_journal(&buf, Some(base), src()).unwrap();
        assert_eq!(replay.records, vec![JournalRecord::Remove { key: "ok".into() }]);
        assert!(matches!(
            replay.stop,
            Some(ReplayStop::Corrupt { offset, ref reason }) if offset == bad_at && reason.contains("opcode")
        ));
    }

    #[test]
    fn journal_bad_header_is_corrupt() {
        let (mut buf, base) = journal_with(1);
        buf[0] = b'X';
        assert!(matches!(
            decode_journal(&buf, Some(base), src()),
            Err(CacheError::CorruptData { .. })
        ));
        assert!(matches!(
            decode_journal(&buf[..5], Some(base), src()),
            Err(CacheError::CorruptData { .. })
        ));
    }

    #[test]
    fn snapshot_is_not_a_journal() {
        let bytes = encode_sample(Stamp::zero());
        assert!(matches!(
            decode_journal(&bytes, Some(Stamp::zero()), src()),
            Err(CacheError::CorruptData { .. })
        ));
    }

    #[test]
    fn digest_mismatch_is_rejected() {
        let mut tampered = Entry::from_parts(
            "k",
            [("o".to_string(), Metadata::Constant)].into_iter().collect(),
            Digest::from_hash([0; 32]),
        );
        assert!(!tampered.verify_digest());
        let bytes = encode_snapshot(Stamp::zero(), [("k", &tampered)]).unwrap();
        let err = decode_snapshot(&bytes, src()).unwrap_err();
        assert!(matches!(err, CacheError::CorruptData { ref reason, .. } if reason.contains("digest")));
        // A sealed entry's digest stays fixed.
        assert_eq!(tampered.digest(), Digest::from_hash([0; 32]));
    }
}
