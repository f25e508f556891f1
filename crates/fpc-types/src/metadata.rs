use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::{Digest, DIGEST_LEN};

const TAG_CONTENT: u8 = 0x01;
const TAG_CONSTANT: u8 = 0x02;

/// Fingerprint of a single action output.
///
/// `Constant` marks outputs whose content is never compared (symlinks,
/// placeholder outputs): presence alone is enough for a cache hit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metadata {
    /// Content hash plus size of a regular file.
    Content { digest: Digest, size: u64 },
    /// Sentinel for outputs that need no content comparison.
    Constant,
}

impl Metadata {
    /// Build content metadata from a digest supplied by the caller.
    pub fn content(digest: Digest, size: u64) -> Self {
        Self::Content { digest, size }
    }

    /// Returns `true` for the constant sentinel.
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant)
    }

    /// Canonical byte encoding fed into entry fingerprints.
    ///
    /// Content metadata is `tag | digest | size (LE)`; the constant sentinel
    /// is the lone tag byte.
    pub fn fingerprint_bytes(&self) -> Vec<u8> {
        match self {
            Self::Content { digest, size } => {
                let mut out = Vec::with_capacity(1 + DIGEST_LEN + 8);
                out.push(TAG_CONTENT);
                out.extend_from_slice(digest.as_bytes());
                out.extend_from_slice(&size.to_le_bytes());
                out
            }
            Self::Constant => vec![TAG_CONSTANT],
        }
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content { digest, size } => write!(f, "{digest} ({size} bytes)"),
            Self::Constant => f.write_str("<constant>"),
        }
    }
}
