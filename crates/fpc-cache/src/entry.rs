//! Cached result of a single action.
//!
//! An [`Entry`] is built up output by output while the action's results are
//! being registered, then sealed exactly once when its overall fingerprint is
//! first requested. After sealing the outputs and the fingerprint are frozen,
//! so the stored digest can never drift from the outputs it summarizes.

use std::collections::BTreeMap;
use std::fmt;

use fpc_crypto::ContentHasher;
use fpc_types::{Digest, Metadata};

use crate::error::{CacheError, CacheResult};

/// Lifecycle state of an [`Entry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// Outputs may still be added; no fingerprint yet.
    Building,
    /// Outputs are frozen; the memoized fingerprint is attached.
    Sealed(Digest),
}

/// One action's cached result.
#[derive(Clone, PartialEq, Eq)]
pub struct Entry {
    action_key: String,
    /// Keyed by output path; `BTreeMap` gives the canonical lexicographic order.
    outputs: BTreeMap<String, Metadata>,
    state: EntryState,
}

impl Entry {
    /// Create an empty entry in the building state.
    pub fn new(action_key: impl Into<String>) -> Self {
        Self {
            action_key: action_key.into(),
            outputs: BTreeMap::new(),
            state: EntryState::Building,
        }
    }

    /// Rebuild a sealed entry from decoded parts.
    ///
    /// The digest is taken as given; use [`Entry::verify_digest`] to check it
    /// against the outputs.
    pub fn from_parts(
        action_key: impl Into<String>,
        outputs: BTreeMap<String, Metadata>,
        digest: Digest,
    ) -> Self {
        Self {
            action_key: action_key.into(),
            outputs,
            state: EntryState::Sealed(digest),
        }
    }

    /// Identifier of the action this entry describes.
    pub fn action_key(&self) -> &str {
        &self.action_key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Returns `true` once the fingerprint has been computed.
    pub fn is_sealed(&self) -> bool {
        matches!(self.state, EntryState::Sealed(_))
    }

    /// The memoized fingerprint, without sealing.
    pub fn sealed_digest(&self) -> Option<Digest> {
        match self.state {
            EntryState::Sealed(digest) => Some(digest),
            EntryState::Building => None,
        }
    }

    /// Record (or overwrite) the metadata of one output.
    ///
    /// Fails with [`CacheError::InvalidState`] once the entry is sealed.
    pub fn add_file(&mut self, path: impl Into<String>, metadata: Metadata) -> CacheResult<()> {
        let path = path.into();
        if self.is_sealed() {
            return Err(CacheError::InvalidState {
                action_key: self.action_key.clone(),
                reason: format!("cannot add output {path} to a sealed entry"),
            });
        }
        self.outputs.insert(path, metadata);
        Ok(())
    }

    /// The overall fingerprint. Seals the entry on first call.
    ///
    /// Later calls return the memoized value and change nothing.
    pub fn digest(&mut self) -> Digest {
        match self.state {
            EntryState::Sealed(digest) => digest,
            EntryState::Building => {
                let digest = self.compute_digest();
                self.state = EntryState::Sealed(digest);
                digest
            }
        }
    }

    /// Recompute the fingerprint and compare it to the sealed one.
    ///
    /// Always `false` for a building entry.
    pub fn verify_digest(&self) -> bool {
        self.sealed_digest() == Some(self.compute_digest())
    }

    /// Outputs in canonical (path) order.
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &Metadata)> {
        self.outputs.iter().map(|(path, md)| (path.as_str(), md))
    }

    /// Metadata recorded for one output path.
    pub fn output(&self, path: &str) -> Option<&Metadata> {
        self.outputs.get(path)
    }

    /// Number of recorded outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns `true` if no outputs are recorded.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Read-only textual rendering of the entry. Never seals.
    pub fn describe(&self) -> String {
        self.to_string()
    }

    fn compute_digest(&self) -> Digest {
        let mut builder = ContentHasher::ENTRY.builder();
        builder
            .update_prefixed(self.action_key.as_bytes())
            .update_u64(self.outputs.len() as u64);
        for (path, metadata) in &self.outputs {
            builder
                .update_prefixed(path.as_bytes())
                .update_prefixed(&metadata.fingerprint_bytes());
        }
        builder.finalize()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "      action key = {}", self.action_key)?;
        if let EntryState::Sealed(digest) = self.state {
            writeln!(f, "      digest = {digest}")?;
        }
        writeln!(f, "      outputs = {}", self.outputs.len())?;
        for (path, metadata) in &self.outputs {
            writeln!(f, "        {path}: {metadata}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("action_key", &self.action_key)
            .field("outputs", &self.outputs.len())
            .field("state", &self.state)
            .finish()
    }
}
