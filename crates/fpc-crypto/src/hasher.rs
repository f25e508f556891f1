use fpc_types::{Digest, Metadata};

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"fpc-file-v1"`, `"fpc-entry-v1"`)
/// that is prepended to every hash computation. A file whose bytes happen to
/// equal the canonical encoding of an entry still hashes differently.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for output file contents.
    pub const FILE: Self = Self {
        domain: "fpc-file-v1",
    };
    /// Hasher for overall action cache entry fingerprints.
    pub const ENTRY: Self = Self {
        domain: "fpc-entry-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Digest {
        let mut builder = self.builder();
        builder.update(data);
        builder.finalize()
    }

    /// Content metadata (digest plus size) for a file's bytes.
    pub fn metadata(&self, data: &[u8]) -> Metadata {
        Metadata::content(self.hash(data), data.len() as u64)
    }

    /// Verify that data produces the expected digest.
    pub fn verify(&self, data: &[u8], expected: &Digest) -> bool {
        self.hash(data) == *expected
    }

    /// Start an incremental hash in this domain.
    pub fn builder(&self) -> DigestBuilder {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        DigestBuilder { hasher }
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Incremental, domain-separated digest computation.
pub struct DigestBuilder {
    hasher: blake3::Hasher,
}

impl DigestBuilder {
    /// Feed raw bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(data);
        self
    }

    /// Feed bytes preceded by their little-endian `u64` length, so adjacent
    /// variable-length fields cannot run into each other.
    pub fn update_prefixed(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
        self
    }

    /// Feed a little-endian `u64`.
    pub fn update_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    /// Finish and return the digest.
    pub fn finalize(&self) -> Digest {
        Digest::from_hash(*self.hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::FILE.hash(data), ContentHasher::FILE.hash(data));
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        assert_ne!(ContentHasher::FILE.hash(data), ContentHasher::ENTRY.hash(data));
    }

    #[test]
    fn verify_correct_and_incorrect_data() {
        let id = ContentHasher::FILE.hash(b"original");
        assert!(ContentHasher::FILE.verify(b"original", &id));
        assert!(!ContentHasher::FILE.verify(b"tampered", &id));
    }

    #[test]
    fn metadata_records_size() {
        let m = ContentHasher::FILE.metadata(b"12345");
        assert_eq!(
            m,
            Metadata::content(ContentHasher::FILE.hash(b"12345"), 5)
        );
    }

    #[test]
    fn length_prefix_separates_fields() {
        let mut a = ContentHasher::ENTRY.builder();
        a.update_prefixed(b"ab").update_prefixed(b"c");
        let mut b = ContentHasher::ENTRY.builder();
        b.update_prefixed(b"a").update_prefixed(b"bc");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn builder_matches_one_shot_hash() {
        let mut builder = ContentHasher::FILE.builder();
        builder.update(b"hello ").update(b"world");
        assert_eq!(builder.finalize(), ContentHasher::FILE.hash(b"hello world"));
    }

    #[test]
    fn custom_domain() {
        let hasher = ContentHasher::new("my-custom-domain-v1");
        assert_eq!(hasher.domain(), "my-custom-domain-v1");
        assert_ne!(hasher.hash(b"data"), ContentHasher::FILE.hash(b"data"));
    }
}
