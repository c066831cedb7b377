//! Running hashers for link digests and whole-file digests.

use sha1::{Digest, Sha1};

use crate::digest::ContentDigest;

/// Streaming hasher for one link's content digest.
///
/// The link digest covers the header fields followed by the payload bytes:
/// big-endian `u32` payload length, one flags byte (bit 0 = end link), the
/// 20-byte parent digest, then the payload. The hasher is seeded with the
/// header and handed to whatever consumes the payload stream, so the payload
/// is hashed exactly once while it is read.
pub struct LinkHasher {
    inner: Sha1,
}

impl LinkHasher {
    /// Start a hasher seeded with the link header fields.
    pub fn for_link(data_length: u32, is_end: bool, parent: &ContentDigest) -> Self {
        let mut inner = Sha1::new();
        inner.update(data_length.to_be_bytes());
        inner.update([u8::from(is_end)]);
        inner.update(parent.as_bytes());
        Self { inner }
    }

    /// Fold payload bytes into the running hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the link's content digest.
    pub fn finish(self) -> ContentDigest {
        ContentDigest::from_hash(self.inner.finalize().into())
    }
}

/// Incremental hasher for whole-file content digests.
///
/// Used where file bytes stream through another consumer and buffering the
/// whole file just to hash it would be wasteful.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha1,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold content bytes into the running hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the content digest.
    pub fn finish(self) -> ContentDigest {
        ContentDigest::from_hash(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_hash_covers_header_and_payload() {
        let parent = ContentDigest::from_bytes(b"parent");
        let mut hasher = LinkHasher::for_link(3, true, &parent);
        hasher.update(b"abc");
        let digest = hasher.finish();

        // Same digest as hashing the concatenated fields directly.
        let mut raw = Vec::new();
        raw.extend_from_slice(&3u32.to_be_bytes());
        raw.push(1);
        raw.extend_from_slice(parent.as_bytes());
        raw.extend_from_slice(b"abc");
        assert_eq!(digest, ContentDigest::from_bytes(&raw));
    }

    #[test]
    fn link_hash_distinguishes_end_flag() {
        let parent = ContentDigest::NULL;
        let mut end = LinkHasher::for_link(1, true, &parent);
        end.update(b"x");
        let mut not_end = LinkHasher::for_link(1, false, &parent);
        not_end.update(b"x");
        assert_ne!(end.finish(), not_end.finish());
    }

    #[test]
    fn link_hash_distinguishes_parent() {
        let mut a = LinkHasher::for_link(1, true, &ContentDigest::NULL);
        a.update(b"x");
        let mut b = LinkHasher::for_link(1, true, &ContentDigest::from_bytes(b"parent"));
        b.update(b"x");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn content_hasher_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish(), ContentDigest::from_bytes(b"hello world"));
    }

    #[test]
    fn empty_content_hash_is_empty_digest() {
        assert_eq!(ContentHasher::new().finish(), ContentDigest::EMPTY);
    }
}
