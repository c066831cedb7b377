use std::fmt;
use std::io::Read;
use std::sync::Arc;

use revarc_types::{ContentDigest, LinkHasher};

use crate::data::{LinkData, LinkDataFactory};
use crate::error::{StoreError, StoreResult};

/// One node of a file's revision chain.
///
/// A link couples a delta payload with the digest of its parent link; chains
/// are walked backward through `parent`. `is_end` marks the oldest
/// materialized revision reachable: either the true start of the file (null
/// parent) or the point where older history was truncated by compaction, in
/// which case the parent digest still names the vanished history.
///
/// Links are immutable. The digest is derived from every other field, so two
/// links are equal exactly when their digests are.
pub struct DeltaLink {
    data_length: u64,
    is_end: bool,
    digest: ContentDigest,
    parent: ContentDigest,
    data: Arc<dyn LinkData>,
}

impl DeltaLink {
    /// Build a fully-hashed link from a payload stream.
    ///
    /// The factory consumes exactly `data_length` bytes from `source`,
    /// materializing storage for them and folding them into the running
    /// link hash. Fails with [`StoreError::NullParentNotEnd`] when `parent`
    /// is null but `is_end` is false: a link with no parent must terminate
    /// its chain.
    pub fn make(
        data_length: u64,
        is_end: bool,
        parent: ContentDigest,
        source: &mut dyn Read,
        factory: &dyn LinkDataFactory,
    ) -> StoreResult<Self> {
        if parent.is_null() && !is_end {
            return Err(StoreError::NullParentNotEnd);
        }
        let hashed_length =
            u32::try_from(data_length).map_err(|_| StoreError::PayloadTooLarge(data_length))?;
        let mut hasher = LinkHasher::for_link(hashed_length, is_end, &parent);
        let data = factory.make_link_data(source, data_length, &mut hasher)?;
        Ok(Self {
            data_length,
            is_end,
            digest: hasher.finish(),
            parent,
            data,
        })
    }

    /// Payload length in bytes.
    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    /// Returns `true` if this link terminates its chain.
    pub fn is_end(&self) -> bool {
        self.is_end
    }

    /// The link's content digest.
    pub fn digest(&self) -> ContentDigest {
        self.digest
    }

    /// Digest of the parent link; null at the true start of a file.
    pub fn parent(&self) -> ContentDigest {
        self.parent
    }

    /// The payload storage.
    pub fn data(&self) -> &Arc<dyn LinkData> {
        &self.data
    }

    /// The payload bytes, materialized.
    pub fn payload(&self) -> StoreResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.data_length as usize);
        self.data.copy_to(&mut bytes)?;
        Ok(bytes)
    }
}

impl PartialEq for DeltaLink {
    fn eq(&self, other: &Self) -> bool {
        // The digest covers length, flags, parent, and payload.
        self.digest == other.digest
    }
}

impl Eq for DeltaLink {}

impl fmt::Debug for DeltaLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaLink")
            .field("digest", &self.digest.short_hex())
            .field("parent", &self.parent.short_hex())
            .field("len", &self.data_length)
            .field("end", &self.is_end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::data::RamLinkDataFactory;

    use super::*;

    fn make_link(payload: &[u8], is_end: bool, parent: ContentDigest) -> StoreResult<DeltaLink> {
        DeltaLink::make(
            payload.len() as u64,
            is_end,
            parent,
            &mut &payload[..],
            &RamLinkDataFactory::new(),
        )
    }

    #[test]
    fn make_computes_digest_over_header_and_payload() {
        let link = make_link(b"abc", true, ContentDigest::NULL).unwrap();

        let mut raw = Vec::new();
        raw.extend_from_slice(&3u32.to_be_bytes());
        raw.push(1);
        raw.extend_from_slice(ContentDigest::NULL.as_bytes());
        raw.extend_from_slice(b"abc");
        assert_eq!(link.digest(), ContentDigest::from_bytes(&raw));
    }

    #[test]
    fn null_parent_requires_end_flag() {
        let err = make_link(b"abc", false, ContentDigest::NULL).unwrap_err();
        assert!(matches!(err, StoreError::NullParentNotEnd));
    }

    #[test]
    fn end_link_may_still_have_a_parent() {
        // Truncated history: the chain ends here but names its ancestor.
        let parent = ContentDigest::from_bytes(b"older history");
        let link = make_link(b"abc", true, parent).unwrap();
        assert!(link.is_end());
        assert_eq!(link.parent(), parent);
    }

    #[test]
    fn equality_is_digest_equality() {
        let a = make_link(b"same", true, ContentDigest::NULL).unwrap();
        let b = make_link(b"same", true, ContentDigest::NULL).unwrap();
        let c = make_link(b"other", true, ContentDigest::NULL).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn payload_roundtrip() {
        let link = make_link(b"delta bytes", true, ContentDigest::NULL).unwrap();
        assert_eq!(link.payload().unwrap(), b"delta bytes");
        assert_eq!(link.data_length(), 11);
    }
}
