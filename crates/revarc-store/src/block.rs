//! The physical packing unit: an ordered sequence of link digests.

use serde::{Deserialize, Serialize};

use revarc_types::ContentDigest;

/// An ordered, appendable sequence of link digests.
///
/// Blocks are the unit of physical storage and compaction. Insertion order
/// is significant; duplicates are not rejected but compaction drops them.
/// Once a block is committed to an archive it is immutable, except for the
/// manifest bootstrap which reserves the right to prepend a single digest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    digests: Vec<ContentDigest>,
}

impl Block {
    /// Create an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a block from an ordered list of digests.
    pub fn from_digests(digests: Vec<ContentDigest>) -> Self {
        Self { digests }
    }

    /// The digests, in insertion order.
    pub fn digests(&self) -> &[ContentDigest] {
        &self.digests
    }

    /// Number of digests in the block.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Returns `true` if the block holds no digests.
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Returns `true` if the block contains `digest`.
    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.digests.contains(digest)
    }

    /// Append one digest at the end.
    pub fn append(&mut self, digest: ContentDigest) {
        self.digests.push(digest);
    }

    /// Append many digests at the end, preserving their order.
    pub fn append_all<I: IntoIterator<Item = ContentDigest>>(&mut self, digests: I) {
        self.digests.extend(digests);
    }

    /// Insert one digest at the front.
    ///
    /// Reserved for the archive-manifest bootstrap; everything else appends.
    pub fn prepend(&mut self, digest: ContentDigest) {
        self.digests.insert(0, digest);
    }
}
