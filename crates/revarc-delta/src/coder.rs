//! The delta-coder seam between the archive and a concrete diff algorithm.

use std::io::Read;
use std::sync::Arc;

use revarc_store::{DeltaLink, LinkDataFactory};
use revarc_types::ContentDigest;

use crate::error::DeltaResult;

/// Produces and applies byte-level deltas between file revisions.
///
/// The archive is written against this trait; the hunk-based
/// [`HunkDeltaCoder`](crate::HunkDeltaCoder) is the in-tree default, and
/// alternative algorithms plug in without touching archive code.
pub trait DeltaCoder: Send + Sync {
    /// Encode `target` into a new [`DeltaLink`] whose parent is `parent`.
    ///
    /// With `base` present the payload is a delta against it and the link is
    /// a non-end link. With `base` absent the payload carries the complete
    /// target content and the link is an end link. `force_full` stores the
    /// content without any compression attempt and is only legal without a
    /// base.
    ///
    /// The link is built through `factory`, so payload bytes are hashed
    /// exactly once while they stream into storage.
    fn make_delta(
        &self,
        factory: &dyn LinkDataFactory,
        parent: ContentDigest,
        base: Option<&mut dyn Read>,
        target: &mut dyn Read,
        force_full: bool,
    ) -> DeltaResult<DeltaLink>;

    /// Reconstruct file content from a chain of links, newest first.
    ///
    /// The first end link in the chain carries the base snapshot; the links
    /// before it are deltas applied oldest-first on top of it. A chain with
    /// no end link cannot be materialized.
    fn apply_deltas(&self, chain: &[Arc<DeltaLink>]) -> DeltaResult<Vec<u8>>;
}
