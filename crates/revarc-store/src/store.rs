//! The in-memory link arena: digest → immutable link record.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use revarc_types::ContentDigest;
use tracing::debug;

use crate::block::Block;
use crate::data::LinkDataFactory;
use crate::error::{StoreError, StoreResult};
use crate::link::DeltaLink;
use crate::wire;

/// Chain-walk traversal cap.
///
/// An unbounded walk is only a real risk when the caller refuses to stop at
/// end links, because a truncation boundary is the one place a parent digest
/// legitimately names a link the store will never hold.
pub const MAX_CHAIN_HOPS: usize = 33;

/// Arena of immutable links keyed by content digest.
///
/// Links are stored as `Arc<DeltaLink>`; lookups and chain walks hand out
/// shared references, never copies. The arena does not evict — growth is
/// bounded only by the owner, which drops unreferenced links through
/// compaction.
#[derive(Clone, Default)]
pub struct LinkStore {
    links: HashMap<ContentDigest, Arc<DeltaLink>>,
}

impl LinkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links in the store.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns `true` if the store holds no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Returns `true` if the store holds a link for `digest`.
    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.links.contains_key(digest)
    }

    /// Look up one link, failing with [`StoreError::LinkNotFound`] if absent.
    pub fn get(&self, digest: &ContentDigest) -> StoreResult<Arc<DeltaLink>> {
        self.links
            .get(digest)
            .cloned()
            .ok_or(StoreError::LinkNotFound(*digest))
    }

    /// Insert one link by digest. Last write wins on a duplicate digest;
    /// harmless, since equal digests mean equal content.
    pub fn add_link(&mut self, link: DeltaLink) -> Arc<DeltaLink> {
        let link = Arc::new(link);
        self.add_shared(Arc::clone(&link));
        link
    }

    /// Insert an already-shared link by digest.
    pub fn add_shared(&mut self, link: Arc<DeltaLink>) {
        debug!(digest = %link.digest().short_hex(), len = link.data_length(), "add link");
        self.links.insert(link.digest(), link);
    }

    /// Insert many links.
    pub fn add_links<I: IntoIterator<Item = DeltaLink>>(&mut self, links: I) {
        for link in links {
            self.add_link(link);
        }
    }

    /// Remove one link, returning it if it was present.
    pub fn remove_link(&mut self, digest: &ContentDigest) -> Option<Arc<DeltaLink>> {
        self.links.remove(digest)
    }

    /// Remove many links.
    pub fn remove_links<'a, I: IntoIterator<Item = &'a ContentDigest>>(&mut self, digests: I) {
        for digest in digests {
            self.links.remove(digest);
        }
    }

    /// Copy every link from `other` into this store.
    pub fn merge_from(&mut self, other: &LinkStore) {
        for (digest, link) in &other.links {
            self.links.insert(*digest, Arc::clone(link));
        }
    }

    /// Walk the chain starting at `head`, returning links newest-first.
    ///
    /// The walk follows parent digests and stops when a parent is null or,
    /// if `stop_at_end`, when a link carries the end flag. A walk that runs
    /// past [`MAX_CHAIN_HOPS`] without stopping fails with
    /// [`StoreError::CycleSuspected`] — but only when not stopping at end,
    /// since a bounded walk terminates at the truncation boundary anyway.
    pub fn get_chain(
        &self,
        head: ContentDigest,
        stop_at_end: bool,
    ) -> StoreResult<Vec<Arc<DeltaLink>>> {
        if head.is_null() {
            return Err(StoreError::LinkNotFound(head));
        }

        let mut links = Vec::new();
        let mut next = head;
        let mut hops = 0usize;
        loop {
            let link = self.get(&next)?;
            next = link.parent();
            let is_end = link.is_end();
            links.push(link);
            hops += 1;

            if next.is_null() || (stop_at_end && is_end) {
                break;
            }
            if hops >= MAX_CHAIN_HOPS && !stop_at_end {
                debug!(head = %head.short_hex(), hops, "chain walk hit traversal cap");
                return Err(StoreError::CycleSuspected { head, hops });
            }
        }
        Ok(links)
    }

    /// Like [`get_chain`](Self::get_chain), but returning digests only.
    pub fn chain_digests(
        &self,
        head: ContentDigest,
        stop_at_end: bool,
    ) -> StoreResult<Vec<ContentDigest>> {
        Ok(self
            .get_chain(head, stop_at_end)?
            .iter()
            .map(|link| link.digest())
            .collect())
    }

    /// Total binary length of the links named by `digests`.
    pub fn length_of<'a, I>(&self, digests: I) -> StoreResult<u64>
    where
        I: IntoIterator<Item = &'a ContentDigest>,
    {
        let mut total = 0u64;
        for digest in digests {
            let link = self.get(digest)?;
            total += wire::rep_length(&link);
        }
        Ok(total)
    }

    /// Total binary length of one block's links.
    pub fn block_length(&self, block: &Block) -> StoreResult<u64> {
        self.length_of(block.digests())
    }

    /// Write one block's links, packed, into `sink`.
    pub fn write_block(&self, sink: &mut dyn Write, block: &Block) -> StoreResult<u64> {
        let mut written = 0u64;
        for digest in block.digests() {
            let link = self.get(digest)?;
            wire::write_link(sink, &link)?;
            written += wire::rep_length(&link);
        }
        Ok(written)
    }

    /// Read one block's worth of packed links from `source`, adding every
    /// link to the store and returning the block of their digests.
    pub fn read_block(
        &mut self,
        source: &mut dyn Read,
        factory: &dyn LinkDataFactory,
    ) -> StoreResult<Block> {
        let mut block = Block::new();
        for link in wire::read_all(source, factory)? {
            block.append(link.digest());
            self.add_link(link);
        }
        Ok(block)
    }
}

impl std::fmt::Debug for LinkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStore")
            .field("link_count", &self.links.len())
            .finish()
    }
}
