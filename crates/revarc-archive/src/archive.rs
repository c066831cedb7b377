//! The archive: blocks, root objects, and the update transaction machine.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use tracing::{debug, info, warn};

use revarc_delta::{DeltaCoder, HunkDeltaCoder};
use revarc_store::{Block, DeltaLink, LinkDataFactory, LinkStore, RamLinkDataFactory};
use revarc_types::ContentDigest;

use crate::error::{ArchiveError, ArchiveResult};
use crate::io::{ArchiveIo, LinkSource};
use crate::manifest::ArchiveManifest;
use crate::partition::{self, Partition};
use crate::root::{kind, RootContainer, RootObject};

/// Growth multiple between adjacent block levels.
pub const REPARTITION_MULTIPLE: u64 = 2;

/// Chains longer than this force a full reinsert instead of another delta,
/// bounding the worst-case walk on read.
pub const MAX_CHAIN_LENGTH: usize = 16;

/// Default block-count budget for compaction.
pub const MAX_BLOCKS: usize = 4;

/// Blocks plus root objects: the complete non-transient state of an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveData {
    pub blocks: Vec<Block>,
    pub roots: Vec<RootObject>,
}

impl ArchiveData {
    pub fn new(blocks: Vec<Block>, roots: Vec<RootObject>) -> Self {
        Self { blocks, roots }
    }
}

/// A write-once, content-addressed archive of delta-coded file chains.
///
/// Blocks are kept newest-first; index 0 is the most recent. All mutation
/// happens inside an update transaction (`start_update` → `put_file`… →
/// `commit_update` / `abandon_update`); compaction, manifest maintenance,
/// and IO are only legal between transactions.
///
/// Not internally thread-safe. Callers serialize access.
pub struct Archive {
    coder: Arc<dyn DeltaCoder>,
    factory: Arc<dyn LinkDataFactory>,
    store: LinkStore,
    blocks: Vec<Block>,
    roots: Vec<RootObject>,
    /// The open transaction's block, `None` when idle.
    pending: Option<Block>,
}

impl Archive {
    /// Create an empty archive with the default hunk coder and RAM-backed
    /// link data.
    pub fn new() -> Self {
        Self::with_collaborators(
            Arc::new(HunkDeltaCoder::new()),
            Arc::new(RamLinkDataFactory::new()),
        )
    }

    /// Create an empty archive around explicit collaborators.
    pub fn with_collaborators(
        coder: Arc<dyn DeltaCoder>,
        factory: Arc<dyn LinkDataFactory>,
    ) -> Self {
        Self {
            coder,
            factory,
            store: LinkStore::new(),
            blocks: Vec::new(),
            roots: Vec::new(),
            pending: None,
        }
    }

    /// Construct an archive by reading from `source`, validating the stored
    /// archive manifest when one is present.
    pub fn load(source: &mut dyn ArchiveIo) -> ArchiveResult<Archive> {
        Self::load_with(source, false)
    }

    /// Like [`load`](Self::load), optionally skipping manifest validation.
    pub fn load_with(source: &mut dyn ArchiveIo, skip_validation: bool) -> ArchiveResult<Archive> {
        let mut archive = Archive::new();
        archive.read(source)?;
        if !archive.root_object(kind::ARCHIVE_MANIFEST).is_null()
            && !skip_validation
            && !archive.has_valid_archive_manifest()?
        {
            // A runtime error, not an assertion: we did not produce this
            // manifest.
            return Err(ArchiveError::ManifestMismatch);
        }
        Ok(archive)
    }

    // ---------------------------------------------------------------
    // State accessors
    // ---------------------------------------------------------------

    /// Returns `true` while an update transaction is open.
    pub fn is_updating(&self) -> bool {
        self.pending.is_some()
    }

    /// The blocks, newest first.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The root objects, in their deterministic sorted order.
    pub fn root_objects(&self) -> &[RootObject] {
        &self.roots
    }

    /// The link arena backing this archive.
    pub fn link_store(&self) -> &LinkStore {
        &self.store
    }

    /// The link-data factory this archive materializes payloads through.
    pub fn link_data_factory(&self) -> &dyn LinkDataFactory {
        self.factory.as_ref()
    }

    /// Snapshot the non-transient state.
    pub fn archive_data(&self) -> ArchiveData {
        ArchiveData::new(self.blocks.clone(), self.roots.clone())
    }

    /// Replace blocks and roots wholesale, discarding any open transaction.
    pub fn set_from_data(&mut self, data: ArchiveData) {
        self.blocks = data.blocks;
        self.roots = data.roots;
        self.pending = None;
    }

    /// Drop everything: blocks, roots, links, and any open transaction.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.roots.clear();
        self.store = LinkStore::new();
        self.pending = None;
    }

    /// Full value copy. Refused while a transaction is open.
    pub fn deep_copy(&self) -> ArchiveResult<Archive> {
        if self.pending.is_some() {
            return Err(ArchiveError::UpdateInProgress);
        }
        let mut store = LinkStore::new();
        store.merge_from(&self.store);
        Ok(Archive {
            coder: Arc::clone(&self.coder),
            factory: Arc::clone(&self.factory),
            store,
            blocks: self.blocks.clone(),
            roots: self.roots.clone(),
            pending: None,
        })
    }

    // ---------------------------------------------------------------
    // Update transactions
    // ---------------------------------------------------------------

    /// Open an update transaction.
    pub fn start_update(&mut self) -> ArchiveResult<()> {
        if self.pending.is_some() {
            return Err(ArchiveError::UpdateInProgress);
        }
        self.pending = Some(Block::new());
        Ok(())
    }

    /// Discard the open transaction, if any.
    ///
    /// The pending block is dropped, but links already written into the
    /// link store stay behind. They are unreferenced and harmless, and the
    /// next compaction collects them.
    pub fn abandon_update(&mut self) {
        if self.pending.take().is_some() {
            warn!("abandoned open update");
        }
    }

    /// Close the open transaction. A non-empty pending block becomes the
    /// newest block and the call returns `true`; an empty one is discarded
    /// and the call returns `false`.
    pub fn commit_update(&mut self) -> ArchiveResult<bool> {
        let pending = self.pending.take().ok_or(ArchiveError::NotUpdating)?;
        if pending.is_empty() {
            debug!("commit of empty update is a no-op");
            return Ok(false);
        }
        info!(links = pending.len(), "commit update");
        self.blocks.insert(0, pending);
        Ok(true)
    }

    /// Write one file revision, returning the new chain head.
    ///
    /// With a non-null `prev_chain_head` whose chain is still shorter than
    /// [`MAX_CHAIN_LENGTH`], the revision is delta-coded against the live
    /// predecessor content. Otherwise the content is reinserted in full,
    /// starting a fresh end link.
    pub fn put_file(
        &mut self,
        raw: &mut dyn Read,
        prev_chain_head: ContentDigest,
    ) -> ArchiveResult<ContentDigest> {
        if self.pending.is_none() {
            return Err(ArchiveError::NotUpdating);
        }

        // None means a full reinsert.
        let mut base: Option<Vec<u8>> = None;
        if !prev_chain_head.is_null()
            && self.store.get_chain(prev_chain_head, true)?.len() < MAX_CHAIN_LENGTH
        {
            base = Some(self.get_file(prev_chain_head)?);
        }

        let link = match base.as_deref() {
            Some(bytes) => self.coder.make_delta(
                self.factory.as_ref(),
                prev_chain_head,
                Some(&mut &bytes[..]),
                raw,
                false,
            )?,
            None => self
                .coder
                .make_delta(self.factory.as_ref(), prev_chain_head, None, raw, false)?,
        };

        let digest = self.append_pending(link)?;
        debug!(digest = %digest.short_hex(), "put file revision");
        Ok(digest)
    }

    fn append_pending(&mut self, link: DeltaLink) -> ArchiveResult<ContentDigest> {
        let digest = link.digest();
        let pending = self.pending.as_mut().ok_or(ArchiveError::NotUpdating)?;
        pending.append(digest);
        self.store.add_link(link);
        Ok(digest)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Materialize the content stored under `chain_head`.
    pub fn get_file(&self, chain_head: ContentDigest) -> ArchiveResult<Vec<u8>> {
        if chain_head.is_null() {
            return Err(ArchiveError::NullDigest("chain head"));
        }
        let chain = self.store.get_chain(chain_head, true)?;
        Ok(self.coder.apply_deltas(&chain)?)
    }

    /// The digests of one chain, newest first.
    ///
    /// `stop_at_end = false` reads change history past the last truncation
    /// boundary, when the older links happen to be present.
    pub fn get_chain(
        &self,
        chain_head: ContentDigest,
        stop_at_end: bool,
    ) -> ArchiveResult<Vec<ContentDigest>> {
        if chain_head.is_null() {
            return Err(ArchiveError::NullDigest("chain head"));
        }
        Ok(self.store.chain_digests(chain_head, stop_at_end)?)
    }

    /// Length of the chain under `chain_head`, or `None` if any link of it
    /// is missing from the store.
    pub fn chain_length(&self, chain_head: ContentDigest) -> Option<usize> {
        self.store
            .get_chain(chain_head, true)
            .map(|chain| chain.len())
            .ok()
    }

    /// Read one file's chain through a [`LinkSource`] without constructing
    /// archive state, and materialize its content.
    pub fn read_file(
        chain_head: ContentDigest,
        source: &mut dyn LinkSource,
        factory: &dyn LinkDataFactory,
    ) -> ArchiveResult<Vec<u8>> {
        if chain_head.is_null() {
            return Err(ArchiveError::NullDigest("chain head"));
        }

        let mut scratch = LinkStore::new();
        let mut next = chain_head;
        loop {
            let link = source.read_link(&scratch, factory, next)?;
            let is_end = link.is_end();
            let parent = link.parent();
            scratch.add_shared(link);
            if is_end || parent.is_null() {
                break;
            }
            next = parent;
        }

        let chain = scratch.get_chain(chain_head, true)?;
        Ok(HunkDeltaCoder::new().apply_deltas(&chain)?)
    }

    // ---------------------------------------------------------------
    // Link accounting
    // ---------------------------------------------------------------

    /// Every digest stored in any block.
    ///
    /// # Panics
    ///
    /// Panics if a block carries the null digest or a non-null root object
    /// points outside every block; both are engine bugs.
    pub fn all_links(&self) -> HashSet<ContentDigest> {
        let mut all = HashSet::new();
        self.add_all_links(&mut all);
        all
    }

    /// Union every block digest into `all`, with the same internal
    /// assertions as [`all_links`](Self::all_links).
    pub fn add_all_links(&self, all: &mut HashSet<ContentDigest>) {
        for block in &self.blocks {
            all.extend(block.digests().iter().copied());
        }

        assert!(
            !all.contains(&ContentDigest::NULL),
            "null digest stored in blocks"
        );
        for root in &self.roots {
            assert!(
                root.digest.is_null() || all.contains(&root.digest),
                "root object {} not found in any block",
                root.digest
            );
        }
    }

    /// The reachability set: every link reachable from a non-null root
    /// object, through its chain and its typed container.
    ///
    /// This is what compaction keeps; everything else is garbage.
    pub fn referenced_links(&self) -> ArchiveResult<HashSet<ContentDigest>> {
        let mut links = HashSet::new();
        for root in &self.roots {
            if root.digest.is_null() {
                continue;
            }
            // The chain of the file the object is stored in, plus whatever
            // extra links the marshalled container declares.
            links.extend(self.get_chain(root.digest, true)?);
            let container = RootContainer::for_root(self, root)?;
            links.extend(container.referenced_links(&self.store)?);
        }
        Ok(links)
    }

    // ---------------------------------------------------------------
    // Compaction
    // ---------------------------------------------------------------

    /// Merge blocks down to `max_blocks`, dropping unreferenced digests as
    /// a side effect. Returns `false` when the partition count did not
    /// shrink.
    pub fn compress(&mut self, max_blocks: usize) -> ArchiveResult<bool> {
        if self.pending.is_some() {
            return Err(ArchiveError::UpdateInProgress);
        }

        let referenced = self.referenced_links()?;
        let mut uncompressed = Vec::with_capacity(self.blocks.len());
        for (index, block) in self.blocks.iter().enumerate() {
            let survivors: Vec<&ContentDigest> = block
                .digests()
                .iter()
                .filter(|digest| referenced.contains(digest))
                .collect();
            // Length after dropping unreferenced links.
            let length = self.store.length_of(survivors)?;
            uncompressed.push(Partition::new(index, index, length));
        }

        let compressed = partition::compress(&uncompressed, max_blocks, REPARTITION_MULTIPLE);
        if compressed.len() == uncompressed.len() {
            return Ok(false);
        }

        let mut survivors = referenced;
        self.blocks = merge_blocks(&self.blocks, &compressed, &mut survivors);
        info!(blocks = self.blocks.len(), "compacted blocks");
        Ok(true)
    }

    // ---------------------------------------------------------------
    // Archive manifest maintenance
    // ---------------------------------------------------------------

    /// Compact if over budget, then write a fresh archive manifest into the
    /// archive itself and point the `ARCHIVE_MANIFEST` root at it.
    ///
    /// The new manifest's chain head is prepended to the front of block 0 —
    /// the one sanctioned exception to append-only blocks, required by the
    /// manifest bootstrap. On any failure the root pointer is restored to
    /// its previous value.
    ///
    /// # Panics
    ///
    /// Panics if the freshly written manifest fails its own validity check.
    pub fn compress_and_update_archive_manifest(&mut self, max_blocks: usize) -> ArchiveResult<()> {
        if self.pending.is_some() {
            return Err(ArchiveError::UpdateInProgress);
        }
        if self.blocks.len() > max_blocks {
            self.compress(max_blocks)?;
        }

        // The bootstrap fixup on read depends on this slot holding
        // NULL_DIGEST while the manifest bytes are produced.
        let previous = self.root_object(kind::ARCHIVE_MANIFEST);
        self.set_root_object(ContentDigest::NULL, kind::ARCHIVE_MANIFEST);
        self.pending = Some(Block::new());

        let result = self.write_manifest_link(previous);

        // Backs out the root-object change on failure.
        let restored = match &result {
            Ok(head) => *head,
            Err(_) => {
                warn!("manifest update failed; restoring previous root");
                previous
            }
        };
        self.set_root_object(restored, kind::ARCHIVE_MANIFEST);
        self.pending = None;
        let head = result?;

        info!(manifest = %head.short_hex(), "updated archive manifest");
        self.assert_valid_archive_manifest(
            "compress_and_update_archive_manifest produced an invalid manifest",
        )?;
        Ok(())
    }

    fn write_manifest_link(&mut self, previous: ContentDigest) -> ArchiveResult<ContentDigest> {
        let manifest = ArchiveManifest::new(self.roots.clone(), self.blocks.clone());
        let bytes = manifest.to_bytes()?;
        let head = self.put_file(&mut bytes.as_slice(), previous)?;

        // Not via the pending block: the manifest link is prepended
        // directly and the transaction is discarded without a commit.
        let first = self
            .blocks
            .first_mut()
            .ok_or_else(|| ArchiveError::InvalidManifest("archive has no blocks".to_string()))?;
        first.prepend(head);
        Ok(head)
    }

    /// Returns `true` if the stored archive manifest, fixed up with its own
    /// chain head, describes exactly this archive's current data.
    pub fn has_valid_archive_manifest(&self) -> ArchiveResult<bool> {
        if self.pending.is_some() {
            return Err(ArchiveError::UpdateInProgress);
        }
        let digest = self.root_object(kind::ARCHIVE_MANIFEST);
        if digest.is_null() {
            return Ok(false);
        }
        let bytes = self.get_file(digest)?;
        let manifest = ArchiveManifest::from_bytes(&mut bytes.as_slice(), digest)?;
        Ok(manifest.archive_data() == self.archive_data())
    }

    fn assert_valid_archive_manifest(&self, message: &str) -> ArchiveResult<()> {
        if !self.root_object(kind::ARCHIVE_MANIFEST).is_null() {
            assert!(self.has_valid_archive_manifest()?, "{message}");
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Root objects
    // ---------------------------------------------------------------

    /// The digest stored under `kind`, or the null digest if unset.
    pub fn root_object(&self, kind: i32) -> ContentDigest {
        self.roots
            .iter()
            .find(|root| root.kind == kind)
            .map(|root| root.digest)
            .unwrap_or(ContentDigest::NULL)
    }

    /// Point `kind` at `digest`, replacing an existing entry of that kind.
    pub fn set_root_object(&mut self, digest: ContentDigest, kind: i32) {
        self.set_root_object_with(digest, kind, true);
    }

    /// Point `kind` at `digest`. With `replace = false` a duplicate kind is
    /// added alongside the existing entry.
    pub fn set_root_object_with(&mut self, digest: ContentDigest, kind: i32, replace: bool) {
        let object = RootObject::new(digest, kind);
        if replace {
            if let Some(existing) = self.roots.iter_mut().find(|root| root.kind == kind) {
                *existing = object;
                self.roots.sort();
                return;
            }
        }
        self.roots.push(object);
        // Tiny list; re-sorting keeps the serialized rep deterministic.
        self.roots.sort();
    }

    /// Remove every root object of `kind`.
    pub fn unset_root_object(&mut self, kind: i32) {
        self.roots.retain(|root| root.kind != kind);
    }

    /// Single-call write of one root payload: extends the chain under the
    /// current root of `kind` and repoints the root at the new head.
    /// Requires an open transaction.
    pub fn update_root_object(
        &mut self,
        data: &mut dyn Read,
        kind: i32,
    ) -> ArchiveResult<ContentDigest> {
        let previous = self.root_object(kind);
        let digest = self.put_file(data, previous)?;
        self.set_root_object(digest, kind);
        Ok(digest)
    }

    // ---------------------------------------------------------------
    // IO
    // ---------------------------------------------------------------

    /// Replace this archive's state with what `source` provides.
    pub fn read(&mut self, source: &mut dyn ArchiveIo) -> ArchiveResult<()> {
        if self.pending.is_some() {
            return Err(ArchiveError::UpdateInProgress);
        }
        let data = source.read(&mut self.store, self.factory.as_ref())?;
        self.set_from_data(data);
        Ok(())
    }

    /// Write this archive's links, blocks, and roots into `sink`.
    pub fn write(&self, sink: &mut dyn ArchiveIo) -> ArchiveResult<()> {
        if self.pending.is_some() {
            return Err(ArchiveError::UpdateInProgress);
        }
        self.assert_valid_archive_manifest("writing an archive with an invalid manifest")?;
        sink.write(&self.store, &self.blocks, &self.roots)
    }
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("blocks", &self.blocks.len())
            .field("roots", &self.roots.len())
            .field("links", &self.store.len())
            .field("updating", &self.pending.is_some())
            .finish()
    }
}

/// Rebuild the block list per the partition plan, dropping digests outside
/// `survivors` and deduplicating inside merged ranges. Single-index
/// partitions carry their block over untouched.
fn merge_blocks(
    blocks: &[Block],
    partitions: &[Partition],
    survivors: &mut HashSet<ContentDigest>,
) -> Vec<Block> {
    let mut merged = Vec::with_capacity(partitions.len());
    for partition in partitions {
        if partition.is_single() {
            merged.push(blocks[partition.start()].clone());
            continue;
        }
        let mut filtered = Block::new();
        for block in &blocks[partition.start()..=partition.end()] {
            for digest in block.digests() {
                // Removing as we keep also drops duplicates.
                if survivors.remove(digest) {
                    filtered.append(*digest);
                }
            }
        }
        merged.push(filtered);
    }
    merged
}
