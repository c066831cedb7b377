//! A named-file catalog stored in the archive.
//!
//! Two maps: file name to content digest, and content digest to the chain
//! head the content is stored under. The indirection dedups identical
//! content inserted under different names and makes copy and rename pure
//! map edits.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::debug;

use revarc_store::wire::read_digest;
use revarc_store::LinkStore;
use revarc_types::{ContentDigest, ContentHasher, DIGEST_LEN};

use crate::archive::Archive;
use crate::error::{ArchiveError, ArchiveResult};
use crate::root::kind;

/// Fixed bytes per serialized entry: u16 total length plus two digests.
const ENTRY_HEADER_LEN: usize = 2 + 2 * DIGEST_LEN;

/// Serialized entries keep their total length within a signed 16-bit count.
const MAX_ENTRY_LEN: usize = 32767;

/// External file tree the manifest can be reconciled against.
///
/// Names are opaque strings; mapping them onto directories is the
/// implementation's business.
pub trait FileManifestIo {
    /// Name to content digest for every file present. The null digest
    /// means "unknown"; the caller fixes it up by reading and hashing.
    fn files(&mut self) -> ArchiveResult<HashMap<String, ContentDigest>>;

    fn read_file(&mut self, name: &str) -> ArchiveResult<Vec<u8>>;

    fn write_file(&mut self, name: &str, content: &[u8]) -> ArchiveResult<()>;

    fn delete_file(&mut self, name: &str) -> ArchiveResult<()>;

    /// Called before a sync writes anything. Hook for below-the-line
    /// bookkeeping such as empty-directory handling.
    fn start_sync(&mut self, _all_files: &BTreeSet<String>) -> ArchiveResult<()> {
        Ok(())
    }

    /// Called after a sync finishes writing.
    fn end_sync(&mut self, _all_files: &BTreeSet<String>) -> ArchiveResult<()> {
        Ok(())
    }
}

/// The difference between two name maps, as the edits that turn the old
/// one into the new one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    pub added: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub unmodified: BTreeSet<String>,
}

impl Changes {
    pub fn is_unmodified(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileManifest {
    /// Name to digest of the file's content.
    names: BTreeMap<String, ContentDigest>,
    /// Content digest to the chain head the content is stored under.
    chains: HashMap<ContentDigest, ContentDigest>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the manifest the `FILE_MANIFEST` root object points at, or an
    /// empty manifest when the root is unset.
    pub fn from_archive(archive: &Archive) -> ArchiveResult<FileManifest> {
        let digest = archive.root_object(kind::FILE_MANIFEST);
        if digest.is_null() {
            return Ok(FileManifest::new());
        }
        let bytes = archive.get_file(digest)?;
        Self::from_bytes(&mut bytes.as_slice())
    }

    // ---------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn contains_digest(&self, file_digest: &ContentDigest) -> bool {
        self.chains.contains_key(file_digest)
    }

    /// The content digest recorded for `name`.
    pub fn file_digest(&self, name: &str) -> ArchiveResult<ContentDigest> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| ArchiveError::FileNotFound(name.to_string()))
    }

    /// The chain head `name`'s content is stored under.
    pub fn chain_head(&self, name: &str) -> ArchiveResult<ContentDigest> {
        let file_digest = self.file_digest(name)?;
        self.chains
            .get(&file_digest)
            .copied()
            .ok_or(ArchiveError::UnresolvedFileDigest(file_digest))
    }

    /// The name map, sorted by name.
    pub fn name_map(&self) -> &BTreeMap<String, ContentDigest> {
        &self.names
    }

    pub fn all_files(&self) -> BTreeSet<String> {
        self.names.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Every known content digest. May hold orphans until
    /// [`purge`](Self::purge) runs.
    pub fn referenced_file_digests(&self) -> HashSet<ContentDigest> {
        self.chains.keys().copied().collect()
    }

    /// Every known chain head. May hold orphans until
    /// [`purge`](Self::purge) runs.
    pub fn referenced_chain_heads(&self) -> HashSet<ContentDigest> {
        self.chains.values().copied().collect()
    }

    // ---------------------------------------------------------------
    // Content
    // ---------------------------------------------------------------

    pub fn get_file(&self, archive: &Archive, name: &str) -> ArchiveResult<Vec<u8>> {
        archive.get_file(self.chain_head(name)?)
    }

    pub fn get_file_by_digest(
        &self,
        archive: &Archive,
        file_digest: &ContentDigest,
    ) -> ArchiveResult<Vec<u8>> {
        let head = self
            .chains
            .get(file_digest)
            .copied()
            .ok_or(ArchiveError::UnresolvedFileDigest(*file_digest))?;
        archive.get_file(head)
    }

    /// Store `raw` under `name`, delta-coding against whatever chain the
    /// name currently points at. Returns the content digest, computed in
    /// one pass while the bytes stream into the archive.
    ///
    /// Callers should [`purge`](Self::purge) after a batch of puts.
    pub fn put_file(
        &mut self,
        archive: &mut Archive,
        name: &str,
        raw: &mut dyn Read,
    ) -> ArchiveResult<ContentDigest> {
        let prev = self.names.get(name).copied();
        self.put_file_as(archive, name, prev, raw)
    }

    /// Like [`put_file`](Self::put_file), with the predecessor chosen by
    /// content digest instead of by name. Lets a caller fork the history
    /// of a file stored under a different name.
    pub fn put_file_as(
        &mut self,
        archive: &mut Archive,
        name: &str,
        prev_file_digest: Option<ContentDigest>,
        raw: &mut dyn Read,
    ) -> ArchiveResult<ContentDigest> {
        let prev_chain = prev_file_digest
            .and_then(|digest| self.chains.get(&digest).copied())
            .unwrap_or(ContentDigest::NULL);

        let mut hashing = HashingReader::new(raw);
        let chain_head = archive.put_file(&mut hashing, prev_chain)?;
        let file_digest = hashing.finish();

        // First insertion of this content wins; later copies reuse it.
        self.chains.entry(file_digest).or_insert(chain_head);
        self.names.insert(name.to_string(), file_digest);
        debug!(name, digest = %file_digest.short_hex(), "put manifest file");
        Ok(file_digest)
    }

    /// Drop names from the catalog, purging digest entries they orphan.
    pub fn remove_files<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut changed = false;
        for name in names {
            changed |= self.names.remove(name.as_ref()).is_some();
        }
        if changed {
            self.purge();
        }
    }

    /// Point `to_name` at `from_name`'s content. A pure map edit;
    /// overwrites `to_name`.
    pub fn copy(&mut self, from_name: &str, to_name: &str) -> ArchiveResult<()> {
        let digest = self.file_digest(from_name)?;
        self.names.insert(to_name.to_string(), digest);
        Ok(())
    }

    /// Move `from_name` to `to_name`. A pure map edit; overwrites
    /// `to_name`.
    pub fn rename(&mut self, from_name: &str, to_name: &str) -> ArchiveResult<()> {
        let digest = self.file_digest(from_name)?;
        self.names.insert(to_name.to_string(), digest);
        self.names.remove(from_name);
        Ok(())
    }

    /// Drop digest entries no name references.
    ///
    /// # Panics
    ///
    /// Panics if a name references a digest with no entry; the maps are
    /// maintained together and that can only be an engine bug.
    pub fn purge(&mut self) {
        let referenced: HashSet<ContentDigest> = self.names.values().copied().collect();
        for digest in &referenced {
            assert!(
                self.chains.contains_key(digest),
                "unresolved file digest {digest} in name map"
            );
        }
        self.chains.retain(|digest, _| referenced.contains(digest));
    }

    // ---------------------------------------------------------------
    // Diff and reconciliation
    // ---------------------------------------------------------------

    /// The edits that turn `old` into `new`.
    pub fn diff(
        old: &BTreeMap<String, ContentDigest>,
        new: &BTreeMap<String, ContentDigest>,
    ) -> Changes {
        let mut changes = Changes::default();
        for (name, old_digest) in old {
            match new.get(name) {
                None => {
                    changes.deleted.insert(name.clone());
                }
                Some(new_digest) if new_digest == old_digest => {
                    changes.unmodified.insert(name.clone());
                }
                Some(_) => {
                    changes.modified.insert(name.clone());
                }
            }
        }
        for name in new.keys() {
            if !old.contains_key(name) {
                changes.added.insert(name.clone());
            }
        }
        changes
    }

    /// The edits that turn this manifest into what `newer` holds.
    pub fn diff_to(&self, newer: &mut dyn FileManifestIo) -> ArchiveResult<Changes> {
        let other = resolve_digests(newer, None)?;
        Ok(Self::diff(&self.names, &other))
    }

    /// Pull the external tree's state into the archive: missing files are
    /// added, changed files delta-coded, vanished names dropped. Requires
    /// an open update transaction.
    pub fn update_from(
        &mut self,
        archive: &mut Archive,
        source: &mut dyn FileManifestIo,
    ) -> ArchiveResult<Changes> {
        if !archive.is_updating() {
            return Err(ArchiveError::NotUpdating);
        }

        let other = resolve_digests(source, None)?;
        let changes = Self::diff(&self.names, &other);
        if changes.is_unmodified() {
            return Ok(changes);
        }

        self.remove_files(&changes.deleted);
        for name in changes.added.iter().chain(&changes.modified) {
            let content = source.read_file(name)?;
            self.put_file(archive, name, &mut content.as_slice())?;
        }
        self.purge();
        Ok(changes)
    }

    /// Push this manifest's state into the external tree, writing only
    /// what differs.
    pub fn sync_files_to(
        &self,
        archive: &Archive,
        sink: &mut dyn FileManifestIo,
    ) -> ArchiveResult<Changes> {
        let all = self.all_files();
        sink.start_sync(&all)?;

        // Names the sink holds which the manifest does not. Skipped during
        // digest fixup; no point hashing a file about to be deleted.
        let sink_files = sink.files()?;
        let doomed: BTreeSet<String> = sink_files
            .keys()
            .filter(|name| !self.names.contains_key(*name))
            .cloned()
            .collect();

        let old = resolve_digests(sink, Some(&doomed))?;
        let mut changes = Self::diff(&old, &self.names);
        changes.deleted = doomed;
        if changes.is_unmodified() {
            return Ok(changes);
        }

        for name in &changes.deleted {
            sink.delete_file(name)?;
        }
        for name in changes.added.iter().chain(&changes.modified) {
            let content = self.get_file(archive, name)?;
            sink.write_file(name, &content)?;
        }

        sink.end_sync(&all)?;
        Ok(changes)
    }

    // ---------------------------------------------------------------
    // Wire rep
    // ---------------------------------------------------------------

    /// Serialize. Entries are sorted by name so identical catalogs always
    /// produce identical bytes, which keeps the manifest delta-friendly.
    pub fn to_bytes(&self) -> ArchiveResult<Vec<u8>> {
        let mut out = Vec::new();
        for (name, file_digest) in &self.names {
            let name_bytes = name.as_bytes();
            let length = ENTRY_HEADER_LEN + name_bytes.len();
            if length > MAX_ENTRY_LEN {
                return Err(ArchiveError::Malformed(format!(
                    "file name too long: {} bytes",
                    name_bytes.len()
                )));
            }
            let chain_head = self
                .chains
                .get(file_digest)
                .ok_or(ArchiveError::UnresolvedFileDigest(*file_digest))?;

            out.extend_from_slice(&(length as u16).to_be_bytes());
            out.extend_from_slice(file_digest.as_bytes());
            out.extend_from_slice(chain_head.as_bytes());
            out.extend_from_slice(name_bytes);
        }
        Ok(out)
    }

    /// Deserialize a stream of entries, ending at clean EOF.
    pub fn from_bytes(source: &mut dyn Read) -> ArchiveResult<FileManifest> {
        let mut manifest = FileManifest::new();
        loop {
            let mut length_buf = [0u8; 2];
            match source.read_exact(&mut length_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let length = u16::from_be_bytes(length_buf) as usize;
            if length < ENTRY_HEADER_LEN || length > MAX_ENTRY_LEN {
                return Err(ArchiveError::Malformed(format!(
                    "bad manifest entry length {length}"
                )));
            }

            let file_digest = read_digest(source).map_err(ArchiveError::from)?;
            let chain_head = read_digest(source).map_err(ArchiveError::from)?;

            let mut name_bytes = vec![0u8; length - ENTRY_HEADER_LEN];
            source.read_exact(&mut name_bytes)?;
            let name = String::from_utf8(name_bytes)
                .map_err(|_| ArchiveError::Malformed("manifest name is not UTF-8".to_string()))?;

            manifest.chains.insert(file_digest, chain_head);
            manifest.names.insert(name, file_digest);
        }
        Ok(manifest)
    }

    /// Every link any cataloged file's chain touches.
    pub fn referenced_links(&self, store: &LinkStore) -> ArchiveResult<HashSet<ContentDigest>> {
        let mut links = HashSet::new();
        for file_digest in self.names.values() {
            let head = self
                .chains
                .get(file_digest)
                .copied()
                .ok_or(ArchiveError::UnresolvedFileDigest(*file_digest))?;
            links.extend(store.chain_digests(head, true)?);
        }
        Ok(links)
    }
}

/// The sink/source's name map with every unknown (null) digest replaced by
/// an actual content hash. Names in `skip` are left out entirely.
fn resolve_digests(
    io: &mut dyn FileManifestIo,
    skip: Option<&BTreeSet<String>>,
) -> ArchiveResult<BTreeMap<String, ContentDigest>> {
    let mut resolved = BTreeMap::new();
    for (name, digest) in io.files()? {
        if skip.is_some_and(|doomed| doomed.contains(&name)) {
            continue;
        }
        let digest = if digest.is_null() {
            let mut hasher = ContentHasher::new();
            hasher.update(&io.read_file(&name)?);
            hasher.finish()
        } else {
            digest
        };
        resolved.insert(name, digest);
    }
    Ok(resolved)
}

/// Hashes bytes as they stream through, so a file is digested in the same
/// pass that inserts it.
struct HashingReader<'a> {
    inner: &'a mut dyn Read,
    hasher: ContentHasher,
}

impl<'a> HashingReader<'a> {
    fn new(inner: &'a mut dyn Read) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
        }
    }

    fn finish(self) -> ContentDigest {
        self.hasher.finish()
    }
}

impl Read for HashingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}
