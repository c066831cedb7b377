//! The archive manifest: a serializable snapshot of blocks and root
//! objects, sufficient to reinsert the whole archive.
//!
//! The manifest is itself stored as a file inside the archive, which makes
//! its own chain head unknowable at encode time. The rep solves that with a
//! sentinel protocol: the `ARCHIVE_MANIFEST` root slot and the first digest
//! of the first block are always written as the null digest, and both are
//! fixed up on read from the chain head the caller fetched the bytes under.
//! Successive encodes of the same state are bit for bit identical.

use std::collections::HashSet;
use std::io::Read;

use revarc_store::wire::read_digest;
use revarc_store::Block;
use revarc_types::{ContentDigest, DIGEST_LEN};

use crate::archive::ArchiveData;
use crate::error::{ArchiveError, ArchiveResult};
use crate::root::{kind, RootObject};

/// Rep version written into every manifest.
pub const SUPPORTED_VERSION: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveManifest {
    roots: Vec<RootObject>,
    blocks: Vec<Block>,
}

impl ArchiveManifest {
    pub fn new(roots: Vec<RootObject>, blocks: Vec<Block>) -> Self {
        Self { roots, blocks }
    }

    pub fn root_objects(&self) -> &[RootObject] {
        &self.roots
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The state this manifest describes, in archive form.
    pub fn archive_data(&self) -> ArchiveData {
        ArchiveData::new(self.blocks.clone(), self.roots.clone())
    }

    /// The digest in the single `ARCHIVE_MANIFEST` root slot.
    ///
    /// Null while the manifest is being (re)written into the archive.
    pub fn manifest_digest(roots: &[RootObject]) -> ArchiveResult<ContentDigest> {
        let mut found = None;
        for root in roots {
            if root.kind == kind::ARCHIVE_MANIFEST {
                if found.is_some() {
                    return Err(ArchiveError::InvalidManifest(
                        "multiple archive manifest root objects".to_string(),
                    ));
                }
                found = Some(root.digest);
            }
        }
        found.ok_or_else(|| {
            ArchiveError::InvalidManifest("no archive manifest root object".to_string())
        })
    }

    /// Serialize. See the module docs for the sentinel protocol.
    pub fn to_bytes(&self) -> ArchiveResult<Vec<u8>> {
        if self.blocks.is_empty() {
            return Err(ArchiveError::InvalidManifest(
                "manifest must have at least one block".to_string(),
            ));
        }
        if self.roots.len() > u8::MAX as usize {
            return Err(ArchiveError::InvalidManifest(
                "too many root objects".to_string(),
            ));
        }
        if self.blocks.len() > u8::MAX as usize {
            return Err(ArchiveError::InvalidManifest("too many blocks".to_string()));
        }

        let digest = Self::manifest_digest(&self.roots)?;
        let insert_sentinel = digest.is_null();
        if !insert_sentinel && self.blocks[0].digests().first() != Some(&digest) {
            return Err(ArchiveError::InvalidManifest(
                "manifest chain head not at start of first block".to_string(),
            ));
        }

        let mut out = Vec::new();
        out.extend_from_slice(&SUPPORTED_VERSION.to_be_bytes());

        out.push(self.roots.len() as u8);
        for root in &self.roots {
            if root.kind == kind::ARCHIVE_MANIFEST {
                out.extend_from_slice(ContentDigest::NULL.as_bytes());
            } else {
                out.extend_from_slice(root.digest.as_bytes());
            }
            out.extend_from_slice(&root.kind.to_be_bytes());
        }

        out.push(self.blocks.len() as u8);
        let mut add_one = insert_sentinel;
        for block in &self.blocks {
            let mut count = block.len() as u32;
            if add_one {
                // The sentinel slot goes at the front of the first block.
                count += 1;
                add_one = false;
            }
            out.extend_from_slice(&count.to_be_bytes());
        }

        // The placeholder for the manifest's own chain head is always
        // written; without a sentinel it stands in for the skipped first
        // digest.
        out.extend_from_slice(ContentDigest::NULL.as_bytes());
        let mut skip_one = !insert_sentinel;
        for block in &self.blocks {
            for digest in block.digests() {
                if skip_one {
                    skip_one = false;
                    continue;
                }
                out.extend_from_slice(digest.as_bytes());
            }
        }

        Ok(out)
    }

    /// Deserialize, fixing up the sentinel slots with `chain_head_fixup`,
    /// the chain head the bytes were actually read from.
    pub fn from_bytes(
        source: &mut dyn Read,
        chain_head_fixup: ContentDigest,
    ) -> ArchiveResult<ArchiveManifest> {
        if chain_head_fixup.is_null() {
            return Err(ArchiveError::NullDigest("manifest chain head fixup"));
        }

        let version = read_u64(source)?;
        if version != SUPPORTED_VERSION {
            return Err(ArchiveError::VersionMismatch {
                expected: SUPPORTED_VERSION,
                found: version,
            });
        }

        let root_count = read_u8(source)?;
        let mut roots = Vec::with_capacity(root_count as usize);
        for _ in 0..root_count {
            let mut digest = read_digest(source).map_err(ArchiveError::from)?;
            let kind_value = read_i32(source)?;
            if kind_value == kind::ARCHIVE_MANIFEST && digest.is_null() {
                digest = chain_head_fixup;
            }
            roots.push(RootObject::new(digest, kind_value));
        }

        let block_count = read_u8(source)?;
        let mut sizes = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            sizes.push(read_u32(source)?);
        }

        let mut blocks = Vec::with_capacity(sizes.len());
        for size in sizes {
            let mut digests = Vec::with_capacity(size as usize);
            for _ in 0..size {
                digests.push(read_digest(source).map_err(ArchiveError::from)?);
            }
            if blocks.is_empty() {
                match digests.first() {
                    Some(first) if first.is_null() => digests[0] = chain_head_fixup,
                    Some(_) => {
                        return Err(ArchiveError::InvalidManifest(
                            "missing sentinel at start of first block".to_string(),
                        ));
                    }
                    None => {}
                }
            }
            blocks.push(Block::from_digests(digests));
        }

        Ok(ArchiveManifest::new(roots, blocks))
    }

    /// Every link this manifest pins: all block digests plus non-null root
    /// digests. Does not recurse; a well-formed manifest's blocks already
    /// contain every chain link.
    pub fn referenced_links(&self) -> HashSet<ContentDigest> {
        let mut links = HashSet::new();
        for block in &self.blocks {
            links.extend(block.digests().iter().copied());
        }
        for root in &self.roots {
            if !root.digest.is_null() {
                links.insert(root.digest);
            }
        }
        links
    }
}

fn read_u8(source: &mut dyn Read) -> ArchiveResult<u8> {
    let mut buf = [0u8; 1];
    source.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(source: &mut dyn Read) -> ArchiveResult<u32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_i32(source: &mut dyn Read) -> ArchiveResult<i32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_u64(source: &mut dyn Read) -> ArchiveResult<u64> {
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}
