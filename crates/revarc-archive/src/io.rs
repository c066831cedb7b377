//! Archive persistence seams and the in-memory implementation.

use std::io::Read;
use std::sync::Arc;

use tracing::debug;

use revarc_store::wire::{self, read_digest};
use revarc_store::{Block, DeltaLink, LinkDataFactory, LinkStore};
use revarc_types::ContentDigest;

use crate::archive::ArchiveData;
use crate::error::{ArchiveError, ArchiveResult};
use crate::root::RootObject;

/// Whole-archive persistence: blocks, roots, and every block link.
pub trait ArchiveIo {
    /// Persist the archive's state. `blocks` is newest first.
    fn write(
        &mut self,
        store: &LinkStore,
        blocks: &[Block],
        roots: &[RootObject],
    ) -> ArchiveResult<()>;

    /// Load a previously written archive, adding its links to `store`.
    fn read(
        &mut self,
        store: &mut LinkStore,
        factory: &dyn LinkDataFactory,
    ) -> ArchiveResult<ArchiveData>;
}

/// Random access to individual links, for reading one chain without
/// loading archive state.
pub trait LinkSource {
    fn read_link(
        &mut self,
        store: &LinkStore,
        factory: &dyn LinkDataFactory,
        digest: ContentDigest,
    ) -> ArchiveResult<Arc<DeltaLink>>;
}

const MAGIC: &[u8; 4] = b"RVRC";
const FORMAT_VERSION: u32 = 1;

/// Serializes the whole archive into an owned byte buffer.
///
/// Framing: magic and version, a root table, a block-size table, then
/// every block's links packed in wire format.
#[derive(Debug, Default)]
pub struct MemoryIo {
    buffer: Vec<u8>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_buffer(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

impl ArchiveIo for MemoryIo {
    fn write(
        &mut self,
        store: &LinkStore,
        blocks: &[Block],
        roots: &[RootObject],
    ) -> ArchiveResult<()> {
        if roots.len() > u16::MAX as usize {
            return Err(ArchiveError::Malformed("too many root objects".to_string()));
        }
        if blocks.len() > u16::MAX as usize {
            return Err(ArchiveError::Malformed("too many blocks".to_string()));
        }

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());

        out.extend_from_slice(&(roots.len() as u16).to_be_bytes());
        for root in roots {
            out.extend_from_slice(root.digest.as_bytes());
            out.extend_from_slice(&root.kind.to_be_bytes());
        }

        out.extend_from_slice(&(blocks.len() as u16).to_be_bytes());
        for block in blocks {
            out.extend_from_slice(&(block.len() as u32).to_be_bytes());
        }
        for block in blocks {
            store.write_block(&mut out, block).map_err(ArchiveError::from)?;
        }

        debug!(bytes = out.len(), "serialized archive");
        self.buffer = out;
        Ok(())
    }

    fn read(
        &mut self,
        store: &mut LinkStore,
        factory: &dyn LinkDataFactory,
    ) -> ArchiveResult<ArchiveData> {
        let mut source: &[u8] = &self.buffer;

        let mut magic = [0u8; 4];
        source.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ArchiveError::Malformed("bad archive magic".to_string()));
        }
        let version = read_u32(&mut source)?;
        if version != FORMAT_VERSION {
            return Err(ArchiveError::VersionMismatch {
                expected: u64::from(FORMAT_VERSION),
                found: u64::from(version),
            });
        }

        let root_count = read_u16(&mut source)?;
        let mut roots = Vec::with_capacity(root_count as usize);
        for _ in 0..root_count {
            let digest = read_digest(&mut source).map_err(ArchiveError::from)?;
            let kind = read_i32(&mut source)?;
            roots.push(RootObject::new(digest, kind));
        }

        let block_count = read_u16(&mut source)?;
        let mut sizes = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            sizes.push(read_u32(&mut source)?);
        }

        let mut blocks = Vec::with_capacity(sizes.len());
        for size in sizes {
            let mut block = Block::new();
            for _ in 0..size {
                let link = wire::read_link(&mut source, factory)
                    .map_err(ArchiveError::from)?
                    .ok_or_else(|| {
                        ArchiveError::Malformed("archive truncated mid-block".to_string())
                    })?;
                block.append(link.digest());
                store.add_link(link);
            }
            blocks.push(block);
        }

        Ok(ArchiveData::new(blocks, roots))
    }
}

impl LinkSource for MemoryIo {
    /// Scans the serialized blocks for one link. Linear, which is fine for
    /// an in-memory rep; keyed stores index instead.
    fn read_link(
        &mut self,
        store: &LinkStore,
        factory: &dyn LinkDataFactory,
        digest: ContentDigest,
    ) -> ArchiveResult<Arc<DeltaLink>> {
        if let Ok(cached) = store.get(&digest) {
            return Ok(cached);
        }

        let mut source: &[u8] = &self.buffer;
        skip_frame_header(&mut source)?;
        while let Some(link) = wire::read_link(&mut source, factory).map_err(ArchiveError::from)? {
            if link.digest() == digest {
                return Ok(Arc::new(link));
            }
        }
        Err(ArchiveError::Store(
            revarc_store::StoreError::LinkNotFound(digest),
        ))
    }
}

/// Advance past the magic, version, root table, and block-size table,
/// leaving `source` at the first packed link.
fn skip_frame_header(source: &mut &[u8]) -> ArchiveResult<()> {
    let mut magic = [0u8; 4];
    source.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ArchiveError::Malformed("bad archive magic".to_string()));
    }
    let _version = read_u32(source)?;

    let root_count = read_u16(source)?;
    let mut root_table = vec![0u8; root_count as usize * 24];
    source.read_exact(&mut root_table)?;

    let block_count = read_u16(source)?;
    let mut size_table = vec![0u8; block_count as usize * 4];
    source.read_exact(&mut size_table)?;
    Ok(())
}

fn read_u16(source: &mut dyn Read) -> ArchiveResult<u16> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
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
