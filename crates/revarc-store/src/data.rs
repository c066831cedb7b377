//! Payload storage behind links.
//!
//! Where a link's payload bytes physically live is a policy decision the
//! engine stays out of: a [`LinkDataFactory`] materializes storage while the
//! payload streams past, and the engine only ever reads the result back.
//! The RAM implementations here are the defaults; disk or network-backed
//! implementations plug in through the same traits.

use std::io::{Read, Write};
use std::sync::Arc;

use revarc_types::LinkHasher;

use crate::error::{StoreError, StoreResult};

/// Owned payload bytes of one link.
pub trait LinkData: Send + Sync {
    /// Payload length in bytes.
    fn len(&self) -> u64;

    /// Returns `true` if the payload is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a fresh reader over the payload.
    fn reader(&self) -> StoreResult<Box<dyn Read + '_>>;

    /// Stream the payload into `sink`, returning the byte count written.
    fn copy_to(&self, sink: &mut dyn Write) -> StoreResult<u64>;
}

/// Materializes [`LinkData`] from a byte stream.
///
/// Implementations must read exactly `length` bytes from `source` and fold
/// every byte into `hasher`, so the finished link digest covers the payload.
pub trait LinkDataFactory: Send + Sync {
    fn make_link_data(
        &self,
        source: &mut dyn Read,
        length: u64,
        hasher: &mut LinkHasher,
    ) -> StoreResult<Arc<dyn LinkData>>;
}

/// Payload bytes held in memory.
pub struct RamLinkData {
    bytes: Vec<u8>,
}

impl RamLinkData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The stored bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl LinkData for RamLinkData {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn reader(&self) -> StoreResult<Box<dyn Read + '_>> {
        Ok(Box::new(self.bytes.as_slice()))
    }

    fn copy_to(&self, sink: &mut dyn Write) -> StoreResult<u64> {
        sink.write_all(&self.bytes)?;
        Ok(self.bytes.len() as u64)
    }
}

/// RAM-backed [`LinkDataFactory`].
///
/// Constructed and passed explicitly; there is no shared global instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct RamLinkDataFactory;

impl RamLinkDataFactory {
    pub fn new() -> Self {
        Self
    }
}

impl LinkDataFactory for RamLinkDataFactory {
    fn make_link_data(
        &self,
        source: &mut dyn Read,
        length: u64,
        hasher: &mut LinkHasher,
    ) -> StoreResult<Arc<dyn LinkData>> {
        let length = usize::try_from(length).map_err(|_| StoreError::PayloadTooLarge(u64::MAX))?;
        let mut bytes = vec![0u8; length];
        source.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StoreError::Malformed(format!("payload shorter than declared {length} bytes"))
            } else {
                StoreError::Io(e)
            }
        })?;
        hasher.update(&bytes);
        Ok(Arc::new(RamLinkData::new(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use revarc_types::ContentDigest;

    use super::*;

    #[test]
    fn factory_reads_exact_length_and_hashes() {
        let factory = RamLinkDataFactory::new();
        let mut hasher = LinkHasher::for_link(3, true, &ContentDigest::NULL);
        let mut source: &[u8] = b"abcdef";

        let data = factory.make_link_data(&mut source, 3, &mut hasher).unwrap();
        assert_eq!(data.len(), 3);

        let mut out = Vec::new();
        data.copy_to(&mut out).unwrap();
        assert_eq!(out, b"abc");

        // Remaining source bytes are untouched.
        assert_eq!(source, b"def");
    }

    #[test]
    fn factory_rejects_short_source() {
        let factory = RamLinkDataFactory::new();
        let mut hasher = LinkHasher::for_link(10, true, &ContentDigest::NULL);
        let mut source: &[u8] = b"abc";

        let err = factory
            .make_link_data(&mut source, 10, &mut hasher)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn reader_yields_payload() {
        let data = RamLinkData::new(b"payload".to_vec());
        let mut out = Vec::new();
        data.reader().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn empty_payload() {
        let data = RamLinkData::new(Vec::new());
        assert!(data.is_empty());
        assert_eq!(data.len(), 0);
    }
}
