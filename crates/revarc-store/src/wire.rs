//! The exact binary representation links travel in.
//!
//! Per link, network byte order:
//!
//! ```text
//! u32      total_length   header (25 bytes) + payload length
//! u8       flags          bit 0 = end link
//! [u8;20]  parent digest
//! [u8;..]  payload
//! ```
//!
//! The link's own digest is never stored. Readers recompute it from the
//! decoded header and payload, so corrupt bytes cannot carry a digest that
//! does not match their content.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use revarc_types::{ContentDigest, DIGEST_LEN};
use tracing::debug;

use crate::data::LinkDataFactory;
use crate::error::{StoreError, StoreResult};
use crate::link::DeltaLink;

/// Fixed header length preceding each link's payload.
pub const LINK_HEADER_LEN: u64 = 4 + 1 + DIGEST_LEN as u64;

const FLAG_IS_END: u8 = 1;

/// Length of one link's binary representation.
pub fn rep_length(link: &DeltaLink) -> u64 {
    link.data_length() + LINK_HEADER_LEN
}

/// Total binary length of a packed sequence of links.
pub fn rep_length_all<'a, I>(links: I) -> u64
where
    I: IntoIterator<Item = &'a Arc<DeltaLink>>,
{
    links.into_iter().map(|link| rep_length(link)).sum()
}

/// Write one link's binary representation into `sink`.
///
/// Fails with [`StoreError::PayloadTooLarge`] if the total length does not
/// fit the `u32` length field.
pub fn write_link(sink: &mut dyn Write, link: &DeltaLink) -> StoreResult<()> {
    let total = rep_length(link);
    let total = u32::try_from(total).map_err(|_| StoreError::PayloadTooLarge(link.data_length()))?;

    sink.write_all(&total.to_be_bytes())?;
    sink.write_all(&[if link.is_end() { FLAG_IS_END } else { 0 }])?;
    sink.write_all(link.parent().as_bytes())?;
    link.data().copy_to(sink)?;
    Ok(())
}

/// Write a packed sequence of links into `sink`, one after another.
///
/// Streams link by link; no whole-block buffer is materialized.
pub fn write_links<'a, I>(sink: &mut dyn Write, links: I) -> StoreResult<u64>
where
    I: IntoIterator<Item = &'a Arc<DeltaLink>>,
{
    let mut written = 0u64;
    for link in links {
        write_link(sink, link)?;
        written += rep_length(link);
    }
    Ok(written)
}

/// Read a single 20-byte digest from `source`.
pub fn read_digest(source: &mut dyn Read) -> StoreResult<ContentDigest> {
    let mut bytes = [0u8; DIGEST_LEN];
    source.read_exact(&mut bytes)?;
    Ok(ContentDigest::from_hash(bytes))
}

/// Decode one link from `source`, or `None` at a clean end-of-stream.
///
/// EOF in the middle of a link is a malformed-input error, not a clean end.
pub fn read_link(
    source: &mut dyn Read,
    factory: &dyn LinkDataFactory,
) -> StoreResult<Option<DeltaLink>> {
    let mut length_bytes = [0u8; 4];
    match source.read_exact(&mut length_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(StoreError::Io(e)),
    }

    let total = u64::from(u32::from_be_bytes(length_bytes));
    if total < LINK_HEADER_LEN {
        return Err(StoreError::Malformed(format!(
            "link length {total} shorter than the {LINK_HEADER_LEN}-byte header"
        )));
    }

    let mut flags = [0u8; 1];
    source.read_exact(&mut flags).map_err(truncated)?;
    let parent = read_digest(source).map_err(|e| match e {
        StoreError::Io(io) => truncated(io),
        other => other,
    })?;

    let link = DeltaLink::make(
        total - LINK_HEADER_LEN,
        flags[0] & FLAG_IS_END != 0,
        parent,
        source,
        factory,
    )?;
    Ok(Some(link))
}

/// Decode links from `source` until end-of-stream.
pub fn read_all(
    source: &mut dyn Read,
    factory: &dyn LinkDataFactory,
) -> StoreResult<Vec<DeltaLink>> {
    let mut links = Vec::new();
    while let Some(link) = read_link(source, factory)? {
        links.push(link);
    }
    debug!(count = links.len(), "decoded link stream");
    Ok(links)
}

fn truncated(e: std::io::Error) -> StoreError {
    if e.kind() == ErrorKind::UnexpectedEof {
        StoreError::Malformed("truncated link header".to_string())
    } else {
        StoreError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::data::RamLinkDataFactory;

    use super::*;

    fn make_link(payload: &[u8], is_end: bool, parent: ContentDigest) -> DeltaLink {
        DeltaLink::make(
            payload.len() as u64,
            is_end,
            parent,
            &mut &payload[..],
            &RamLinkDataFactory::new(),
        )
        .unwrap()
    }

    #[test]
    fn roundtrip_single_link() {
        let link = make_link(b"delta payload", true, ContentDigest::NULL);

        let mut bytes = Vec::new();
        write_link(&mut bytes, &link).unwrap();
        assert_eq!(bytes.len() as u64, rep_length(&link));

        let decoded = read_link(&mut bytes.as_slice(), &RamLinkDataFactory::new())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, link);
        assert_eq!(decoded.digest(), link.digest());
        assert!(decoded.is_end());
    }

    #[test]
    fn exact_byte_layout() {
        let parent = ContentDigest::from_bytes(b"parent");
        let link = make_link(b"abc", false, parent);

        let mut bytes = Vec::new();
        write_link(&mut bytes, &link).unwrap();

        // 28 = 25-byte header + 3-byte payload.
        assert_eq!(&bytes[0..4], &28u32.to_be_bytes());
        assert_eq!(bytes[4], 0);
        assert_eq!(&bytes[5..25], parent.as_bytes());
        assert_eq!(&bytes[25..], b"abc");
    }

    #[test]
    fn read_all_decodes_concatenated_stream() {
        let a = Arc::new(make_link(b"first", true, ContentDigest::NULL));
        let b = Arc::new(make_link(b"second", false, a.digest()));

        let mut bytes = Vec::new();
        let written = write_links(&mut bytes, [&a, &b]).unwrap();
        assert_eq!(written, rep_length(&a) + rep_length(&b));

        let decoded = read_all(&mut bytes.as_slice(), &RamLinkDataFactory::new()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], *a);
        assert_eq!(decoded[1], *b);
        assert_eq!(decoded[1].parent(), a.digest());
    }

    #[test]
    fn empty_stream_decodes_as_empty() {
        let decoded = read_all(&mut [].as_slice(), &RamLinkDataFactory::new()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let link = make_link(b"some payload", true, ContentDigest::NULL);
        let mut bytes = Vec::new();
        write_link(&mut bytes, &link).unwrap();
        bytes.truncate(bytes.len() - 4);

        let err = read_link(&mut bytes.as_slice(), &RamLinkDataFactory::new()).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let link = make_link(b"x", true, ContentDigest::NULL);
        let mut bytes = Vec::new();
        write_link(&mut bytes, &link).unwrap();
        bytes.truncate(10);

        let err = read_link(&mut bytes.as_slice(), &RamLinkDataFactory::new()).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn undersized_length_field_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&10u32.to_be_bytes()); // < 25-byte header
        bytes.extend_from_slice(&[0u8; 30]);

        let err = read_link(&mut bytes.as_slice(), &RamLinkDataFactory::new()).unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            is_end in any::<bool>(),
        ) {
            let parent = ContentDigest::from_bytes(b"parent");
            let link = make_link(&payload, is_end, parent);

            let mut bytes = Vec::new();
            write_link(&mut bytes, &link).unwrap();
            let decoded = read_link(&mut bytes.as_slice(), &RamLinkDataFactory::new())
                .unwrap()
                .unwrap();

            prop_assert_eq!(decoded.digest(), link.digest());
            prop_assert_eq!(decoded.is_end(), is_end);
            prop_assert_eq!(decoded.payload().unwrap(), payload);
        }
    }
}
