//! The default revlog-style hunk coder.
//!
//! Payload layout: one tag byte, then the body. Tag `b'u'` means the body is
//! stored raw; tag `b'z'` means it is zstd-compressed. An end link's body is
//! the complete file content. A delta link's body is a sequence of hunks
//!
//! ```text
//! u32 start | u32 end | u32 length | bytes
//! ```
//!
//! each replacing base byte range `[start, end)` with `bytes`. Hunks are
//! ascending and non-overlapping, computed from a line-level Myers edit
//! script.

use std::io::Read;
use std::sync::Arc;

use similar::{capture_diff_slices, Algorithm, DiffOp};
use tracing::debug;

use revarc_store::{DeltaLink, LinkDataFactory, StoreError};
use revarc_types::ContentDigest;

use crate::coder::DeltaCoder;
use crate::error::{DeltaError, DeltaResult};

const TAG_RAW: u8 = b'u';
const TAG_ZSTD: u8 = b'z';

/// Bodies shorter than this are never worth a compression attempt.
const MIN_COMPRESS_LEN: usize = 44;

const ZSTD_LEVEL: i32 = 3;

/// Hunk-based [`DeltaCoder`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct HunkDeltaCoder;

impl HunkDeltaCoder {
    pub fn new() -> Self {
        Self
    }
}

impl DeltaCoder for HunkDeltaCoder {
    fn make_delta(
        &self,
        factory: &dyn LinkDataFactory,
        parent: ContentDigest,
        base: Option<&mut dyn Read>,
        target: &mut dyn Read,
        force_full: bool,
    ) -> DeltaResult<DeltaLink> {
        let mut target_bytes = Vec::new();
        target.read_to_end(&mut target_bytes)?;

        let (is_end, body) = match base {
            Some(_) if force_full => return Err(DeltaError::ForceFullWithBase),
            Some(base) => {
                let mut base_bytes = Vec::new();
                base.read_to_end(&mut base_bytes)?;
                let body = encode_hunks(&base_bytes, &target_bytes)?;
                debug!(
                    base = base_bytes.len(),
                    target = target_bytes.len(),
                    delta = body.len(),
                    "encoded delta"
                );
                (false, body)
            }
            None => (true, target_bytes),
        };

        let payload = pack_payload(body, force_full)?;
        build_link(factory, parent, is_end, &payload)
    }

    fn apply_deltas(&self, chain: &[Arc<DeltaLink>]) -> DeltaResult<Vec<u8>> {
        // The chain is newest-first. Scan forward to the first end link for
        // the base snapshot, then patch the deltas above it oldest-first.
        let mut deltas = Vec::new();
        let mut base = None;
        for link in chain {
            let body = unpack_payload(&link.payload()?)?;
            if link.is_end() {
                base = Some(body);
                break;
            }
            deltas.push(body);
        }

        let mut content = base.ok_or(DeltaError::NoBaseInChain)?;
        for body in deltas.iter().rev() {
            content = apply_hunks(&content, body)?;
        }
        Ok(content)
    }
}

fn build_link(
    factory: &dyn LinkDataFactory,
    parent: ContentDigest,
    is_end: bool,
    payload: &[u8],
) -> DeltaResult<DeltaLink> {
    Ok(DeltaLink::make(
        payload.len() as u64,
        is_end,
        parent,
        &mut &payload[..],
        factory,
    )?)
}

/// Prefix the body with its tag, compressing when it pays off.
fn pack_payload(body: Vec<u8>, force_full: bool) -> DeltaResult<Vec<u8>> {
    if !force_full && body.len() >= MIN_COMPRESS_LEN {
        let compressed = zstd::stream::encode_all(&body[..], ZSTD_LEVEL)?;
        if compressed.len() < body.len() {
            let mut payload = Vec::with_capacity(1 + compressed.len());
            payload.push(TAG_ZSTD);
            payload.extend_from_slice(&compressed);
            return Ok(payload);
        }
    }
    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(TAG_RAW);
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Strip the tag byte and undo compression.
fn unpack_payload(payload: &[u8]) -> DeltaResult<Vec<u8>> {
    let (&tag, body) = payload
        .split_first()
        .ok_or_else(|| DeltaError::Malformed("empty payload".to_string()))?;
    match tag {
        TAG_RAW => Ok(body.to_vec()),
        TAG_ZSTD => zstd::stream::decode_all(body)
            .map_err(|e| DeltaError::Malformed(format!("bad zstd body: {e}"))),
        other => Err(DeltaError::Malformed(format!(
            "unknown payload tag {other:#04x}"
        ))),
    }
}

/// Split into lines, each keeping its trailing newline.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (index, &byte) in data.iter().enumerate() {
        if byte == b'\n' {
            lines.push(&data[start..=index]);
            start = index + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// Byte offset of the start of each line, plus the total length.
fn line_offsets(lines: &[&[u8]]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(lines.len() + 1);
    let mut total = 0;
    offsets.push(0);
    for line in lines {
        total += line.len();
        offsets.push(total);
    }
    offsets
}

/// Encode the hunks transforming `base` into `target`.
fn encode_hunks(base: &[u8], target: &[u8]) -> DeltaResult<Vec<u8>> {
    let base_lines = split_lines(base);
    let target_lines = split_lines(target);
    let base_offsets = line_offsets(&base_lines);
    let target_offsets = line_offsets(&target_lines);

    let ops = capture_diff_slices(Algorithm::Myers, &base_lines, &target_lines);

    let mut body = Vec::new();
    for op in ops {
        let (start, end, new_range) = match op {
            DiffOp::Equal { .. } => continue,
            DiffOp::Delete {
                old_index,
                old_len,
                new_index,
            } => (
                base_offsets[old_index],
                base_offsets[old_index + old_len],
                target_offsets[new_index]..target_offsets[new_index],
            ),
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => (
                base_offsets[old_index],
                base_offsets[old_index],
                target_offsets[new_index]..target_offsets[new_index + new_len],
            ),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => (
                base_offsets[old_index],
                base_offsets[old_index + old_len],
                target_offsets[new_index]..target_offsets[new_index + new_len],
            ),
        };

        let data = &target[new_range];
        let start = u32::try_from(start).map_err(oversized)?;
        let end = u32::try_from(end).map_err(oversized)?;
        let len = u32::try_from(data.len()).map_err(oversized)?;
        body.extend_from_slice(&start.to_be_bytes());
        body.extend_from_slice(&end.to_be_bytes());
        body.extend_from_slice(&len.to_be_bytes());
        body.extend_from_slice(data);
    }
    Ok(body)
}

fn oversized(_: std::num::TryFromIntError) -> DeltaError {
    DeltaError::Store(StoreError::PayloadTooLarge(u64::from(u32::MAX)))
}

/// Apply one delta body's hunks to `base`.
fn apply_hunks(base: &[u8], body: &[u8]) -> DeltaResult<Vec<u8>> {
    let mut output = Vec::with_capacity(base.len());
    let mut cursor = 0usize;
    let mut rest = body;

    while !rest.is_empty() {
        if rest.len() < 12 {
            return Err(DeltaError::Malformed("truncated hunk header".to_string()));
        }
        let start = u32::from_be_bytes(rest[0..4].try_into().unwrap()) as usize;
        let end = u32::from_be_bytes(rest[4..8].try_into().unwrap()) as usize;
        let len = u32::from_be_bytes(rest[8..12].try_into().unwrap()) as usize;
        rest = &rest[12..];

        if rest.len() < len {
            return Err(DeltaError::Malformed("truncated hunk data".to_string()));
        }
        if start > end || end > base.len() {
            return Err(DeltaError::Malformed(format!(
                "hunk range {start}..{end} outside base of {} bytes",
                base.len()
            )));
        }
        if start < cursor {
            return Err(DeltaError::Malformed(format!(
                "hunk at {start} overlaps previous hunk ending at {cursor}"
            )));
        }

        output.extend_from_slice(&base[cursor..start]);
        output.extend_from_slice(&rest[..len]);
        cursor = end;
        rest = &rest[len..];
    }

    output.extend_from_slice(&base[cursor..]);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use revarc_store::RamLinkDataFactory;

    use super::*;

    fn coder() -> HunkDeltaCoder {
        HunkDeltaCoder::new()
    }

    fn end_link(content: &[u8], force_full: bool) -> DeltaLink {
        coder()
            .make_delta(
                &RamLinkDataFactory::new(),
                ContentDigest::NULL,
                None,
                &mut &content[..],
                force_full,
            )
            .unwrap()
    }

    fn delta_link(parent: ContentDigest, base: &[u8], target: &[u8]) -> DeltaLink {
        coder()
            .make_delta(
                &RamLinkDataFactory::new(),
                parent,
                Some(&mut &base[..]),
                &mut &target[..],
                false,
            )
            .unwrap()
    }

    // ------------------------------------------------------------------
    // Payload packing
    // ------------------------------------------------------------------

    #[test]
    fn short_body_is_stored_raw() {
        let link = end_link(b"tiny", false);
        let payload = link.payload().unwrap();
        assert_eq!(payload[0], TAG_RAW);
        assert_eq!(&payload[1..], b"tiny");
    }

    #[test]
    fn compressible_body_is_stored_compressed() {
        let content = vec![b'a'; 400];
        let link = end_link(&content, false);
        let payload = link.payload().unwrap();
        assert_eq!(payload[0], TAG_ZSTD);
        assert!(payload.len() < content.len());
    }

    #[test]
    fn force_full_skips_compression() {
        let content = vec![b'a'; 400];
        let link = end_link(&content, true);
        let payload = link.payload().unwrap();
        assert_eq!(payload[0], TAG_RAW);
        assert_eq!(payload.len(), content.len() + 1);
    }

    #[test]
    fn force_full_with_base_is_rejected() {
        let err = coder()
            .make_delta(
                &RamLinkDataFactory::new(),
                ContentDigest::NULL,
                Some(&mut &b"base"[..]),
                &mut &b"target"[..],
                true,
            )
            .unwrap_err();
        assert!(matches!(err, DeltaError::ForceFullWithBase));
    }

    // ------------------------------------------------------------------
    // Chain application
    // ------------------------------------------------------------------

    #[test]
    fn end_link_roundtrips_content() {
        let link = Arc::new(end_link(b"line one\nline two\n", false));
        let content = coder().apply_deltas(&[link]).unwrap();
        assert_eq!(content, b"line one\nline two\n");
    }

    #[test]
    fn delta_chain_reconstructs_every_revision() {
        let v1 = b"alpha\nbeta\ngamma\n".to_vec();
        let v2 = b"alpha\nBETA\ngamma\n".to_vec();
        let v3 = b"alpha\nBETA\ngamma\ndelta\n".to_vec();

        let base = Arc::new(end_link(&v1, false));
        let second = Arc::new(delta_link(base.digest(), &v1, &v2));
        let third = Arc::new(delta_link(second.digest(), &v2, &v3));

        let chain = vec![Arc::clone(&third), Arc::clone(&second), Arc::clone(&base)];
        assert_eq!(coder().apply_deltas(&chain).unwrap(), v3);

        let chain = vec![Arc::clone(&second), Arc::clone(&base)];
        assert_eq!(coder().apply_deltas(&chain).unwrap(), v2);

        assert_eq!(coder().apply_deltas(&[base]).unwrap(), v1);
    }

    #[test]
    fn small_change_to_large_file_yields_small_delta() {
        let mut base = String::new();
        for index in 0..200 {
            base.push_str(&format!("line number {index} with some padding text\n"));
        }
        let target = base.replace("line number 100 ", "line number CHANGED ");

        let full = end_link(target.as_bytes(), false);
        let delta = delta_link(ContentDigest::EMPTY, base.as_bytes(), target.as_bytes());
        assert!(delta.data_length() < full.data_length() / 4);
    }

    #[test]
    fn chain_without_end_link_has_no_base() {
        let base = end_link(b"v1\n", false);
        let delta = Arc::new(delta_link(base.digest(), b"v1\n", b"v2\n"));
        let err = coder().apply_deltas(&[delta]).unwrap_err();
        assert!(matches!(err, DeltaError::NoBaseInChain));
    }

    #[test]
    fn empty_chain_has_no_base() {
        assert!(matches!(
            coder().apply_deltas(&[]),
            Err(DeltaError::NoBaseInChain)
        ));
    }

    #[test]
    fn binary_content_without_newlines_roundtrips() {
        let v1: Vec<u8> = (0u16..600).map(|n| (n % 251) as u8).collect();
        let mut v2 = v1.clone();
        v2.extend_from_slice(&[1, 2, 3]);

        let base = Arc::new(end_link(&v1, false));
        let delta = Arc::new(delta_link(base.digest(), &v1, &v2));
        let content = coder().apply_deltas(&[delta, base]).unwrap();
        assert_eq!(content, v2);
    }

    // ------------------------------------------------------------------
    // Hunk validation
    // ------------------------------------------------------------------

    #[test]
    fn out_of_range_hunk_is_malformed() {
        let mut body = Vec::new();
        body.extend_from_slice(&10u32.to_be_bytes());
        body.extend_from_slice(&20u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        let err = apply_hunks(b"short", &body).unwrap_err();
        assert!(matches!(err, DeltaError::Malformed(_)));
    }

    #[test]
    fn overlapping_hunks_are_malformed() {
        let mut body = Vec::new();
        for (start, end) in [(0u32, 4u32), (2, 6)] {
            body.extend_from_slice(&start.to_be_bytes());
            body.extend_from_slice(&end.to_be_bytes());
            body.extend_from_slice(&0u32.to_be_bytes());
        }
        let err = apply_hunks(b"0123456789", &body).unwrap_err();
        assert!(matches!(err, DeltaError::Malformed(_)));
    }

    #[test]
    fn truncated_hunk_is_malformed() {
        let err = apply_hunks(b"base", &[0, 0, 0]).unwrap_err();
        assert!(matches!(err, DeltaError::Malformed(_)));
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let err = unpack_payload(&[b'q', 1, 2, 3]).unwrap_err();
        assert!(matches!(err, DeltaError::Malformed(_)));
    }

    proptest! {
        #[test]
        fn delta_over_arbitrary_bytes_reconstructs_target(
            base in proptest::collection::vec(any::<u8>(), 0..2_000),
            target in proptest::collection::vec(any::<u8>(), 0..2_000),
        ) {
            let end = Arc::new(end_link(&base, false));
            let delta = Arc::new(delta_link(end.digest(), &base, &target));
            let content = coder().apply_deltas(&[delta, Arc::clone(&end)]).unwrap();
            prop_assert_eq!(content, target);
            prop_assert_eq!(coder().apply_deltas(&[end]).unwrap(), base);
        }
    }
}
