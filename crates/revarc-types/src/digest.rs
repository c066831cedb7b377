use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::TypeError;

/// Length in bytes of a [`ContentDigest`].
pub const DIGEST_LEN: usize = 20;

/// Content-addressed identifier for stored history.
///
/// A `ContentDigest` is the SHA-1 hash of a link's header and payload (or of
/// raw file content, for file-level identity). Identical content always
/// produces the same digest, making links deduplicatable and verifiable.
///
/// Ordering is lexicographic over the lowercase hex encoding. The nibble to
/// character map is monotonic, so this coincides with raw byte order and the
/// derived `Ord` is exact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    /// The null digest (all zeros). A placeholder, never real content.
    pub const NULL: ContentDigest = ContentDigest([0u8; DIGEST_LEN]);

    /// The digest of empty content.
    pub const EMPTY: ContentDigest = ContentDigest([
        0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60,
        0x18, 0x90, 0xaf, 0xd8, 0x07, 0x09,
    ]);

    /// Compute a `ContentDigest` from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create a `ContentDigest` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; DIGEST_LEN]) -> Self {
        Self(hash)
    }

    /// Create a `ContentDigest` from a byte slice of exactly [`DIGEST_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != DIGEST_LEN {
            return Err(TypeError::InvalidLength {
                expected: DIGEST_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; DIGEST_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Returns `true` if this is the null digest.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; DIGEST_LEN]
    }

    /// The raw 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.short_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; DIGEST_LEN]> for ContentDigest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<ContentDigest> for [u8; DIGEST_LEN] {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn from_bytes_is_deterministic() {
        let data = b"hello world";
        let d1 = ContentDigest::from_bytes(data);
        let d2 = ContentDigest::from_bytes(data);
        assert_eq!(d1, d2);
    }

    #[test]
    fn different_data_produces_different_digests() {
        let d1 = ContentDigest::from_bytes(b"hello");
        let d2 = ContentDigest::from_bytes(b"world");
        assert_ne!(d1, d2);
    }

    #[test]
    fn null_is_all_zeros() {
        assert!(ContentDigest::NULL.is_null());
        assert_eq!(ContentDigest::NULL.as_bytes(), &[0u8; DIGEST_LEN]);
    }

    #[test]
    fn empty_is_hash_of_nothing() {
        assert_eq!(ContentDigest::EMPTY, ContentDigest::from_bytes(b""));
        assert_eq!(
            ContentDigest::EMPTY.to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn hex_roundtrip() {
        let digest = ContentDigest::from_bytes(b"test");
        let parsed = ContentDigest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = ContentDigest::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: DIGEST_LEN,
                actual: 2
            }
        );
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        assert!(matches!(
            ContentDigest::from_hex("zz39a3ee5e6b4b0d3255bfef95601890afd80709"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(ContentDigest::from_slice(&[0u8; 19]).is_err());
        assert!(ContentDigest::from_slice(&[0u8; 21]).is_err());
        assert!(ContentDigest::from_slice(&[0u8; 20]).is_ok());
    }

    #[test]
    fn short_hex_is_8_chars() {
        let digest = ContentDigest::from_bytes(b"test");
        assert_eq!(digest.short_hex().len(), 8);
    }

    #[test]
    fn display_is_full_hex() {
        let digest = ContentDigest::from_bytes(b"test");
        let display = format!("{digest}");
        assert_eq!(display.len(), 40);
        assert_eq!(display, digest.to_hex());
    }

    #[test]
    fn serde_roundtrip() {
        let digest = ContentDigest::from_bytes(b"serde test");
        let json = serde_json::to_string(&digest).unwrap();
        let parsed: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(digest, parsed);
    }

    proptest! {
        #[test]
        fn ordering_matches_hex_encoding(a in any::<[u8; DIGEST_LEN]>(), b in any::<[u8; DIGEST_LEN]>()) {
            let da = ContentDigest::from_hash(a);
            let db = ContentDigest::from_hash(b);
            prop_assert_eq!(da.cmp(&db), da.to_hex().cmp(&db.to_hex()));
        }
    }
}
