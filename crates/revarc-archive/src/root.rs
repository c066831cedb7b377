//! Root objects: typed, named entry points into the archive's content graph.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use revarc_store::LinkStore;
use revarc_types::ContentDigest;

use crate::archive::Archive;
use crate::error::ArchiveResult;
use crate::file_manifest::FileManifest;

/// Well-known root object kinds.
///
/// The kind space is open. Unknown kinds are carried and ignored by audit
/// code, never rejected.
pub mod kind {
    pub const ARCHIVE_MANIFEST: i32 = 1;
    pub const FILE_MANIFEST: i32 = 2;
    /// A single file chain, for archives too small to need a manifest.
    pub const SINGLE_FILE: i32 = 3;
    pub const PARENT_REFERENCES: i32 = 4;
    /// Reserved for rebase-style parent references. Opaque to audit code.
    pub const REBASE_REFERENCES: i32 = 5;
}

/// One typed entry point: a chain-head digest and an integer kind.
///
/// Root object lists sort by `(kind, hex(digest))` so the same set always
/// serializes to identical bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootObject {
    pub digest: ContentDigest,
    pub kind: i32,
}

impl RootObject {
    pub fn new(digest: ContentDigest, kind: i32) -> Self {
        Self { digest, kind }
    }
}

impl Ord for RootObject {
    fn cmp(&self, other: &Self) -> Ordering {
        // First by kind, then by digest hex. Digest ordering already equals
        // hex ordering, so comparing the value directly is exact.
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

impl PartialOrd for RootObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Materialized container behind a root object, dispatched by kind.
///
/// Only file manifests declare links beyond their own storage chain; every
/// other kind, known or unknown, is opaque with an empty referenced set.
pub enum RootContainer {
    FileManifest(FileManifest),
    Opaque,
}

impl RootContainer {
    /// Marshal the container a root object points at.
    pub fn for_root(archive: &Archive, root: &RootObject) -> ArchiveResult<RootContainer> {
        match root.kind {
            kind::FILE_MANIFEST => {
                let bytes = archive.get_file(root.digest)?;
                Ok(RootContainer::FileManifest(FileManifest::from_bytes(
                    &mut bytes.as_slice(),
                )?))
            }
            // The archive already accounts for the chains these live in.
            _ => Ok(RootContainer::Opaque),
        }
    }

    /// Links the container references beyond its own storage chain.
    pub fn referenced_links(&self, store: &LinkStore) -> ArchiveResult<HashSet<ContentDigest>> {
        match self {
            RootContainer::FileManifest(manifest) => manifest.referenced_links(store),
            RootContainer::Opaque => Ok(HashSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_is_by_kind_then_digest_hex() {
        let low = ContentDigest::from_hex("00aa000000000000000000000000000000000000").unwrap();
        let high = ContentDigest::from_hex("ff00000000000000000000000000000000000000").unwrap();

        let mut roots = vec![
            RootObject::new(high, kind::FILE_MANIFEST),
            RootObject::new(low, kind::FILE_MANIFEST),
            RootObject::new(high, kind::ARCHIVE_MANIFEST),
        ];
        roots.sort();

        assert_eq!(roots[0].kind, kind::ARCHIVE_MANIFEST);
        assert_eq!(roots[1].digest, low);
        assert_eq!(roots[2].digest, high);
    }

    #[test]
    fn unknown_kind_is_opaque() {
        let archive = Archive::new();
        let root = RootObject::new(ContentDigest::from_bytes(b"x"), 99);
        let container = RootContainer::for_root(&archive, &root).unwrap();
        assert!(matches!(container, RootContainer::Opaque));
        assert!(container
            .referenced_links(&LinkStore::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn rebase_references_kind_is_opaque() {
        let archive = Archive::new();
        let root = RootObject::new(ContentDigest::from_bytes(b"x"), kind::REBASE_REFERENCES);
        assert!(matches!(
            RootContainer::for_root(&archive, &root).unwrap(),
            RootContainer::Opaque
        ));
    }
}
