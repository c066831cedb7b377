//! Write-once archive engine: delta-coded file history grouped into
//! geometrically partitioned blocks, with typed root objects as entry
//! points.
//!
//! An [`Archive`] stores files as backward-linked delta chains inside a
//! content-addressed link store. Commits prepend blocks newest first;
//! [`Archive::compress`] merges blocks back under a budget with an
//! LSM-style geometric partitioning, discarding links no root object can
//! reach. A [`FileManifest`] catalogs named files over the chains, and the
//! [`ArchiveManifest`] bootstrap lets the archive describe itself from a
//! single digest.
//!
//! ```
//! use revarc_archive::{Archive, FileManifest};
//!
//! let mut archive = Archive::new();
//! let mut manifest = FileManifest::new();
//! archive.start_update()?;
//! manifest.put_file(&mut archive, "notes.txt", &mut &b"hello\n"[..])?;
//! archive.commit_update()?;
//! assert_eq!(manifest.get_file(&archive, "notes.txt")?, b"hello\n");
//! # Ok::<(), revarc_archive::ArchiveError>(())
//! ```

mod archive;
mod error;
pub mod file_manifest;
mod io;
mod manifest;
pub mod partition;
pub mod root;

pub use archive::{Archive, ArchiveData, MAX_BLOCKS, MAX_CHAIN_LENGTH, REPARTITION_MULTIPLE};
pub use error::{ArchiveError, ArchiveResult};
pub use file_manifest::{Changes, FileManifest, FileManifestIo};
pub use io::{ArchiveIo, LinkSource, MemoryIo};
pub use manifest::ArchiveManifest;
pub use root::{kind, RootContainer, RootObject};

#[cfg(test)]
mod scenario_tests {
    use revarc_types::ContentDigest;

    use super::*;

    /// A catalog of revised files, committed one edit per transaction,
    /// survives manifest maintenance, compaction, and a full IO roundtrip.
    #[test]
    fn edit_compact_persist_reload() {
        let mut archive = Archive::new();
        let mut manifest = FileManifest::new();

        let mut page = String::from("== Front page ==\n\nWelcome.\n");
        for revision in 0..10 {
            page.push_str(&format!("Edit number {revision}.\n"));
            archive.start_update().unwrap();
            manifest
                .put_file(&mut archive, "front_page", &mut page.as_bytes())
                .unwrap();
            if revision == 0 {
                manifest
                    .put_file(&mut archive, "style.css", &mut &b"body { margin: 0 }\n"[..])
                    .unwrap();
            }
            let bytes = manifest.to_bytes().unwrap();
            archive
                .update_root_object(&mut bytes.as_slice(), kind::FILE_MANIFEST)
                .unwrap();
            archive.commit_update().unwrap();
        }
        assert_eq!(archive.blocks().len(), 10);

        archive
            .compress_and_update_archive_manifest(MAX_BLOCKS)
            .unwrap();
        assert!(archive.blocks().len() <= MAX_BLOCKS);
        assert!(archive.has_valid_archive_manifest().unwrap());

        let mut io = MemoryIo::new();
        archive.write(&mut io).unwrap();
        let restored = Archive::load(&mut io).unwrap();
        assert_eq!(restored.archive_data(), archive.archive_data());

        let reloaded = FileManifest::from_archive(&restored).unwrap();
        assert_eq!(reloaded.get_file(&restored, "front_page").unwrap(), page.as_bytes());
        assert_eq!(
            reloaded.get_file(&restored, "style.css").unwrap(),
            b"body { margin: 0 }\n"
        );
    }

    /// The self-describing manifest can be rebuilt from nothing but its
    /// chain head and raw link access.
    #[test]
    fn bootstrap_from_manifest_digest_alone() {
        let mut archive = Archive::new();
        archive.start_update().unwrap();
        let head = archive
            .put_file(&mut &b"file one\n"[..], ContentDigest::NULL)
            .unwrap();
        archive.commit_update().unwrap();
        archive.set_root_object(head, kind::SINGLE_FILE);
        archive
            .compress_and_update_archive_manifest(MAX_BLOCKS)
            .unwrap();

        let manifest_head = archive.root_object(kind::ARCHIVE_MANIFEST);
        assert!(!manifest_head.is_null());

        let mut io = MemoryIo::new();
        archive.write(&mut io).unwrap();

        // All a peer holds is the manifest digest plus link access.
        let factory = revarc_store::RamLinkDataFactory::new();
        let bytes = Archive::read_file(manifest_head, &mut io, &factory).unwrap();
        let manifest =
            ArchiveManifest::from_bytes(&mut bytes.as_slice(), manifest_head).unwrap();

        assert_eq!(manifest.archive_data(), archive.archive_data());
        assert!(manifest.referenced_links().contains(&head));
    }

    /// Maintenance failure restores the previous manifest root.
    #[test]
    fn failed_manifest_update_rolls_back_the_root() {
        let mut archive = Archive::new();
        // No blocks at all: the manifest encode must fail.
        let before = archive.root_object(kind::ARCHIVE_MANIFEST);
        assert!(archive
            .compress_and_update_archive_manifest(MAX_BLOCKS)
            .is_err());
        assert_eq!(archive.root_object(kind::ARCHIVE_MANIFEST), before);
        assert!(!archive.is_updating());
    }
}
