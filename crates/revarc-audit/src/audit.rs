//! Cross-version audits: which links a version introduced, which prior
//! version introduced a given link, and a file-level change log walked
//! back through parent references.
//!
//! Every audited version must carry a valid archive manifest; the link
//! accounting leans on the manifest invariant that an archive's blocks
//! hold exactly its reachable history.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::debug;

use revarc_archive::{kind, Archive, Changes as FileChanges, FileManifest};
use revarc_types::ContentDigest;

use crate::error::{AuditError, AuditResult};
use crate::refs::{ExternalRefs, Reference};

/// Fetches archive versions by reference.
pub trait ArchiveResolver {
    fn resolve(&mut self, reference: &Reference) -> AuditResult<Archive>;
}

/// Link-level difference between two archive versions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkChanges {
    /// Links only the newer version holds.
    pub added: HashSet<ContentDigest>,
    /// Links only the older version holds.
    pub removed: HashSet<ContentDigest>,
    /// Links both versions hold.
    pub common: HashSet<ContentDigest>,
}

/// The parent references stored in `archive`, or the empty list when the
/// root object is unset.
pub fn parent_references(archive: &Archive) -> AuditResult<ExternalRefs> {
    let digest = archive.root_object(kind::PARENT_REFERENCES);
    if digest.is_null() {
        return Ok(ExternalRefs::none());
    }
    ExternalRefs::from_bytes(&mut archive.get_file(digest)?.as_slice())
}

fn require_valid_manifest(archive: &Archive, reference: &Reference) -> AuditResult<()> {
    if !archive.has_valid_archive_manifest()? {
        return Err(AuditError::InvalidArchiveManifest(reference.to_string()));
    }
    Ok(())
}

/// Compare `newer` against the version `older` resolves to.
pub fn changes(
    newer: &Archive,
    older: &Reference,
    resolver: &mut dyn ArchiveResolver,
) -> AuditResult<LinkChanges> {
    require_valid_manifest(newer, &Reference::current_archive())?;
    let other = resolver.resolve(older)?;
    require_valid_manifest(&other, older)?;

    let old_links = other.all_links();
    let new_links = newer.all_links();

    Ok(LinkChanges {
        added: new_links.difference(&old_links).copied().collect(),
        removed: old_links.difference(&new_links).copied().collect(),
        common: new_links.intersection(&old_links).copied().collect(),
    })
}

/// The links `archive` introduced over all of its parents.
///
/// Fails with [`AuditError::MissingParentReferences`] when the archive has
/// no `PARENT_REFERENCES` root object; a version that claims no lineage
/// has nothing to audit against.
pub fn added(
    archive: &Archive,
    resolver: &mut dyn ArchiveResolver,
) -> AuditResult<HashSet<ContentDigest>> {
    let digest = archive.root_object(kind::PARENT_REFERENCES);
    if digest.is_null() {
        return Err(AuditError::MissingParentReferences);
    }
    let refs = ExternalRefs::from_bytes(&mut archive.get_file(digest)?.as_slice())?;

    let mut parent_links = HashSet::new();
    for reference in &refs {
        let parent = resolver.resolve(reference)?;
        require_valid_manifest(&parent, reference)?;
        parent.add_all_links(&mut parent_links);
    }

    let mut current = archive.all_links();
    current.retain(|link| !parent_links.contains(link));
    Ok(current)
}

/// Per-version facts the perpetrator search reuses: resolving and link
/// accounting happen once per reference.
struct SuspectInfo {
    all_links: HashSet<ContentDigest>,
    parents: ExternalRefs,
}

#[derive(Default)]
struct SuspectCache {
    infos: HashMap<Reference, SuspectInfo>,
}

impl SuspectCache {
    /// Load `reference` into the cache, resolving unless the caller
    /// already holds the archive.
    fn ensure(
        &mut self,
        archive: Option<&Archive>,
        reference: &Reference,
        resolver: &mut dyn ArchiveResolver,
    ) -> AuditResult<()> {
        if self.infos.contains_key(reference) {
            return Ok(());
        }
        let resolved;
        let archive = match archive {
            Some(archive) => archive,
            None => {
                debug!(%reference, "resolving suspect version");
                resolved = resolver.resolve(reference)?;
                &resolved
            }
        };
        require_valid_manifest(archive, reference)?;
        let info = SuspectInfo {
            all_links: archive.all_links(),
            parents: parent_references(archive)?,
        };
        self.infos.insert(reference.clone(), info);
        Ok(())
    }

    /// Cached info; the caller must have `ensure`d the reference.
    fn info(&self, reference: &Reference) -> &SuspectInfo {
        &self.infos[reference]
    }
}

/// Did this exact version introduce `link`, or did it inherit it from a
/// parent?
fn is_perpetrator(
    cache: &mut SuspectCache,
    reference: &Reference,
    link: ContentDigest,
    resolver: &mut dyn ArchiveResolver,
) -> AuditResult<bool> {
    cache.ensure(None, reference, resolver)?;
    let parents: Vec<Reference> = cache.info(reference).parents.refs().to_vec();

    let mut inherited = HashSet::new();
    for parent in &parents {
        cache.ensure(None, parent, resolver)?;
        inherited.extend(cache.info(parent).all_links.iter().copied());
    }

    let info = cache.info(reference);
    Ok(info.all_links.contains(&link) && !inherited.contains(&link))
}

/// Breadth-first search back through parent references for the version
/// that introduced `link`.
fn find_perpetrator(
    cache: &mut SuspectCache,
    start: &Reference,
    link: ContentDigest,
    resolver: &mut dyn ArchiveResolver,
) -> AuditResult<Reference> {
    let mut queue = VecDeque::from([start.clone()]);
    let mut seen = HashSet::new();

    while let Some(suspect) = queue.pop_front() {
        if !seen.insert(suspect.clone()) {
            continue;
        }
        if is_perpetrator(cache, &suspect, link, resolver)? {
            return Ok(suspect);
        }
        queue.extend(cache.info(&suspect).parents.refs().iter().cloned());
    }
    Err(AuditError::PerpetratorNotFound(link))
}

/// For each link of `chain`, newest first, the version that introduced
/// it.
///
/// `archive` is the already-loaded archive `archive_ref` names; `None`
/// for the ref means the unpublished current version. The search narrows
/// as it goes: once a link is attributed, older links cannot have been
/// introduced by a newer version.
pub fn history(
    archive: &Archive,
    archive_ref: Option<Reference>,
    chain: &[ContentDigest],
    resolver: &mut dyn ArchiveResolver,
) -> AuditResult<Vec<Reference>> {
    let mut current = archive_ref.unwrap_or_else(Reference::current_archive);
    let mut cache = SuspectCache::default();
    cache.ensure(Some(archive), &current, resolver)?;

    let mut attributions = Vec::with_capacity(chain.len());
    for link in chain {
        let perpetrator = find_perpetrator(&mut cache, &current, *link, resolver)?;
        attributions.push(perpetrator.clone());
        current = perpetrator;
    }
    Ok(attributions)
}

/// Walk the version lineage backward, reporting the file-level changes each
/// version made over its parent. The callback returns `false` to stop the
/// walk early. Histories with merge points are refused.
pub fn manifest_change_log(
    latest_ref: &Reference,
    archive: &Archive,
    resolver: &mut dyn ArchiveResolver,
    callback: &mut dyn FnMut(&Reference, &Reference, &FileChanges) -> bool,
) -> AuditResult<()> {
    if archive.root_object(kind::FILE_MANIFEST).is_null() {
        return Err(AuditError::MissingFileManifest(latest_ref.to_string()));
    }

    let null_ref = Reference::null_archive();
    let mut current_map = FileManifest::from_archive(archive)?.name_map().clone();
    let mut current_ref = latest_ref.clone();
    let mut holder: Option<Archive> = None;

    while current_ref != null_ref {
        let current: &Archive = holder.as_ref().unwrap_or(archive);

        let mut next_ref = null_ref.clone();
        let mut next_map = BTreeMap::new();
        let mut next_holder = None;

        let refs = parent_references(current)?;
        if refs.len() > 1 {
            return Err(AuditError::NonLinearHistory(refs.len()));
        }
        if let Some(parent_ref) = refs.refs().first() {
            let parent = resolver.resolve(parent_ref)?;
            if parent.root_object(kind::FILE_MANIFEST).is_null() {
                return Err(AuditError::MissingFileManifest(parent_ref.to_string()));
            }
            next_map = FileManifest::from_archive(&parent)?.name_map().clone();
            next_ref = parent_ref.clone();
            next_holder = Some(parent);
        }

        let diff = FileManifest::diff(&next_map, &current_map);
        if !callback(&current_ref, &next_ref, &diff) {
            break;
        }

        current_ref = next_ref;
        current_map = next_map;
        holder = next_holder;
    }
    Ok(())
}
