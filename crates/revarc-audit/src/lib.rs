//! Provenance auditing across archive versions.
//!
//! An archive records the versions it grew out of as [`Reference`]s under
//! its `PARENT_REFERENCES` root object. Given an [`ArchiveResolver`] that
//! can fetch those versions, this crate answers lineage questions: which
//! links a version introduced ([`added`]), how two versions differ
//! ([`changes`]), which version first introduced each link of a chain
//! ([`history`]), and a file-level change log walked back to the first
//! version ([`manifest_change_log`]).

mod audit;
mod error;
mod refs;

pub use audit::{
    added, changes, history, manifest_change_log, parent_references, ArchiveResolver, LinkChanges,
};
pub use error::{AuditError, AuditResult};
pub use refs::{ExternalRefs, Reference, KIND_LOCAL, KIND_REMOTE};
