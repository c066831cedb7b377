use revarc_archive::ArchiveError;
use revarc_types::ContentDigest;

/// Errors from cross-version audit operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A reference failed its bounds checks.
    #[error("invalid archive reference: {0}")]
    InvalidReference(String),

    /// An audited archive lacks a valid archive manifest.
    #[error("archive has no valid manifest: {0}")]
    InvalidArchiveManifest(String),

    /// The archive has no parent references to audit against.
    #[error("archive has no parent references")]
    MissingParentReferences,

    /// An audited archive has no file manifest.
    #[error("archive has no file manifest: {0}")]
    MissingFileManifest(String),

    /// The change-log walk hit a version with multiple parents.
    #[error("non-linear history: version has {0} parents")]
    NonLinearHistory(usize),

    /// No version in the reachable lineage introduced the link.
    #[error("no version introduces link {0}")]
    PerpetratorNotFound(ContentDigest),

    /// Malformed or truncated binary representation.
    #[error("malformed reference bytes: {0}")]
    Malformed(String),

    /// Archive engine failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// I/O error from a resolver or stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
