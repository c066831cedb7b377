use revarc_delta::DeltaError;
use revarc_store::StoreError;
use revarc_types::{ContentDigest, TypeError};

/// Errors from archive operations.
///
/// Recoverable not-found and format failures are variants here; internal
/// invariant violations (a root object missing from every block, a
/// disordered partition plan, an invalid manifest right after producing
/// one) panic instead, because they indicate an engine bug rather than bad
/// input.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A transactional operation was called outside a transaction.
    #[error("not updating; call start_update first")]
    NotUpdating,

    /// An operation that requires the idle state was called mid-transaction.
    #[error("operation not allowed while an update is open")]
    UpdateInProgress,

    /// A null digest was passed where real content is required.
    #[error("null digest passed for {0}")]
    NullDigest(&'static str),

    /// The named file is not in the manifest.
    #[error("file not in the manifest: {0}")]
    FileNotFound(String),

    /// A name map entry points at a file digest the digest map lacks.
    #[error("corrupt file manifest: unresolved file digest {0}")]
    UnresolvedFileDigest(ContentDigest),

    /// Binary format version mismatch.
    #[error("unsupported format version {found}, expected {expected}")]
    VersionMismatch { expected: u64, found: u64 },

    /// Malformed or truncated binary representation.
    #[error("malformed archive bytes: {0}")]
    Malformed(String),

    /// A manifest was serialized or deserialized in an impossible shape.
    #[error("invalid archive manifest: {0}")]
    InvalidManifest(String),

    /// The stored archive manifest does not describe the archive read from.
    #[error("archive manifest does not match archive contents")]
    ManifestMismatch,

    /// Link storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Delta coding failure.
    #[error(transparent)]
    Delta(#[from] DeltaError),

    /// Digest parsing failure.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error from an IO collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;
