use revarc_store::StoreError;

/// Errors from delta coding.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// A chain was applied without any end link to serve as the base.
    #[error("no base revision in chain")]
    NoBaseInChain,

    /// Malformed delta payload: bad tag, truncated hunk, overlap, or a
    /// hunk range outside the base.
    #[error("malformed delta: {0}")]
    Malformed(String),

    /// `force_full` was requested together with a base stream.
    #[error("force_full is only allowed without a base revision")]
    ForceFullWithBase,

    /// Link construction or payload access failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error reading a content stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for delta-coding operations.
pub type DeltaResult<T> = Result<T, DeltaError>;
