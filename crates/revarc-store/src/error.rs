use revarc_types::{ContentDigest, TypeError};

/// Errors from link storage and wire-format operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested link is not in the store.
    #[error("link not found: {0}")]
    LinkNotFound(ContentDigest),

    /// A chain walk exceeded the traversal cap without terminating.
    #[error("cycle suspected walking chain from {head} after {hops} hops")]
    CycleSuspected { head: ContentDigest, hops: usize },

    /// A link with a null parent must be an end link.
    #[error("link with a null parent must be an end link")]
    NullParentNotEnd,

    /// The payload does not fit the wire format's length field.
    #[error("payload of {0} bytes does not fit the wire format")]
    PayloadTooLarge(u64),

    /// Malformed or truncated binary representation.
    #[error("malformed link bytes: {0}")]
    Malformed(String),

    /// Digest parsing failure.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
