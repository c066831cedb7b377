//! Delta coding for the Revarc archive engine.
//!
//! File revisions are stored as chains of delta-coded links. This crate owns
//! the [`DeltaCoder`] seam the archive writes against and the default
//! [`HunkDeltaCoder`], a revlog-style line-hunk coder with opportunistic
//! zstd compression.
//!
//! The coder never touches archive state: it turns byte streams into
//! [`DeltaLink`](revarc_store::DeltaLink)s and chains back into bytes, and
//! everything else is the archive's business.

pub mod coder;
pub mod error;
pub mod hunk;

pub use coder::DeltaCoder;
pub use error::{DeltaError, DeltaResult};
pub use hunk::HunkDeltaCoder;
