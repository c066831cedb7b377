//! Foundation types for the Revarc archive engine.
//!
//! Revarc is a write-once, content-addressed archive: every piece of stored
//! history is identified by the SHA-1 digest of its bytes. This crate holds
//! the digest type and hashing helpers every other revarc crate builds on.
//!
//! # Key Types
//!
//! - [`ContentDigest`] — 20-byte content hash, the universal key type
//! - [`LinkHasher`] — running hash over a link's header fields and payload
//! - [`ContentHasher`] — running hash over whole-file content

pub mod digest;
pub mod error;
pub mod hasher;

pub use digest::{ContentDigest, DIGEST_LEN};
pub use error::TypeError;
pub use hasher::{ContentHasher, LinkHasher};
