//! Link storage for the Revarc archive engine.
//!
//! A file's revision history is a singly linked chain of [`DeltaLink`]s,
//! walked backward through parent digests. This crate owns the link record
//! itself, the exact binary representation links travel in, the [`Block`]
//! packing unit, and the [`LinkStore`] arena that indexes links by digest.
//!
//! # Design Rules
//!
//! 1. Links are immutable once built; their digest covers every field.
//! 2. The digest is never stored on the wire -- readers recompute it, so
//!    corrupt bytes cannot smuggle in a mismatched digest.
//! 3. The store hands out shared references (`Arc`), never copies.
//! 4. The store does not evict; owners drop links explicitly or rebuild
//!    through compaction.

pub mod block;
pub mod data;
pub mod error;
pub mod link;
pub mod store;
pub mod wire;

pub use block::Block;
pub use data::{LinkData, LinkDataFactory, RamLinkData, RamLinkDataFactory};
pub use error::{StoreError, StoreResult};
pub use link::DeltaLink;
pub use store::{LinkStore, MAX_CHAIN_HOPS};
pub use wire::LINK_HEADER_LEN;
