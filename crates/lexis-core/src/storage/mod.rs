//! # Storage
//!
//! redb-backed persistence:
//! - `partition`: table definitions and key codecs
//! - `identity`: UUID -> nid registry and nid allocation
//! - `store`: merge-on-write chronology store
//! - `citation`: derived citation and pattern-member indexes

pub mod citation;
pub mod identity;
pub mod partition;
pub mod store;

pub use citation::Citation;
pub use identity::NidAllocator;
pub use partition::Partition;
pub use store::{EntityCounts, Store};
