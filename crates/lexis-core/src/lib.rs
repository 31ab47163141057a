//! # lexis-core
//!
//! The identity-and-storage engine for Lexis - THE STORE.
//!
//! Lexis keeps versioned terminology data: concepts, semantic assertions,
//! the patterns that define semantic fields, and the stamps that record
//! provenance. Nothing is overwritten. Change is a new version under a new
//! stamp, merged into the entity's chronology.
//!
//! ## Layers
//!
//! - `types`: nids, public ids, categories, errors
//! - `formats`: self-describing field codec, chronology codec, merge rule
//! - `graph`: logical-definition vertices and graphs
//! - `storage`: redb partitions, identity registry, merge store, citations
//! - `service`: seams for the external indexer and searcher
//! - `config`: store configuration
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: NO async, NO network dependencies
//! - Every map that reaches the wire is a `BTreeMap`, so encoding is
//!   deterministic
//! - Per-key read-merge-write happens inside a single redb write transaction
//! - Citation indexes are derived state and can always be rebuilt

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod formats;
pub mod graph;
pub mod primitives;
pub mod service;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{Category, LexisError, Nid, PublicId};

// =============================================================================
// RE-EXPORTS: Formats
// =============================================================================

pub use formats::{
    Chronology, ChronologyHeader, EntityKind, FieldType, FieldValue, StampRecord, Version,
    check_format_version, merge_bytes,
};

// =============================================================================
// RE-EXPORTS: Graph
// =============================================================================

pub use graph::{ComponentRef, DiGraph, ForeignValue, ForeignVertex, GraphVertex, NidResolver};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use config::{BackendKind, StoreConfig};
pub use service::{Indexer, SearchHit, Searcher};
pub use storage::{Citation, EntityCounts, NidAllocator, Partition, Store};
