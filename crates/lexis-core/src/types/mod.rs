//! # Core Type Definitions
//!
//! This module contains the identity and error types shared by every layer:
//! - Native ids (`Nid`) and entity categories (`Category`)
//! - Global identifiers (`PublicId`), a non-empty set of aliasing UUIDs
//! - Error types (`LexisError`)
//!
//! ## Identity Model
//!
//! A `PublicId` names a real-world entity and is stable across stores.
//! A `Nid` is the compact, process-local handle the store assigns to it.
//! Every UUID maps to at most one nid; a nid may have many UUID aliases.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// NATIVE ID
// =============================================================================

/// Dense, process-local 32-bit identity for an entity.
///
/// Assigned once per distinct identifier set and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nid(pub i32);

impl Nid {
    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nid:{}", self.0)
    }
}

// =============================================================================
// CATEGORY
// =============================================================================

/// The kind of entity a nid denotes. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Concept,
    Semantic,
    Pattern,
    Stamp,
}

impl Category {
    /// All categories, in partition probe order.
    pub const ALL: [Category; 4] = [
        Category::Concept,
        Category::Semantic,
        Category::Pattern,
        Category::Stamp,
    ];

    /// One-byte token written in the chronology header.
    #[must_use]
    pub const fn token(self) -> u8 {
        match self {
            Category::Concept => 1,
            Category::Semantic => 2,
            Category::Pattern => 3,
            Category::Stamp => 4,
        }
    }

    /// Inverse of [`Category::token`].
    #[must_use]
    pub const fn from_token(token: u8) -> Option<Self> {
        match token {
            1 => Some(Category::Concept),
            2 => Some(Category::Semantic),
            3 => Some(Category::Pattern),
            4 => Some(Category::Stamp),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Concept => "concept",
            Category::Semantic => "semantic",
            Category::Pattern => "pattern",
            Category::Stamp => "stamp",
        };
        f.write_str(name)
    }
}

// =============================================================================
// PUBLIC ID
// =============================================================================

/// An immutable, non-empty set of UUIDs that all denote the same entity.
///
/// Insertion order is preserved (the first UUID is the primary one) and
/// duplicates are dropped, so encoding a `PublicId` is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicId {
    uuids: Vec<Uuid>,
}

impl PublicId {
    /// Build a public id from one or more UUIDs.
    ///
    /// Returns `LexisError::EmptyIdentifier` when no UUID is supplied.
    pub fn new(uuids: impl IntoIterator<Item = Uuid>) -> Result<Self, LexisError> {
        let mut unique: Vec<Uuid> = Vec::new();
        for uuid in uuids {
            if !unique.contains(&uuid) {
                unique.push(uuid);
            }
        }
        if unique.is_empty() {
            return Err(LexisError::EmptyIdentifier);
        }
        Ok(Self { uuids: unique })
    }

    /// A public id with exactly one UUID.
    #[must_use]
    pub fn single(uuid: Uuid) -> Self {
        Self { uuids: vec![uuid] }
    }

    /// A fresh random (v4) public id.
    #[must_use]
    pub fn random() -> Self {
        Self::single(Uuid::new_v4())
    }

    /// The aliases, primary first.
    #[must_use]
    pub fn uuids(&self) -> &[Uuid] {
        &self.uuids
    }

    /// The primary (first) UUID.
    #[must_use]
    pub fn primary(&self) -> Uuid {
        // Non-empty by construction.
        self.uuids[0]
    }

    /// Check whether `uuid` is one of the aliases.
    #[must_use]
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.uuids.contains(uuid)
    }

    /// Union of both alias lists, `self` first.
    #[must_use]
    pub fn union(&self, other: &PublicId) -> PublicId {
        let mut uuids = self.uuids.clone();
        for uuid in &other.uuids {
            if !uuids.contains(uuid) {
                uuids.push(*uuid);
            }
        }
        PublicId { uuids }
    }
}

impl From<Uuid> for PublicId {
    fn from(uuid: Uuid) -> Self {
        Self::single(uuid)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Lexis store.
///
/// - No silent failures and no sentinel values
/// - Use `Result<T, LexisError>` for fallible operations
/// - Identity and codec errors are never recovered automatically
#[derive(Debug, Error)]
pub enum LexisError {
    /// A field value was not preceded by a known type tag.
    #[error("Unknown field type tag: {0}")]
    UnknownFieldType(u8),

    /// Bytes were written with a format revision this build cannot read.
    #[error("Unsupported format version: {found} (expected {expected})")]
    UnsupportedFormatVersion { found: u8, expected: u8 },

    /// The aliases of one identifier resolve to different nids.
    #[error("Ambiguous identity: aliases map to {first} and {second}")]
    AmbiguousIdentity { first: Nid, second: Nid },

    /// Stored data violates a store invariant or cannot be decoded.
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// The store has been closed.
    #[error("Store closed")]
    StoreClosed,

    /// A required key was absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A public id must carry at least one UUID.
    #[error("Identifier must contain at least one UUID")]
    EmptyIdentifier,

    /// Input bytes are truncated or otherwise malformed.
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// A bounded writer ran out of room.
    #[error("Buffer overflow: needed {needed} bytes, capacity {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },

    /// Write arguments disagree with the bytes being written.
    #[error("Invalid write: {0}")]
    InvalidWrite(String),

    /// A logical-definition graph is structurally invalid.
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An I/O error occurred in the underlying database or filesystem.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
