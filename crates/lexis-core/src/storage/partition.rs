//! # Partitions
//!
//! One redb table per partition. Keys and values are raw byte slices; the
//! key codecs below fix their layout.
//!
//! Nid keys are the big-endian bytes of the nid with the sign bit flipped,
//! so byte order equals numeric order across negative and positive nids and
//! `table.last()` yields the highest nid in use.

use crate::primitives::{NID_KEY_LEN, UUID_KEY_LEN};
use crate::types::{Category, LexisError, Nid};
use redb::TableDefinition;
use uuid::Uuid;

pub(crate) type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

pub(crate) const UUID_TO_NID: Table = Partition::UuidToNid.table();
pub(crate) const COMPONENT_NID_TO_CITATIONS: Table = Partition::ComponentCitations.table();
pub(crate) const PATTERN_NID_TO_SEMANTIC_NIDS: Table = Partition::PatternMembers.table();

/// Every persisted partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Entities(Category),
    UuidToNid,
    ComponentCitations,
    PatternMembers,
}

impl Partition {
    pub const ALL: [Partition; 7] = [
        Partition::Entities(Category::Concept),
        Partition::Entities(Category::Semantic),
        Partition::Entities(Category::Pattern),
        Partition::Entities(Category::Stamp),
        Partition::UuidToNid,
        Partition::ComponentCitations,
        Partition::PatternMembers,
    ];

    pub(crate) const fn table(self) -> Table {
        TableDefinition::new(self.name())
    }

    /// Table name on disk.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Partition::Entities(Category::Concept) => "nid-to-concept",
            Partition::Entities(Category::Semantic) => "nid-to-semantic",
            Partition::Entities(Category::Pattern) => "nid-to-pattern",
            Partition::Entities(Category::Stamp) => "nid-to-stamp",
            Partition::UuidToNid => "uuid-to-nid",
            Partition::ComponentCitations => "component-nid-to-citations",
            Partition::PatternMembers => "pattern-nid-to-semantic-nids",
        }
    }
}

pub(crate) const fn entity_table(category: Category) -> Table {
    Partition::Entities(category).table()
}

// =============================================================================
// KEY CODECS
// =============================================================================

const SIGN_FLIP: u32 = 0x8000_0000;

#[must_use]
pub fn nid_key(nid: Nid) -> [u8; NID_KEY_LEN] {
    ((nid.0 as u32) ^ SIGN_FLIP).to_be_bytes()
}

pub fn nid_from_key(key: &[u8]) -> Result<Nid, LexisError> {
    let raw: [u8; NID_KEY_LEN] = key.try_into().map_err(|_| {
        LexisError::CorruptStore(format!("nid key of {} bytes", key.len()))
    })?;
    Ok(Nid((u32::from_be_bytes(raw) ^ SIGN_FLIP) as i32))
}

#[must_use]
pub fn uuid_key(uuid: &Uuid) -> [u8; UUID_KEY_LEN] {
    *uuid.as_bytes()
}

pub fn uuid_from_key(key: &[u8]) -> Result<Uuid, LexisError> {
    Uuid::from_slice(key)
        .map_err(|_| LexisError::CorruptStore(format!("uuid key of {} bytes", key.len())))
}

/// Map any redb / filesystem error into the crate error.
pub(crate) fn io_err(e: impl std::fmt::Display) -> LexisError {
    LexisError::IoError(e.to_string())
}
