//! # Citation Index
//!
//! Two derived partitions, maintained by semantic writes:
//! - `component-nid-to-citations`: referenced component -> `(semantic, pattern)`
//! - `pattern-nid-to-semantic-nids`: pattern -> member semantics
//!
//! Values are postcard-encoded lists. Appends are append-if-absent and run
//! in the caller's write transaction. Both partitions can be rebuilt from
//! the semantic partition at any time.

use crate::formats::Chronology;
use crate::storage::partition::{
    COMPONENT_NID_TO_CITATIONS, PATTERN_NID_TO_SEMANTIC_NIDS, entity_table, io_err,
    nid_from_key, nid_key,
};
use crate::storage::store::{EntityCounts, Store};
use crate::types::{Category, LexisError, Nid};
use redb::{ReadableDatabase, ReadableTable, Table};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::time::Instant;
use tracing::info;

/// A semantic that references a component, and the pattern it instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub semantic: Nid,
    pub pattern: Nid,
}

type IndexTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

fn decode_list<T: DeserializeOwned>(key: Nid, bytes: &[u8]) -> Result<Vec<T>, LexisError> {
    postcard::from_bytes(bytes)
        .map_err(|e| LexisError::CorruptStore(format!("index entry for {}: {}", key, e)))
}

fn encode_list<T: Serialize>(list: &[T]) -> Result<Vec<u8>, LexisError> {
    postcard::to_allocvec(list).map_err(|e| LexisError::SerializationError(e.to_string()))
}

/// Add `item` to the list stored under `key` unless it is already there.
fn append_if_absent<T>(table: &mut IndexTable<'_>, key: Nid, item: T) -> Result<bool, LexisError>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    let raw_key = nid_key(key);
    let mut list: Vec<T> = match table.get(raw_key.as_slice()).map_err(io_err)? {
        Some(value) => decode_list(key, value.value())?,
        None => Vec::new(),
    };
    if list.contains(&item) {
        return Ok(false);
    }
    list.push(item);
    let bytes = encode_list(&list)?;
    table
        .insert(raw_key.as_slice(), bytes.as_slice())
        .map_err(io_err)?;
    Ok(true)
}

/// Record `semantic` against its component and its pattern. Returns whether
/// either list grew.
pub(crate) fn append_citation(
    citations: &mut IndexTable<'_>,
    members: &mut IndexTable<'_>,
    semantic: Nid,
    pattern: Nid,
    referenced_component: Nid,
) -> Result<bool, LexisError> {
    let cited = append_if_absent(
        citations,
        referenced_component,
        Citation { semantic, pattern },
    )?;
    let member = append_if_absent(members, pattern, semantic)?;
    Ok(cited || member)
}

impl Store {
    fn read_list<T: DeserializeOwned>(
        &self,
        table: redb::TableDefinition<'static, &'static [u8], &'static [u8]>,
        key: Nid,
    ) -> Result<Option<Vec<T>>, LexisError> {
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(io_err)?;
            let table = read_txn.open_table(table).map_err(io_err)?;
            let raw_key = nid_key(key);
            match table.get(raw_key.as_slice()).map_err(io_err)? {
                Some(value) => decode_list(key, value.value()).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Every citation recorded against `component`, in append order.
    pub fn citations_of(&self, component: Nid) -> Result<Vec<Citation>, LexisError> {
        Ok(self
            .read_list(COMPONENT_NID_TO_CITATIONS, component)?
            .unwrap_or_default())
    }

    /// Semantics that reference `component`. Empty if none do.
    pub fn citing_semantics_of(&self, component: Nid) -> Result<Vec<Nid>, LexisError> {
        Ok(self
            .citations_of(component)?
            .into_iter()
            .map(|c| c.semantic)
            .collect())
    }

    /// Semantics of `pattern` that reference `component`.
    pub fn citing_semantics_of_pattern(
        &self,
        component: Nid,
        pattern: Nid,
    ) -> Result<Vec<Nid>, LexisError> {
        Ok(self
            .citations_of(component)?
            .into_iter()
            .filter(|c| c.pattern == pattern)
            .map(|c| c.semantic)
            .collect())
    }

    /// Semantics instantiating `pattern`.
    ///
    /// A pattern with no recorded members is `NotFound`.
    pub fn members_of(&self, pattern: Nid) -> Result<Vec<Nid>, LexisError> {
        self.read_list(PATTERN_NID_TO_SEMANTIC_NIDS, pattern)?
            .ok_or_else(|| LexisError::NotFound(format!("no semantics of pattern {}", pattern)))
    }

    /// Clear both citation partitions and replay every stored semantic.
    pub fn rebuild_citations(&self) -> Result<EntityCounts, LexisError> {
        let start = Instant::now();
        let mut counts = EntityCounts::default();
        self.with_db(|db| {
            let write_txn = db.begin_write().map_err(io_err)?;
            write_txn
                .delete_table(COMPONENT_NID_TO_CITATIONS)
                .map_err(io_err)?;
            write_txn
                .delete_table(PATTERN_NID_TO_SEMANTIC_NIDS)
                .map_err(io_err)?;
            {
                let mut citations = write_txn
                    .open_table(COMPONENT_NID_TO_CITATIONS)
                    .map_err(io_err)?;
                let mut members = write_txn
                    .open_table(PATTERN_NID_TO_SEMANTIC_NIDS)
                    .map_err(io_err)?;
                let semantics = write_txn
                    .open_table(entity_table(Category::Semantic))
                    .map_err(io_err)?;
                for entry in semantics.iter().map_err(io_err)? {
                    let (key, value) = entry.map_err(io_err)?;
                    let nid = nid_from_key(key.value())?;
                    let chronology = Chronology::decode(value.value())
                        .map_err(|e| Store::corrupt(nid, Category::Semantic, &e))?;
                    if let (Some(pattern), Some(component)) = (
                        chronology.pattern_nid(),
                        chronology.referenced_component_nid(),
                    ) {
                        append_citation(&mut citations, &mut members, nid, pattern, component)?;
                    }
                    counts.record(Category::Semantic);
                }
            }
            write_txn.commit().map_err(io_err)
        })?;
        counts.elapsed = start.elapsed();
        info!(?counts, "rebuilt citation index");
        Ok(counts)
    }
}

// =============================================================================
// TESTS
// =============================================================================
