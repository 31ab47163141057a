//! # Merge Store
//!
//! A redb-backed store of chronology bytes, one partition per category.
//!
//! redb gives us:
//! - ACID transactions with copy-on-write B-trees
//! - MVCC: any number of readers alongside a single writer
//!
//! Every write is a read-merge-write of one key plus its citation appends,
//! all inside one write transaction. Because redb serialises writers, two
//! concurrent writes to the same nid cannot lose each other's versions, and
//! readers never observe a half-applied write.
//!
//! The database handle lives in a `RwLock<Option<_>>`. `close` takes it out;
//! every later call fails with `StoreClosed`.
//!
//! Indexer calls happen after commit, serialised and ordered by commit, so
//! the indexer never ends on an older state than the store holds.

use crate::config::{BackendKind, StoreConfig};
use crate::formats::{Chronology, StampRecord};
use crate::graph::NidResolver;
use crate::service::{Indexer, SearchHit, Searcher};
use crate::storage::citation::append_citation;
use crate::storage::identity::{NidAllocator, recover_next_nid};
use crate::storage::partition::{
    COMPONENT_NID_TO_CITATIONS, PATTERN_NID_TO_SEMANTIC_NIDS, Partition, entity_table, io_err,
    nid_from_key, nid_key,
};
use crate::types::{Category, LexisError, Nid, PublicId};
use parking_lot::{Mutex, RwLock};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// =============================================================================
// ENTITY COUNTS
// =============================================================================

/// Per-partition counts, returned by `entity_counts` and every rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub concepts: u64,
    pub semantics: u64,
    pub patterns: u64,
    pub stamps: u64,
    pub uuids: u64,
    pub elapsed: Duration,
}

impl EntityCounts {
    pub(crate) fn record(&mut self, category: Category) {
        match category {
            Category::Concept => self.concepts += 1,
            Category::Semantic => self.semantics += 1,
            Category::Pattern => self.patterns += 1,
            Category::Stamp => self.stamps += 1,
        }
    }

    /// Entities across all four categories.
    #[must_use]
    pub fn entities(&self) -> u64 {
        self.concepts + self.semantics + self.patterns + self.stamps
    }
}

// =============================================================================
// STORE
// =============================================================================

pub struct Store {
    db: RwLock<Option<Database>>,
    pub(crate) allocator: NidAllocator,
    write_sequence: AtomicU64,
    canceled_stamps: RwLock<BTreeSet<Nid>>,
    /// Commit order of writes, taken while the write transaction is open.
    commit_sequence: AtomicU64,
    /// Commit sequence of the state last handed to the indexer, per nid.
    indexed: Mutex<BTreeMap<Nid, u64>>,
    indexer: Option<Box<dyn Indexer>>,
    searcher: Option<Box<dyn Searcher>>,
    location: String,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .field("next_nid", &self.allocator.peek())
            .field("write_sequence", &self.write_sequence())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a store as described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self, LexisError> {
        let start = Instant::now();
        let (db, location) = match config.backend {
            BackendKind::File => {
                std::fs::create_dir_all(&config.data_root).map_err(io_err)?;
                let path = config.database_path();
                let db = Database::create(&path).map_err(io_err)?;
                (db, path.display().to_string())
            }
            BackendKind::InMemory => {
                let db = Database::builder()
                    .create_with_backend(redb::backends::InMemoryBackend::new())
                    .map_err(io_err)?;
                (db, "memory".to_string())
            }
        };

        let store = Self::from_database(db, location)?;
        if config.rebuild_citations_on_open {
            store.rebuild_citations()?;
        }
        info!(
            location = %store.location,
            next_nid = %store.allocator.peek(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "opened store"
        );
        Ok(store)
    }

    /// Open a file-backed store at exactly `path`.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, LexisError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(io_err)?;
        let store = Self::from_database(db, path.display().to_string())?;
        info!(location = %store.location, next_nid = %store.allocator.peek(), "opened store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, LexisError> {
        Self::open(&StoreConfig::in_memory())
    }

    fn from_database(db: Database, location: String) -> Result<Self, LexisError> {
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            for partition in Partition::ALL {
                write_txn.open_table(partition.table()).map_err(io_err)?;
            }
            write_txn.commit().map_err(io_err)?;
        }

        let next = recover_next_nid(&db)?;
        let canceled = scan_canceled_stamps(&db)?;
        debug!(%next, canceled = canceled.len(), "recovered allocator state");

        Ok(Self {
            db: RwLock::new(Some(db)),
            allocator: NidAllocator::starting_at(next),
            write_sequence: AtomicU64::new(0),
            canceled_stamps: RwLock::new(canceled),
            commit_sequence: AtomicU64::new(0),
            indexed: Mutex::new(BTreeMap::new()),
            indexer: None,
            searcher: None,
            location,
        })
    }

    /// Attach the indexer that sees every committed write.
    #[must_use]
    pub fn with_indexer(mut self, indexer: impl Indexer + 'static) -> Self {
        self.indexer = Some(Box::new(indexer));
        self
    }

    #[must_use]
    pub fn with_searcher(mut self, searcher: impl Searcher + 'static) -> Self {
        self.searcher = Some(Box::new(searcher));
        self
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Run `f` against the open database.
    pub(crate) fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, LexisError>,
    ) -> Result<T, LexisError> {
        // Recursive so callbacks that re-enter the store cannot deadlock
        // against a pending close.
        let guard = self.db.read_recursive();
        let db = guard.as_ref().ok_or(LexisError::StoreClosed)?;
        f(db)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), LexisError> {
        self.with_db(|_| Ok(()))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.db.read_recursive().is_none()
    }

    /// Commit the indexer, then release the database. Only the first call
    /// succeeds; everything afterwards fails with `StoreClosed`.
    pub fn close(&self) -> Result<(), LexisError> {
        let db = self.db.write().take().ok_or(LexisError::StoreClosed)?;
        if let Some(indexer) = &self.indexer {
            if let Err(e) = indexer.commit() {
                warn!(error = %e, "indexer commit failed during close");
            }
        }
        drop(db);
        info!(
            location = %self.location,
            writes = self.write_sequence(),
            "closed store"
        );
        Ok(())
    }

    /// Commit the attached indexer.
    pub fn save(&self) -> Result<(), LexisError> {
        self.ensure_open()?;
        match &self.indexer {
            Some(indexer) => indexer.commit(),
            None => Ok(()),
        }
    }

    /// Number of successful writes since open.
    #[must_use]
    pub fn write_sequence(&self) -> u64 {
        self.write_sequence.load(Ordering::SeqCst)
    }

    pub(crate) fn corrupt(nid: Nid, category: Category, e: &LexisError) -> LexisError {
        LexisError::CorruptStore(format!("{} {} does not decode: {}", category, nid, e))
    }

    // -------------------------------------------------------------------------
    // Write
    // -------------------------------------------------------------------------

    /// Merge `bytes` into the chronology stored for `nid` and return the
    /// merged bytes.
    ///
    /// A semantic is also cited against its referenced component and listed
    /// as a member of its pattern, in the same transaction. `pattern` and
    /// `referenced_component` are optional; when given they must match the
    /// semantic's own header.
    pub fn write(
        &self,
        nid: Nid,
        category: Category,
        bytes: &[u8],
        pattern: Option<Nid>,
        referenced_component: Option<Nid>,
    ) -> Result<Vec<u8>, LexisError> {
        let incoming = Chronology::decode(bytes)?;
        self.write_decoded(nid, category, bytes, &incoming, pattern, referenced_component)
            .map(|(merged, _)| merged)
    }

    /// Write a chronology, deriving category and citation arguments from it.
    /// Returns the merged chronology.
    pub fn write_chronology(&self, chronology: &Chronology) -> Result<Chronology, LexisError> {
        let bytes = chronology.encode()?;
        self.write_decoded(
            chronology.nid,
            chronology.category(),
            &bytes,
            chronology,
            chronology.pattern_nid(),
            chronology.referenced_component_nid(),
        )
        .map(|(_, merged)| merged)
    }

    fn write_decoded(
        &self,
        nid: Nid,
        category: Category,
        bytes: &[u8],
        incoming: &Chronology,
        pattern: Option<Nid>,
        referenced_component: Option<Nid>,
    ) -> Result<(Vec<u8>, Chronology), LexisError> {
        let citation = check_write(nid, category, incoming, pattern, referenced_component)?;

        let (merged_bytes, merged, appended, committed_at) = self.with_db(|db| {
            let write_txn = db.begin_write().map_err(io_err)?;
            let key = nid_key(nid);

            for other in Category::ALL.into_iter().filter(|c| *c != category) {
                let table = write_txn.open_table(entity_table(other)).map_err(io_err)?;
                if table.get(key.as_slice()).map_err(io_err)?.is_some() {
                    warn!(%nid, stored = %other, incoming = %category, "nid in two partitions");
                    return Err(LexisError::CorruptStore(format!(
                        "{} already stored as a {}, cannot write it as a {}",
                        nid, other, category
                    )));
                }
            }

            let (merged_bytes, merged) = {
                let mut table = write_txn
                    .open_table(entity_table(category))
                    .map_err(io_err)?;
                let existing = table
                    .get(key.as_slice())
                    .map_err(io_err)?
                    .map(|v| v.value().to_vec());
                let (merged_bytes, merged) = match existing {
                    None => (bytes.to_vec(), incoming.clone()),
                    Some(existing) => {
                        let existing = Chronology::decode(&existing)
                            .map_err(|e| Self::corrupt(nid, category, &e))?;
                        let merged = existing.merge(incoming)?;
                        (merged.encode()?, merged)
                    }
                };
                table
                    .insert(key.as_slice(), merged_bytes.as_slice())
                    .map_err(io_err)?;
                (merged_bytes, merged)
            };

            let appended = match citation {
                Some((pattern, component)) => {
                    let mut citations = write_txn
                        .open_table(COMPONENT_NID_TO_CITATIONS)
                        .map_err(io_err)?;
                    let mut members = write_txn
                        .open_table(PATTERN_NID_TO_SEMANTIC_NIDS)
                        .map_err(io_err)?;
                    append_citation(&mut citations, &mut members, nid, pattern, component)?
                }
                None => false,
            };

            // redb admits one write transaction at a time, so this order is
            // the commit order.
            let committed_at = self.commit_sequence.fetch_add(1, Ordering::SeqCst) + 1;
            write_txn.commit().map_err(io_err)?;
            Ok((merged_bytes, merged, appended, committed_at))
        })?;

        self.write_sequence.fetch_add(1, Ordering::SeqCst);
        if category == Category::Stamp && carries_cancellation(&merged) {
            self.mark_canceled(nid);
        }
        debug!(
            %nid,
            %category,
            incoming = incoming.versions.len(),
            versions = merged.versions.len(),
            cited = appended,
            "merged write"
        );

        self.index_committed(&merged, committed_at);
        Ok((merged_bytes, merged))
    }

    /// Hand a committed chronology to the indexer unless a later commit for
    /// the same nid was already indexed. Indexer calls are serialised, so the
    /// indexer always ends on the newest committed state.
    fn index_committed(&self, merged: &Chronology, committed_at: u64) {
        let Some(indexer) = &self.indexer else {
            return;
        };
        let mut indexed = self.indexed.lock();
        let last = indexed.entry(merged.nid).or_insert(0);
        if *last > committed_at {
            debug!(nid = %merged.nid, committed_at, last = *last, "skipped stale index update");
            return;
        }
        *last = committed_at;
        if let Err(e) = indexer.index(merged) {
            warn!(nid = %merged.nid, error = %e, "indexer rejected committed write");
        }
    }

    // -------------------------------------------------------------------------
    // Read
    // -------------------------------------------------------------------------

    /// Stored bytes for `nid`, from whichever category partition holds it.
    pub fn read(&self, nid: Nid) -> Result<Option<Vec<u8>>, LexisError> {
        Ok(self.read_entry(nid)?.map(|(_, bytes)| bytes))
    }

    /// The category partition that holds `nid`.
    pub fn category_of(&self, nid: Nid) -> Result<Option<Category>, LexisError> {
        Ok(self.read_entry(nid)?.map(|(category, _)| category))
    }

    pub fn read_chronology(&self, nid: Nid) -> Result<Option<Chronology>, LexisError> {
        self.read_entry(nid)?
            .map(|(category, bytes)| {
                Chronology::decode(&bytes).map_err(|e| Self::corrupt(nid, category, &e))
            })
            .transpose()
    }

    fn read_entry(&self, nid: Nid) -> Result<Option<(Category, Vec<u8>)>, LexisError> {
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(io_err)?;
            probe(&read_txn, nid)
        })
    }

    // -------------------------------------------------------------------------
    // Iteration
    // -------------------------------------------------------------------------

    /// Visit every `(nid, bytes)` of one category in ascending nid order.
    pub fn for_each(
        &self,
        category: Category,
        mut f: impl FnMut(Nid, &[u8]),
    ) -> Result<(), LexisError> {
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(io_err)?;
            let table = read_txn
                .open_table(entity_table(category))
                .map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (key, value) = entry.map_err(io_err)?;
                f(nid_from_key(key.value())?, value.value());
            }
            Ok(())
        })
    }

    /// Visit every nid of one category in ascending order.
    pub fn for_each_nid(
        &self,
        category: Category,
        mut f: impl FnMut(Nid),
    ) -> Result<(), LexisError> {
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(io_err)?;
            let table = read_txn
                .open_table(entity_table(category))
                .map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (key, _) = entry.map_err(io_err)?;
                f(nid_from_key(key.value())?);
            }
            Ok(())
        })
    }

    /// Visit every stored entity, category by category in probe order.
    pub fn for_each_entity(
        &self,
        mut f: impl FnMut(Category, Nid, &[u8]),
    ) -> Result<(), LexisError> {
        for category in Category::ALL {
            self.for_each(category, |nid, bytes| f(category, nid, bytes))?;
        }
        Ok(())
    }

    /// Visit the stored bytes of each listed nid that exists. Absent nids
    /// are skipped.
    pub fn for_each_of(
        &self,
        nids: &[Nid],
        mut f: impl FnMut(Nid, &[u8]),
    ) -> Result<(), LexisError> {
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(io_err)?;
            for &nid in nids {
                if let Some((_, bytes)) = probe(&read_txn, nid)? {
                    f(nid, &bytes);
                }
            }
            Ok(())
        })
    }

    pub fn nids_of(&self, category: Category) -> Result<Vec<Nid>, LexisError> {
        let mut nids = Vec::new();
        self.for_each_nid(category, |nid| nids.push(nid))?;
        Ok(nids)
    }

    pub fn concept_nids(&self) -> Result<Vec<Nid>, LexisError> {
        self.nids_of(Category::Concept)
    }

    pub fn semantic_nids(&self) -> Result<Vec<Nid>, LexisError> {
        self.nids_of(Category::Semantic)
    }

    pub fn pattern_nids(&self) -> Result<Vec<Nid>, LexisError> {
        self.nids_of(Category::Pattern)
    }

    pub fn stamp_nids(&self) -> Result<Vec<Nid>, LexisError> {
        self.nids_of(Category::Stamp)
    }

    pub fn entity_counts(&self) -> Result<EntityCounts, LexisError> {
        let start = Instant::now();
        let mut counts = self.with_db(|db| {
            let read_txn = db.begin_read().map_err(io_err)?;
            let len = |partition: Partition| -> Result<u64, LexisError> {
                read_txn
                    .open_table(partition.table())
                    .map_err(io_err)?
                    .len()
                    .map_err(io_err)
            };
            Ok(EntityCounts {
                concepts: len(Partition::Entities(Category::Concept))?,
                semantics: len(Partition::Entities(Category::Semantic))?,
                patterns: len(Partition::Entities(Category::Pattern))?,
                stamps: len(Partition::Entities(Category::Stamp))?,
                uuids: len(Partition::UuidToNid)?,
                elapsed: Duration::ZERO,
            })
        })?;
        counts.elapsed = start.elapsed();
        Ok(counts)
    }

    // -------------------------------------------------------------------------
    // Canceled stamps
    // -------------------------------------------------------------------------

    /// Mark a stamp as canceled for this process.
    pub fn add_canceled_stamp_nid(&self, stamp: Nid) -> Result<(), LexisError> {
        self.ensure_open()?;
        self.mark_canceled(stamp);
        Ok(())
    }

    pub fn is_canceled_stamp_nid(&self, stamp: Nid) -> Result<bool, LexisError> {
        self.ensure_open()?;
        Ok(self.canceled_stamps.read().contains(&stamp))
    }

    fn mark_canceled(&self, stamp: Nid) {
        if self.canceled_stamps.write().insert(stamp) {
            debug!(%stamp, "stamp canceled");
        }
    }

    // -------------------------------------------------------------------------
    // Search
    // -------------------------------------------------------------------------

    /// Ask the attached searcher. Fails with `NotFound` when none is attached.
    pub fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, LexisError> {
        self.ensure_open()?;
        let searcher = self
            .searcher
            .as_ref()
            .ok_or_else(|| LexisError::NotFound("no searcher attached".to_string()))?;
        searcher.search(query, max_results)
    }

    /// Replay every stored entity into the attached indexer, then commit it.
    pub fn rebuild_search_index(&self) -> Result<EntityCounts, LexisError> {
        self.ensure_open()?;
        let start = Instant::now();
        let indexer = self
            .indexer
            .as_ref()
            .ok_or_else(|| LexisError::NotFound("no indexer attached".to_string()))?;
        // Writes committed meanwhile index after the replay, on newer state.
        let _indexing = self.indexed.lock();

        let mut counts = EntityCounts::default();
        let mut failure = None;
        self.for_each_entity(|category, nid, bytes| {
            if failure.is_some() {
                return;
            }
            let result = Chronology::decode(bytes)
                .map_err(|e| Self::corrupt(nid, category, &e))
                .and_then(|chronology| indexer.index(&chronology));
            match result {
                Ok(()) => counts.record(category),
                Err(e) => failure = Some(e),
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        indexer.commit()?;

        counts.elapsed = start.elapsed();
        info!(?counts, "rebuilt search index");
        Ok(counts)
    }
}

impl NidResolver for Store {
    fn resolve(&self, public_id: &PublicId) -> Result<Nid, LexisError> {
        self.nid_for(public_id)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Validate write arguments against the decoded bytes. Returns the
/// `(pattern, referenced component)` pair to cite, if any.
///
/// Every semantic is cited from its own header, so the incremental indexes
/// always equal a full rebuild. Explicit arguments must agree with it.
fn check_write(
    nid: Nid,
    category: Category,
    incoming: &Chronology,
    pattern: Option<Nid>,
    referenced_component: Option<Nid>,
) -> Result<Option<(Nid, Nid)>, LexisError> {
    if incoming.nid != nid {
        return Err(LexisError::InvalidWrite(format!(
            "bytes carry {} but the write targets {}",
            incoming.nid, nid
        )));
    }
    if incoming.category() != category {
        return Err(LexisError::InvalidWrite(format!(
            "bytes carry a {} but the write targets the {} partition",
            incoming.category(),
            category
        )));
    }
    if incoming.has_duplicate_stamps() {
        return Err(LexisError::InvalidWrite(format!(
            "{} repeats a stamp within one write",
            nid
        )));
    }

    match (pattern, referenced_component) {
        (None, None) => Ok(incoming
            .pattern_nid()
            .zip(incoming.referenced_component_nid())),
        (Some(pattern), Some(component)) => {
            if category != Category::Semantic {
                return Err(LexisError::InvalidWrite(format!(
                    "citation arguments on a {} write",
                    category
                )));
            }
            if incoming.pattern_nid() != Some(pattern)
                || incoming.referenced_component_nid() != Some(component)
            {
                return Err(LexisError::InvalidWrite(format!(
                    "citation arguments ({}, {}) disagree with semantic {}",
                    pattern, component, nid
                )));
            }
            Ok(Some((pattern, component)))
        }
        (Some(_), None) => Err(LexisError::InvalidWrite(format!(
            "{} names a pattern without a referenced component",
            nid
        ))),
        (None, Some(_)) => Err(LexisError::InvalidWrite(format!(
            "{} names a referenced component without a pattern",
            nid
        ))),
    }
}

/// Look `nid` up in every category partition. A hit in more than one is
/// `CorruptStore`.
fn probe(
    read_txn: &redb::ReadTransaction,
    nid: Nid,
) -> Result<Option<(Category, Vec<u8>)>, LexisError> {
    let key = nid_key(nid);
    let mut hit: Option<(Category, Vec<u8>)> = None;
    for category in Category::ALL {
        let table = read_txn
            .open_table(entity_table(category))
            .map_err(io_err)?;
        if let Some(value) = table.get(key.as_slice()).map_err(io_err)? {
            if let Some((first, _)) = &hit {
                warn!(%nid, first = %first, second = %category, "nid in two partitions");
                return Err(LexisError::CorruptStore(format!(
                    "{} found in both the {} and {} partitions",
                    nid, first, category
                )));
            }
            hit = Some((category, value.value().to_vec()));
        }
    }
    Ok(hit)
}

/// True if any version of a stamp chronology is a cancellation.
fn carries_cancellation(chronology: &Chronology) -> bool {
    chronology.stamp_records().is_ok_and(|records| {
        records
            .iter()
            .any(|r| r.time == StampRecord::CANCELED_TIME)
    })
}

fn scan_canceled_stamps(db: &Database) -> Result<BTreeSet<Nid>, LexisError> {
    let read_txn = db.begin_read().map_err(io_err)?;
    let table = read_txn
        .open_table(entity_table(Category::Stamp))
        .map_err(io_err)?;
    let mut canceled = BTreeSet::new();
    for entry in table.iter().map_err(io_err)? {
        let (key, value) = entry.map_err(io_err)?;
        let nid = nid_from_key(key.value())?;
        let chronology = Chronology::decode(value.value())
            .map_err(|e| Store::corrupt(nid, Category::Stamp, &e))?;
        if carries_cancellation(&chronology) {
            canceled.insert(nid);
        }
    }
    Ok(canceled)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FieldValue;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn status(text: &str) -> Vec<FieldValue> {
        vec![FieldValue::String(format!("status={}", text))]
    }

    fn concept(store: &Store, n: u128) -> Chronology {
        let public_id = PublicId::single(Uuid::from_u128(n));
        let nid = store.nid_for(&public_id).expect("nid");
        Chronology::concept(nid, public_id)
    }

    #[test]
    fn first_write_stores_bytes_verbatim() {
        let store = Store::open_in_memory().expect("store");
        let chronology = concept(&store, 1).with_version(Nid(100), status("active"));
        let bytes = chronology.encode().expect("encode");

        let merged = store
            .write(chronology.nid, Category::Concept, &bytes, None, None)
            .expect("write");
        assert_eq!(merged, bytes);
        assert_eq!(store.read(chronology.nid).expect("read"), Some(bytes));
        assert_eq!(
            store.category_of(chronology.nid).expect("category"),
            Some(Category::Concept)
        );
        assert_eq!(store.write_sequence(), 1);
    }

    #[test]
    fn versions_accumulate_and_resubmission_is_a_no_op() {
        let store = Store::open_in_memory().expect("store");
        let base = concept(&store, 1);
        let v1 = base.clone().with_version(Nid(100), status("active"));
        let v2 = base.clone().with_version(Nid(101), status("canceled"));

        store.write_chronology(&v1).expect("v1");
        let merged = store.write_chronology(&v2).expect("v2");
        assert_eq!(merged.versions.len(), 2);
        assert_eq!(
            merged.version_for_stamp(Nid(100)).map(|v| &v.fields),
            Some(&status("active"))
        );

        let again = store.write_chronology(&v1).expect("resubmit");
        assert_eq!(again.versions.len(), 2);
        let stored = store.read_chronology(base.nid).expect("read").expect("present");
        assert_eq!(stored, again);
    }

    #[test]
    fn mismatched_write_arguments_rejected() {
        let store = Store::open_in_memory().expect("store");
        let chronology = concept(&store, 1).with_version(Nid(100), status("active"));
        let bytes = chronology.encode().expect("encode");

        let wrong_nid = store.write(Nid(chronology.nid.0 + 50), Category::Concept, &bytes, None, None);
        assert!(matches!(wrong_nid, Err(LexisError::InvalidWrite(_))));

        let wrong_category = store.write(chronology.nid, Category::Pattern, &bytes, None, None);
        assert!(matches!(wrong_category, Err(LexisError::InvalidWrite(_))));

        let cited = store.write(
            chronology.nid,
            Category::Concept,
            &bytes,
            Some(Nid(1)),
            Some(Nid(2)),
        );
        assert!(matches!(cited, Err(LexisError::InvalidWrite(_))));
        assert_eq!(store.write_sequence(), 0);
    }

    #[test]
    fn duplicate_stamps_in_one_write_rejected() {
        let store = Store::open_in_memory().expect("store");
        let chronology = concept(&store, 1)
            .with_version(Nid(100), status("a"))
            .with_version(Nid(100), status("b"));
        assert!(matches!(
            store.write_chronology(&chronology),
            Err(LexisError::InvalidWrite(_))
        ));
    }

    #[test]
    fn nid_cannot_change_category() {
        let store = Store::open_in_memory().expect("store");
        let as_concept = concept(&store, 1).with_version(Nid(100), status("a"));
        store.write_chronology(&as_concept).expect("concept");

        let as_pattern = Chronology::pattern(as_concept.nid, as_concept.public_id.clone())
            .with_version(Nid(100), status("b"));
        assert!(matches!(
            store.write_chronology(&as_pattern),
            Err(LexisError::CorruptStore(_))
        ));
    }

    #[test]
    fn corrupt_stored_bytes_surface_as_corrupt_store() {
        let store = Store::open_in_memory().expect("store");
        store
            .with_db(|db| {
                let txn = db.begin_write().map_err(io_err)?;
                {
                    let mut table = txn
                        .open_table(entity_table(Category::Concept))
                        .map_err(io_err)?;
                    let key = nid_key(Nid(9));
                    table
                        .insert(key.as_slice(), [1u8, 1, 0].as_slice())
                        .map_err(io_err)?;
                }
                txn.commit().map_err(io_err)
            })
            .expect("plant corrupt bytes");

        assert!(matches!(
            store.read_chronology(Nid(9)),
            Err(LexisError::CorruptStore(_))
        ));
    }

    #[test]
    fn iteration_is_in_ascending_nid_order() {
        let store = Store::open_in_memory().expect("store");
        for n in [3u128, 1, 2] {
            let chronology = concept(&store, n).with_version(Nid(100), status("a"));
            store.write_chronology(&chronology).expect("write");
        }
        let nids = store.concept_nids().expect("nids");
        let mut sorted = nids.clone();
        sorted.sort();
        assert_eq!(nids, sorted);
        assert_eq!(nids.len(), 3);

        let mut visited = Vec::new();
        store
            .for_each(Category::Concept, |nid, bytes| {
                visited.push(nid);
                assert!(!bytes.is_empty());
            })
            .expect("for each");
        assert_eq!(visited, nids);

        let mut picked = Vec::new();
        store
            .for_each_of(&[nids[2], Nid(9999), nids[0]], |nid, _| picked.push(nid))
            .expect("for each of");
        assert_eq!(picked, vec![nids[2], nids[0]]);
    }

    #[test]
    fn closed_store_rejects_everything() {
        let store = Store::open_in_memory().expect("store");
        store.close().expect("close");

        assert!(store.is_closed());
        assert!(matches!(store.close(), Err(LexisError::StoreClosed)));
        assert!(matches!(store.read(Nid(1)), Err(LexisError::StoreClosed)));
        assert!(matches!(store.new_nid(), Err(LexisError::StoreClosed)));
        assert!(matches!(
            store.nid_for(&PublicId::random()),
            Err(LexisError::StoreClosed)
        ));
        assert!(matches!(store.save(), Err(LexisError::StoreClosed)));
        assert!(matches!(
            store.add_canceled_stamp_nid(Nid(5)),
            Err(LexisError::StoreClosed)
        ));
        assert!(matches!(
            store.is_canceled_stamp_nid(Nid(5)),
            Err(LexisError::StoreClosed)
        ));
        assert!(matches!(
            store.rebuild_search_index(),
            Err(LexisError::StoreClosed)
        ));
        assert!(matches!(
            store.search("heart", 10),
            Err(LexisError::StoreClosed)
        ));
    }

    #[test]
    fn canceled_stamp_set_accepts_manual_marks() {
        let store = Store::open_in_memory().expect("store");
        assert!(!store.is_canceled_stamp_nid(Nid(5)).expect("lookup"));
        store.add_canceled_stamp_nid(Nid(5)).expect("mark");
        assert!(store.is_canceled_stamp_nid(Nid(5)).expect("lookup"));
    }

    #[test]
    fn canceled_stamps_are_tracked_and_recovered() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        let stamp_nid;
        {
            let store = Store::open_path(&db_path).expect("open db");
            let public_id = PublicId::random();
            stamp_nid = store.nid_for(&public_id).expect("nid");
            let active = StampRecord {
                status: Nid(1),
                time: 1_700_000_000_000,
                author: Nid(2),
                module: Nid(3),
                path: Nid(4),
            };
            store
                .write_chronology(&Chronology::stamp(stamp_nid, public_id.clone(), active))
                .expect("stamp");
            assert!(!store.is_canceled_stamp_nid(stamp_nid).expect("lookup"));

            let amendment_stamp = store.new_nid().expect("amendment");
            let canceled = Chronology::new(stamp_nid, public_id, crate::formats::EntityKind::Stamp)
                .with_version(
                    amendment_stamp,
                    StampRecord::canceled(Nid(5), Nid(2), Nid(3), Nid(4)).to_fields(),
                );
            store.write_chronology(&canceled).expect("cancel");
            assert!(store.is_canceled_stamp_nid(stamp_nid).expect("lookup"));
        }
        let store = Store::open_path(&db_path).expect("reopen");
        assert!(store.is_canceled_stamp_nid(stamp_nid).expect("lookup"));
    }

    struct CountingIndexer {
        indexed: Arc<AtomicUsize>,
        commits: Arc<AtomicUsize>,
    }

    impl Indexer for CountingIndexer {
        fn index(&self, _chronology: &Chronology) -> Result<(), LexisError> {
            self.indexed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn commit(&self) -> Result<(), LexisError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingIndexer;

    impl Indexer for FailingIndexer {
        fn index(&self, _chronology: &Chronology) -> Result<(), LexisError> {
            Err(LexisError::IoError("index offline".to_string()))
        }

        fn commit(&self) -> Result<(), LexisError> {
            Ok(())
        }
    }

    #[test]
    fn indexer_sees_every_write_and_rebuild() {
        let indexed = Arc::new(AtomicUsize::new(0));
        let commits = Arc::new(AtomicUsize::new(0));
        let store = Store::open_in_memory()
            .expect("store")
            .with_indexer(CountingIndexer {
                indexed: Arc::clone(&indexed),
                commits: Arc::clone(&commits),
            });

        for n in 1..=3 {
            let chronology = concept(&store, n).with_version(Nid(100), status("a"));
            store.write_chronology(&chronology).expect("write");
        }
        assert_eq!(indexed.load(Ordering::SeqCst), 3);

        store.save().expect("save");
        assert_eq!(commits.load(Ordering::SeqCst), 1);

        let counts = store.rebuild_search_index().expect("rebuild");
        assert_eq!(counts.concepts, 3);
        assert_eq!(indexed.load(Ordering::SeqCst), 6);
        assert_eq!(commits.load(Ordering::SeqCst), 2);
    }

    /// Stalls on single-version chronologies so an older state reaches the
    /// indexer after a newer one has committed.
    struct SlowFirstIndexer {
        last_indexed: Arc<Mutex<BTreeMap<Nid, usize>>>,
    }

    impl Indexer for SlowFirstIndexer {
        fn index(&self, chronology: &Chronology) -> Result<(), LexisError> {
            if chronology.versions.len() == 1 {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.last_indexed
                .lock()
                .insert(chronology.nid, chronology.versions.len());
            Ok(())
        }

        fn commit(&self) -> Result<(), LexisError> {
            Ok(())
        }
    }

    #[test]
    fn indexer_ends_on_newest_committed_state() {
        let last_indexed = Arc::new(Mutex::new(BTreeMap::new()));
        let store = Arc::new(Store::open_in_memory().expect("store").with_indexer(
            SlowFirstIndexer {
                last_indexed: Arc::clone(&last_indexed),
            },
        ));
        let public_id = PublicId::random();
        let nid = store.nid_for(&public_id).expect("nid");

        let first = {
            let store = Arc::clone(&store);
            let public_id = public_id.clone();
            std::thread::spawn(move || {
                let chronology =
                    Chronology::concept(nid, public_id).with_version(Nid(100), status("a"));
                store.write_chronology(&chronology).expect("first write");
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        let second = Chronology::concept(nid, public_id).with_version(Nid(101), status("b"));
        store.write_chronology(&second).expect("second write");
        first.join().expect("writer thread");

        let stored = store
            .read_chronology(nid)
            .expect("read")
            .expect("present")
            .versions
            .len();
        assert_eq!(stored, 2);
        assert_eq!(last_indexed.lock().get(&nid).copied(), Some(stored));
    }

    #[test]
    fn indexer_failure_does_not_fail_the_write() {
        let store = Store::open_in_memory()
            .expect("store")
            .with_indexer(FailingIndexer);
        let chronology = concept(&store, 1).with_version(Nid(100), status("a"));
        store.write_chronology(&chronology).expect("write");
        assert!(store.read(chronology.nid).expect("read").is_some());
    }

    #[test]
    fn search_without_searcher_is_not_found() {
        let store = Store::open_in_memory().expect("store");
        assert!(matches!(
            store.search("heart", 10),
            Err(LexisError::NotFound(_))
        ));
        assert!(matches!(
            store.rebuild_search_index(),
            Err(LexisError::NotFound(_))
        ));
    }

    #[test]
    fn entity_counts_track_partitions() {
        let store = Store::open_in_memory().expect("store");
        let chronology = concept(&store, 1).with_version(Nid(100), status("a"));
        store.write_chronology(&chronology).expect("write");

        let counts = store.entity_counts().expect("counts");
        assert_eq!(counts.concepts, 1);
        assert_eq!(counts.uuids, 1);
        assert_eq!(counts.entities(), 1);
    }
}
