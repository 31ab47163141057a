//! # Identity Registry
//!
//! Maps UUID aliases to nids and owns nid allocation.
//!
//! Resolution first probes under a read transaction, which is enough for the
//! common case of an already-known identity. On any miss the aliases are
//! resolved again inside a write transaction; redb admits one writer at a
//! time, so the second resolution sees every mapping committed by a
//! concurrent caller and a fresh nid is only allocated when no alias is
//! mapped at all. Unmapped aliases are back-filled in the same transaction.

use crate::formats::Chronology;
use crate::primitives::FIRST_NID;
use crate::storage::partition::{
    UUID_TO_NID, entity_table, io_err, nid_from_key, nid_key, uuid_from_key, uuid_key,
};
use crate::storage::store::{EntityCounts, Store};
use crate::types::{Category, LexisError, Nid, PublicId};
use redb::{Database, ReadableDatabase, ReadableTable};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

// =============================================================================
// NID ALLOCATOR
// =============================================================================

/// Monotonic nid source owned by one store instance.
#[derive(Debug)]
pub struct NidAllocator {
    next: AtomicI32,
}

impl NidAllocator {
    /// An allocator whose first nid is `next`.
    #[must_use]
    pub fn starting_at(next: Nid) -> Self {
        Self {
            next: AtomicI32::new(next.0),
        }
    }

    /// Hand out the next nid. Fails once the `i32` range is exhausted.
    pub fn allocate(&self) -> Result<Nid, LexisError> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map(Nid)
            .map_err(|_| LexisError::CorruptStore("nid space exhausted".to_string()))
    }

    /// The nid the next allocation will return.
    #[must_use]
    pub fn peek(&self) -> Nid {
        Nid(self.next.load(Ordering::SeqCst))
    }
}

/// Highest nid in use plus one, found by scanning the last key of every
/// category partition and every value of the UUID table. A malformed UUID
/// table entry is `CorruptStore`.
pub(crate) fn recover_next_nid(db: &Database) -> Result<Nid, LexisError> {
    let read_txn = db.begin_read().map_err(io_err)?;
    let mut highest: Option<i32> = None;

    for category in Category::ALL {
        let table = read_txn.open_table(entity_table(category)).map_err(io_err)?;
        if let Some((key, _)) = table.last().map_err(io_err)? {
            let nid = nid_from_key(key.value())?;
            highest = Some(highest.map_or(nid.0, |h| h.max(nid.0)));
        }
    }

    let uuids = read_txn.open_table(UUID_TO_NID).map_err(io_err)?;
    for entry in uuids.iter().map_err(io_err)? {
        let (key, value) = entry.map_err(io_err)?;
        uuid_from_key(key.value())?;
        let nid = nid_from_key(value.value())?;
        highest = Some(highest.map_or(nid.0, |h| h.max(nid.0)));
    }

    match highest {
        None => Ok(Nid(FIRST_NID)),
        Some(h) => h
            .checked_add(1)
            .map(|next| Nid(next.max(FIRST_NID)))
            .ok_or_else(|| LexisError::CorruptStore("nid space exhausted".to_string())),
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// What the UUID table says about one alias set.
struct Resolution {
    found: Option<Nid>,
    unmapped: Vec<Uuid>,
}

fn resolve<T>(table: &T, public_id: &PublicId) -> Result<Resolution, LexisError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut found: Option<Nid> = None;
    let mut unmapped = Vec::new();
    for uuid in public_id.uuids() {
        let key = uuid_key(uuid);
        match table.get(key.as_slice()).map_err(io_err)? {
            Some(value) => {
                let nid = nid_from_key(value.value())?;
                match found {
                    Some(first) if first != nid => {
                        return Err(LexisError::AmbiguousIdentity { first, second: nid });
                    }
                    _ => found = Some(nid),
                }
            }
            None => unmapped.push(*uuid),
        }
    }
    Ok(Resolution { found, unmapped })
}

impl Store {
    /// The nid for `public_id`, allocating one if no alias is known.
    ///
    /// - All aliases mapped to one nid: that nid.
    /// - Aliases mapped to different nids: `AmbiguousIdentity`.
    /// - Some aliases mapped: the mapped nid, back-filled to the rest.
    pub fn nid_for(&self, public_id: &PublicId) -> Result<Nid, LexisError> {
        self.with_db(|db| {
            {
                let read_txn = db.begin_read().map_err(io_err)?;
                let table = read_txn.open_table(UUID_TO_NID).map_err(io_err)?;
                let resolution = resolve(&table, public_id)?;
                if let (Some(nid), true) = (resolution.found, resolution.unmapped.is_empty()) {
                    return Ok(nid);
                }
            }

            let write_txn = db.begin_write().map_err(io_err)?;
            let (nid, back_filled, allocated) = {
                let mut table = write_txn.open_table(UUID_TO_NID).map_err(io_err)?;
                let resolution = resolve(&table, public_id)?;
                let (nid, allocated) = match resolution.found {
                    Some(nid) => (nid, false),
                    None => (self.allocator.allocate()?, true),
                };
                let value = nid_key(nid);
                for uuid in &resolution.unmapped {
                    let key = uuid_key(uuid);
                    table
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(io_err)?;
                }
                (nid, resolution.unmapped.len(), allocated)
            };
            write_txn.commit().map_err(io_err)?;

            debug!(%nid, back_filled, allocated, "resolved identity");
            Ok(nid)
        })
    }

    /// Shortcut for [`Store::nid_for`] over a raw alias list.
    pub fn nid_for_uuids(&self, uuids: &[Uuid]) -> Result<Nid, LexisError> {
        self.nid_for(&PublicId::new(uuids.iter().copied())?)
    }

    /// The nid mapped to `uuid`, without allocating.
    pub fn nid_of_uuid(&self, uuid: &Uuid) -> Result<Option<Nid>, LexisError> {
        self.with_db(|db| {
            let read_txn = db.begin_read().map_err(io_err)?;
            let table = read_txn.open_table(UUID_TO_NID).map_err(io_err)?;
            let key = uuid_key(uuid);
            table
                .get(key.as_slice())
                .map_err(io_err)?
                .map(|value| nid_from_key(value.value()))
                .transpose()
        })
    }

    pub fn has_uuid(&self, uuid: &Uuid) -> Result<bool, LexisError> {
        Ok(self.nid_of_uuid(uuid)?.is_some())
    }

    /// True if any alias of `public_id` is known.
    pub fn has_identifier(&self, public_id: &PublicId) -> Result<bool, LexisError> {
        for uuid in public_id.uuids() {
            if self.has_uuid(uuid)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Allocate a nid with no alias attached.
    pub fn new_nid(&self) -> Result<Nid, LexisError> {
        self.ensure_open()?;
        let nid = self.allocator.allocate()?;
        debug!(%nid, "allocated nid");
        Ok(nid)
    }

    /// Re-map every alias found in stored chronologies to its nid.
    ///
    /// Runs in one write transaction; an alias already mapped to another
    /// nid aborts the rebuild with `AmbiguousIdentity` and nothing is
    /// committed.
    pub fn rebuild_identity_index(&self) -> Result<EntityCounts, LexisError> {
        let start = Instant::now();
        let mut counts = EntityCounts::default();
        self.with_db(|db| {
            let write_txn = db.begin_write().map_err(io_err)?;
            {
                let mut uuids = write_txn.open_table(UUID_TO_NID).map_err(io_err)?;
                for category in Category::ALL {
                    let table = write_txn
                        .open_table(entity_table(category))
                        .map_err(io_err)?;
                    for entry in table.iter().map_err(io_err)? {
                        let (key, value) = entry.map_err(io_err)?;
                        let nid = nid_from_key(key.value())?;
                        let chronology = Chronology::decode(value.value())
                            .map_err(|e| Store::corrupt(nid, category, &e))?;
                        counts.record(category);
                        for uuid in chronology.public_id.uuids() {
                            let key = uuid_key(uuid);
                            let existing = uuids
                                .get(key.as_slice())
                                .map_err(io_err)?
                                .map(|v| nid_from_key(v.value()))
                                .transpose()?;
                            match existing {
                                Some(other) if other != nid => {
                                    return Err(LexisError::AmbiguousIdentity {
                                        first: other,
                                        second: nid,
                                    });
                                }
                                Some(_) => {}
                                None => {
                                    let value = nid_key(nid);
                                    uuids
                                        .insert(key.as_slice(), value.as_slice())
                                        .map_err(io_err)?;
                                }
                            }
                            counts.uuids += 1;
                        }
                    }
                }
            }
            write_txn.commit().map_err(io_err)
        })?;
        counts.elapsed = start.elapsed();
        info!(?counts, "rebuilt identity index");
        Ok(counts)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn recovery_rejects_malformed_uuid_keys() {
        let store = Store::open_in_memory().expect("store");
        store.nid_for(&PublicId::single(uuid(1))).expect("nid");
        store
            .with_db(|db| {
                let txn = db.begin_write().map_err(io_err)?;
                {
                    let mut table = txn.open_table(UUID_TO_NID).map_err(io_err)?;
                    let value = nid_key(Nid(2));
                    table
                        .insert([1u8, 2, 3].as_slice(), value.as_slice())
                        .map_err(io_err)?;
                }
                txn.commit().map_err(io_err)
            })
            .expect("plant bad key");

        let recovered = store.with_db(recover_next_nid);
        assert!(matches!(recovered, Err(LexisError::CorruptStore(_))));
    }

    #[test]
    fn allocator_is_monotonic() {
        let allocator = NidAllocator::starting_at(Nid(5));
        assert_eq!(allocator.allocate().expect("nid"), Nid(5));
        assert_eq!(allocator.allocate().expect("nid"), Nid(6));
        assert_eq!(allocator.peek(), Nid(7));
    }

    #[test]
    fn allocator_reports_exhaustion() {
        let allocator = NidAllocator::starting_at(Nid(i32::MAX));
        assert!(matches!(
            allocator.allocate(),
            Err(LexisError::CorruptStore(_))
        ));
    }

    #[test]
    fn single_alias_is_idempotent() {
        let store = Store::open_in_memory().expect("store");
        let id = PublicId::single(uuid(1));
        let first = store.nid_for(&id).expect("nid");
        let second = store.nid_for(&id).expect("nid");
        assert_eq!(first, second);
        assert_eq!(first, Nid(FIRST_NID));
        assert!(store.has_uuid(&uuid(1)).expect("has"));
        assert!(!store.has_uuid(&uuid(2)).expect("has"));
    }

    #[test]
    fn distinct_identities_get_distinct_nids() {
        let store = Store::open_in_memory().expect("store");
        let a = store.nid_for(&PublicId::single(uuid(1))).expect("a");
        let b = store.nid_for(&PublicId::single(uuid(2))).expect("b");
        assert_ne!(a, b);
    }

    #[test]
    fn partial_aliases_are_back_filled() {
        let store = Store::open_in_memory().expect("store");
        let known = store.nid_for(&PublicId::single(uuid(1))).expect("known");

        let merged = PublicId::new([uuid(2), uuid(1), uuid(3)]).expect("id");
        assert_eq!(store.nid_for(&merged).expect("merged"), known);
        for n in 1..=3 {
            assert_eq!(store.nid_of_uuid(&uuid(n)).expect("lookup"), Some(known));
        }
        // Nothing new was allocated.
        assert_eq!(store.allocator.peek(), Nid(known.0 + 1));
    }

    #[test]
    fn conflicting_aliases_are_ambiguous() {
        let store = Store::open_in_memory().expect("store");
        let a = store.nid_for(&PublicId::single(uuid(1))).expect("a");
        let b = store.nid_for(&PublicId::single(uuid(2))).expect("b");

        let result = store.nid_for(&PublicId::new([uuid(1), uuid(2)]).expect("id"));
        assert!(matches!(
            result,
            Err(LexisError::AmbiguousIdentity { first, second }) if first == a && second == b
        ));
    }

    #[test]
    fn has_identifier_checks_any_alias() {
        let store = Store::open_in_memory().expect("store");
        store.nid_for(&PublicId::single(uuid(7))).expect("nid");
        let id = PublicId::new([uuid(8), uuid(7)]).expect("id");
        assert!(store.has_identifier(&id).expect("has"));
        assert!(
            !store
                .has_identifier(&PublicId::single(uuid(9)))
                .expect("has")
        );
    }

    #[test]
    fn new_nid_does_not_collide_with_resolved_nids() {
        let store = Store::open_in_memory().expect("store");
        let resolved = store.nid_for(&PublicId::single(uuid(1))).expect("nid");
        let fresh = store.new_nid().expect("fresh");
        assert!(fresh > resolved);
    }
}
