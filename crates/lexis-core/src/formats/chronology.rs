//! # Chronology Codec
//!
//! Binary layout and merge rule for an entity's full version history.
//!
//! ## Layout
//!
//! ```text
//! u8   format version (ENTITY_FORMAT_VERSION)
//! u8   category token
//! i32  nid
//! u32  alias count, then 16 bytes per UUID
//! i32  pattern nid                 (semantic only)
//! i32  referenced component nid    (semantic only)
//! u32  version count, then per version:
//!        i32  stamp nid
//!        u32  field count, then tagged field values
//! ```
//!
//! All integers are big-endian. Trailing bytes after the last version are
//! rejected.
//!
//! ## Merge
//!
//! Two chronologies of the same entity merge into the union of their
//! versions. Versions are identified by their stamp; on a stamp collision
//! the incoming version replaces the existing one in place (last write
//! wins). Otherwise the result keeps first-appearance order, existing
//! versions first.

use crate::formats::bytes::{ByteReader, ByteWriter};
use crate::formats::field::{FieldValue, check_format_version, read_fields, write_fields};
use crate::primitives::{ENTITY_FORMAT_VERSION, UUID_KEY_LEN};
use crate::types::{Category, LexisError, Nid, PublicId};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ENTITY KIND
// =============================================================================

/// Category plus the positional data that category carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Concept,
    /// A semantic is defined by a pattern and is about a referenced component.
    Semantic {
        pattern: Nid,
        referenced_component: Nid,
    },
    Pattern,
    Stamp,
}

impl EntityKind {
    #[must_use]
    pub const fn category(self) -> Category {
        match self {
            EntityKind::Concept => Category::Concept,
            EntityKind::Semantic { .. } => Category::Semantic,
            EntityKind::Pattern => Category::Pattern,
            EntityKind::Stamp => Category::Stamp,
        }
    }
}

// =============================================================================
// VERSION
// =============================================================================

/// An immutable snapshot of an entity's fields as of one stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub stamp: Nid,
    pub fields: Vec<FieldValue>,
}

impl Version {
    #[must_use]
    pub fn new(stamp: Nid, fields: Vec<FieldValue>) -> Self {
        Self { stamp, fields }
    }
}

// =============================================================================
// STAMP RECORD
// =============================================================================

/// Provenance carried by a stamp version: (status, time, author, module, path).
///
/// Stored as exactly five fields, in that order:
/// `Concept`, `I64`, `Concept`, `Concept`, `Concept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StampRecord {
    pub status: Nid,
    pub time: i64,
    pub author: Nid,
    pub module: Nid,
    pub path: Nid,
}

impl StampRecord {
    /// Time recorded on a canceling amendment.
    pub const CANCELED_TIME: i64 = i64::MIN;

    /// An amendment that cancels a stamp.
    ///
    /// `canceled_status` is the concept the caller uses to mean "canceled";
    /// the store has no built-in vocabulary.
    #[must_use]
    pub fn canceled(canceled_status: Nid, author: Nid, module: Nid, path: Nid) -> Self {
        Self {
            status: canceled_status,
            time: Self::CANCELED_TIME,
            author,
            module,
            path,
        }
    }

    #[must_use]
    pub fn to_fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Concept(self.status),
            FieldValue::I64(self.time),
            FieldValue::Concept(self.author),
            FieldValue::Concept(self.module),
            FieldValue::Concept(self.path),
        ]
    }

    pub fn from_fields(fields: &[FieldValue]) -> Result<Self, LexisError> {
        match fields {
            [
                FieldValue::Concept(status),
                FieldValue::I64(time),
                FieldValue::Concept(author),
                FieldValue::Concept(module),
                FieldValue::Concept(path),
            ] => Ok(Self {
                status: *status,
                time: *time,
                author: *author,
                module: *module,
                path: *path,
            }),
            _ => Err(LexisError::Malformed(format!(
                "stamp version must hold (status, time, author, module, path), got {} fields",
                fields.len()
            ))),
        }
    }
}

// =============================================================================
// CHRONOLOGY
// =============================================================================

/// Category and nid read from the front of encoded chronology bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChronologyHeader {
    pub category: Category,
    pub nid: Nid,
}

/// The nid, aliases, kind and full ordered version list of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Chronology {
    pub nid: Nid,
    pub public_id: PublicId,
    pub kind: EntityKind,
    pub versions: Vec<Version>,
}

impl Chronology {
    /// An empty chronology of the given kind.
    #[must_use]
    pub fn new(nid: Nid, public_id: PublicId, kind: EntityKind) -> Self {
        Self {
            nid,
            public_id,
            kind,
            versions: Vec::new(),
        }
    }

    #[must_use]
    pub fn concept(nid: Nid, public_id: PublicId) -> Self {
        Self::new(nid, public_id, EntityKind::Concept)
    }

    #[must_use]
    pub fn semantic(nid: Nid, public_id: PublicId, pattern: Nid, referenced_component: Nid) -> Self {
        Self::new(
            nid,
            public_id,
            EntityKind::Semantic {
                pattern,
                referenced_component,
            },
        )
    }

    #[must_use]
    pub fn pattern(nid: Nid, public_id: PublicId) -> Self {
        Self::new(nid, public_id, EntityKind::Pattern)
    }

    /// A stamp chronology whose first version is recorded under the stamp
    /// itself.
    #[must_use]
    pub fn stamp(nid: Nid, public_id: PublicId, record: StampRecord) -> Self {
        Self::new(nid, public_id, EntityKind::Stamp).with_version(nid, record.to_fields())
    }

    /// Append a version (builder style). No merge rule is applied.
    #[must_use]
    pub fn with_version(mut self, stamp: Nid, fields: Vec<FieldValue>) -> Self {
        self.versions.push(Version::new(stamp, fields));
        self
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.kind.category()
    }

    /// Pattern nid for semantics.
    #[must_use]
    pub fn pattern_nid(&self) -> Option<Nid> {
        match self.kind {
            EntityKind::Semantic { pattern, .. } => Some(pattern),
            _ => None,
        }
    }

    /// Referenced component nid for semantics.
    #[must_use]
    pub fn referenced_component_nid(&self) -> Option<Nid> {
        match self.kind {
            EntityKind::Semantic {
                referenced_component,
                ..
            } => Some(referenced_component),
            _ => None,
        }
    }

    #[must_use]
    pub fn version_for_stamp(&self, stamp: Nid) -> Option<&Version> {
        self.versions.iter().find(|v| v.stamp == stamp)
    }

    /// Stamps of all versions, in version order.
    pub fn stamps(&self) -> impl Iterator<Item = Nid> + '_ {
        self.versions.iter().map(|v| v.stamp)
    }

    /// True if two versions share a stamp.
    #[must_use]
    pub fn has_duplicate_stamps(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.versions.iter().any(|v| !seen.insert(v.stamp))
    }

    /// Stamp provenance of every version, for stamp chronologies.
    pub fn stamp_records(&self) -> Result<Vec<StampRecord>, LexisError> {
        if self.category() != Category::Stamp {
            return Err(LexisError::Malformed(format!(
                "{} is a {}, not a stamp",
                self.nid,
                self.category()
            )));
        }
        self.versions
            .iter()
            .map(|v| StampRecord::from_fields(&v.fields))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Merge
    // -------------------------------------------------------------------------

    /// Union of both version lists; see the module docs for the rule.
    ///
    /// Fails with `InvalidWrite` when the two sides describe different
    /// entities (nid or kind differ).
    pub fn merge(&self, incoming: &Chronology) -> Result<Chronology, LexisError> {
        if self.nid != incoming.nid {
            return Err(LexisError::InvalidWrite(format!(
                "cannot merge {} into {}",
                incoming.nid, self.nid
            )));
        }
        if self.kind != incoming.kind {
            return Err(LexisError::InvalidWrite(format!(
                "cannot merge {:?} into {:?} for {}",
                incoming.kind, self.kind, self.nid
            )));
        }

        let mut versions = self.versions.clone();
        let mut positions: BTreeMap<Nid, usize> = versions
            .iter()
            .enumerate()
            .map(|(i, v)| (v.stamp, i))
            .collect();

        for version in &incoming.versions {
            match positions.get(&version.stamp) {
                Some(&i) => versions[i] = version.clone(),
                None => {
                    positions.insert(version.stamp, versions.len());
                    versions.push(version.clone());
                }
            }
        }

        Ok(Chronology {
            nid: self.nid,
            public_id: self.public_id.union(&incoming.public_id),
            kind: self.kind,
            versions,
        })
    }

    // -------------------------------------------------------------------------
    // Codec
    // -------------------------------------------------------------------------

    pub fn encode(&self) -> Result<Vec<u8>, LexisError> {
        let mut writer = ByteWriter::unbounded();
        writer.put_u8(ENTITY_FORMAT_VERSION)?;
        writer.put_u8(self.category().token())?;
        writer.put_i32(self.nid.0)?;

        writer.put_len(self.public_id.uuids().len())?;
        for uuid in self.public_id.uuids() {
            writer.put_uuid(uuid)?;
        }

        if let EntityKind::Semantic {
            pattern,
            referenced_component,
        } = self.kind
        {
            writer.put_i32(pattern.0)?;
            writer.put_i32(referenced_component.0)?;
        }

        writer.put_len(self.versions.len())?;
        for version in &self.versions {
            writer.put_i32(version.stamp.0)?;
            write_fields(&mut writer, &version.fields)?;
        }

        Ok(writer.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LexisError> {
        let mut reader = ByteReader::new(bytes);
        let header = read_header(&mut reader)?;
        let format_version = ENTITY_FORMAT_VERSION;

        let alias_count = reader.get_count(UUID_KEY_LEN)?;
        let mut aliases = Vec::with_capacity(alias_count);
        for _ in 0..alias_count {
            aliases.push(reader.get_uuid()?);
        }
        let public_id = PublicId::new(aliases)?;

        let kind = match header.category {
            Category::Concept => EntityKind::Concept,
            Category::Semantic => EntityKind::Semantic {
                pattern: Nid(reader.get_i32()?),
                referenced_component: Nid(reader.get_i32()?),
            },
            Category::Pattern => EntityKind::Pattern,
            Category::Stamp => EntityKind::Stamp,
        };

        // Stamp nid plus an empty field count.
        let version_count = reader.get_count(8)?;
        let mut versions = Vec::with_capacity(version_count);
        for _ in 0..version_count {
            let stamp = Nid(reader.get_i32()?);
            let fields = read_fields(&mut reader, format_version)?;
            versions.push(Version { stamp, fields });
        }
        reader.expect_end()?;

        Ok(Chronology {
            nid: header.nid,
            public_id,
            kind,
            versions,
        })
    }

    /// Read only the category and nid.
    pub fn peek_header(bytes: &[u8]) -> Result<ChronologyHeader, LexisError> {
        read_header(&mut ByteReader::new(bytes))
    }
}

fn read_header(reader: &mut ByteReader<'_>) -> Result<ChronologyHeader, LexisError> {
    check_format_version(reader.get_u8()?)?;
    let token = reader.get_u8()?;
    let category = Category::from_token(token)
        .ok_or_else(|| LexisError::Malformed(format!("unknown category token {}", token)))?;
    let nid = Nid(reader.get_i32()?);
    Ok(ChronologyHeader { category, nid })
}

/// Merge two encoded chronologies and re-encode the result.
pub fn merge_bytes(existing: &[u8], incoming: &[u8]) -> Result<Vec<u8>, LexisError> {
    let existing = Chronology::decode(existing)?;
    let incoming = Chronology::decode(incoming)?;
    existing.merge(&incoming)?.encode()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status(text: &str) -> Vec<FieldValue> {
        vec![FieldValue::String(format!("status={}", text))]
    }

    fn concept_with(stamps: &[(i32, &str)]) -> Chronology {
        let mut chronology = Chronology::concept(Nid(7), PublicId::single(Uuid::from_u128(7)));
        for (stamp, text) in stamps {
            chronology = chronology.with_version(Nid(*stamp), status(text));
        }
        chronology
    }

    #[test]
    fn concept_roundtrip() {
        let chronology = concept_with(&[(100, "active"), (101, "canceled")]);
        let bytes = chronology.encode().expect("encode");
        assert_eq!(bytes[0], ENTITY_FORMAT_VERSION);
        assert_eq!(bytes[1], Category::Concept.token());

        let decoded = Chronology::decode(&bytes).expect("decode");
        assert_eq!(decoded, chronology);
    }

    #[test]
    fn semantic_roundtrip_keeps_positional_nids() {
        let chronology = Chronology::semantic(
            Nid(12),
            PublicId::new([Uuid::from_u128(1), Uuid::from_u128(2)]).expect("id"),
            Nid(30),
            Nid(40),
        )
        .with_version(Nid(100), vec![FieldValue::Concept(Nid(5))]);

        let decoded = Chronology::decode(&chronology.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.pattern_nid(), Some(Nid(30)));
        assert_eq!(decoded.referenced_component_nid(), Some(Nid(40)));
        assert_eq!(decoded.public_id.uuids().len(), 2);
        assert_eq!(decoded, chronology);
    }

    #[test]
    fn stamp_record_roundtrip() {
        let record = StampRecord {
            status: Nid(1),
            time: 1_700_000_000_000,
            author: Nid(2),
            module: Nid(3),
            path: Nid(4),
        };
        let chronology = Chronology::stamp(Nid(50), PublicId::random(), record);
        let decoded = Chronology::decode(&chronology.encode().expect("encode")).expect("decode");

        assert_eq!(decoded.stamp_records().expect("records"), vec![record]);
        assert_eq!(decoded.versions[0].stamp, Nid(50));
    }

    #[test]
    fn stamp_record_rejects_wrong_layout() {
        let result = StampRecord::from_fields(&[FieldValue::I64(1)]);
        assert!(matches!(result, Err(LexisError::Malformed(_))));
    }

    #[test]
    fn unsupported_format_version_rejected() {
        let mut bytes = concept_with(&[(1, "a")]).encode().expect("encode");
        bytes[0] = ENTITY_FORMAT_VERSION + 1;
        assert!(matches!(
            Chronology::decode(&bytes),
            Err(LexisError::UnsupportedFormatVersion { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = concept_with(&[(1, "a")]).encode().expect("encode");
        bytes.push(0);
        assert!(matches!(
            Chronology::decode(&bytes),
            Err(LexisError::Malformed(_))
        ));
    }

    #[test]
    fn peek_header_reads_category_and_nid() {
        let bytes = concept_with(&[]).encode().expect("encode");
        let header = Chronology::peek_header(&bytes).expect("header");
        assert_eq!(header.category, Category::Concept);
        assert_eq!(header.nid, Nid(7));
    }

    #[test]
    fn merge_is_union_in_first_appearance_order() {
        let existing = concept_with(&[(1, "a"), (2, "b")]);
        let incoming = concept_with(&[(3, "c"), (1, "a")]);

        let merged = existing.merge(&incoming).expect("merge");
        let stamps: Vec<_> = merged.stamps().collect();
        assert_eq!(stamps, vec![Nid(1), Nid(2), Nid(3)]);
    }

    #[test]
    fn merge_with_self_is_identity() {
        let chronology = concept_with(&[(1, "a"), (2, "b")]);
        let merged = chronology.merge(&chronology).expect("merge");
        assert_eq!(merged, chronology);
    }

    #[test]
    fn merge_collision_is_last_write_wins_in_place() {
        let existing = concept_with(&[(1, "a"), (2, "b")]);
        let incoming = concept_with(&[(1, "rewritten")]);

        let merged = existing.merge(&incoming).expect("merge");
        assert_eq!(merged.versions.len(), 2);
        assert_eq!(merged.versions[0].stamp, Nid(1));
        assert_eq!(merged.versions[0].fields, status("rewritten"));
    }

    #[test]
    fn merge_rejects_other_entity() {
        let a = concept_with(&[(1, "a")]);
        let mut b = concept_with(&[(2, "b")]);
        b.nid = Nid(8);
        assert!(matches!(a.merge(&b), Err(LexisError::InvalidWrite(_))));

        let pattern = Chronology::pattern(Nid(7), PublicId::single(Uuid::from_u128(7)));
        assert!(matches!(a.merge(&pattern), Err(LexisError::InvalidWrite(_))));
    }

    #[test]
    fn merge_unions_aliases() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let existing = Chronology::concept(Nid(7), PublicId::single(a));
        let incoming = Chronology::concept(Nid(7), PublicId::single(b));

        let merged = existing.merge(&incoming).expect("merge");
        assert_eq!(merged.public_id.uuids(), &[a, b]);
    }

    #[test]
    fn merge_bytes_matches_merge() {
        let existing = concept_with(&[(1, "a")]);
        let incoming = concept_with(&[(2, "b")]);
        let merged = merge_bytes(
            &existing.encode().expect("encode"),
            &incoming.encode().expect("encode"),
        )
        .expect("merge");
        assert_eq!(
            Chronology::decode(&merged).expect("decode"),
            existing.merge(&incoming).expect("merge")
        );
    }

    #[test]
    fn duplicate_stamps_detected() {
        assert!(concept_with(&[(1, "a"), (1, "b")]).has_duplicate_stamps());
        assert!(!concept_with(&[(1, "a"), (2, "b")]).has_duplicate_stamps());
    }
}
