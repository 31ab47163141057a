//! # Graph Vertex
//!
//! A node of a logical-definition graph: stable identity, position index,
//! meaning, and a typed property map. A vertex is content only; topology
//! lives in [`DiGraph`](crate::graph::DiGraph).
//!
//! ## Layout
//!
//! ```text
//! 16 bytes  identity (most significant 64 bits, then least)
//! u32       position index
//! i32       meaning nid
//! u32       property count, then per property:
//!             i32 property meaning nid + tagged field value
//! ```
//!
//! Properties are encoded in ascending nid order.

use crate::formats::bytes::{ByteReader, ByteWriter};
use crate::formats::field::{FieldValue, check_format_version};
use crate::primitives::{DEFAULT_VERTEX_BUFFER_SIZE, MAX_ENCODED_SIZE};
use crate::types::{LexisError, Nid, PublicId};
use std::collections::BTreeMap;
use uuid::Uuid;

// =============================================================================
// FOREIGN REPRESENTATION
// =============================================================================

/// Resolves a public id to the nid the store knows it by.
pub trait NidResolver {
    fn resolve(&self, public_id: &PublicId) -> Result<Nid, LexisError>;
}

/// A component reference as another graph representation holds it: either
/// already reduced to a nid, or still a public id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentRef {
    Nid(Nid),
    PublicId(PublicId),
}

impl ComponentRef {
    pub fn resolve(&self, resolver: &impl NidResolver) -> Result<Nid, LexisError> {
        match self {
            ComponentRef::Nid(nid) => Ok(*nid),
            ComponentRef::PublicId(public_id) => resolver.resolve(public_id),
        }
    }
}

/// A property value in a foreign vertex, before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub enum ForeignValue {
    Concept(ComponentRef),
    Semantic(ComponentRef),
    Pattern(ComponentRef),
    Stamp(ComponentRef),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl ForeignValue {
    /// Reduce to storage form.
    ///
    /// References become nids. `Int` widens to `I64`. `Double` narrows to
    /// `F32`; that is the only lossy step.
    pub fn normalize(&self, resolver: &impl NidResolver) -> Result<FieldValue, LexisError> {
        Ok(match self {
            ForeignValue::Concept(r) => FieldValue::Concept(r.resolve(resolver)?),
            ForeignValue::Semantic(r) => FieldValue::Semantic(r.resolve(resolver)?),
            ForeignValue::Pattern(r) => FieldValue::Pattern(r.resolve(resolver)?),
            ForeignValue::Stamp(r) => FieldValue::Stamp(r.resolve(resolver)?),
            ForeignValue::Int(v) => FieldValue::I64(i64::from(*v)),
            ForeignValue::Long(v) => FieldValue::I64(*v),
            ForeignValue::Float(v) => FieldValue::F32(*v),
            ForeignValue::Double(v) => FieldValue::F32(*v as f32),
            ForeignValue::Bool(v) => FieldValue::Bool(*v),
            ForeignValue::String(s) => FieldValue::String(s.clone()),
            ForeignValue::Bytes(b) => FieldValue::Bytes(b.clone()),
        })
    }
}

/// Another in-memory vertex representation that can be imported.
pub trait ForeignVertex {
    fn vertex_id(&self) -> Uuid;
    fn vertex_index(&self) -> u32;
    fn meaning(&self) -> ComponentRef;
    fn properties(&self) -> Vec<(ComponentRef, ForeignValue)>;
}

// =============================================================================
// GRAPH VERTEX
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GraphVertex {
    /// Stable 128-bit identity.
    pub id: Uuid,
    /// Position, unique within the owning graph.
    pub index: u32,
    /// What kind of node this is.
    pub meaning: Nid,
    pub properties: BTreeMap<Nid, FieldValue>,
}

impl GraphVertex {
    #[must_use]
    pub fn new(id: Uuid, index: u32, meaning: Nid, properties: BTreeMap<Nid, FieldValue>) -> Self {
        Self {
            id,
            index,
            meaning,
            properties,
        }
    }

    #[must_use]
    pub fn property(&self, key: Nid) -> Option<&FieldValue> {
        self.properties.get(&key)
    }

    /// Property keys in ascending order.
    pub fn property_keys(&self) -> impl Iterator<Item = Nid> + '_ {
        self.properties.keys().copied()
    }

    /// Build a vertex from a foreign representation, resolving every
    /// reference through `resolver`.
    ///
    /// Two foreign property keys that resolve to the same nid would collapse
    /// into one entry; that is rejected with `InvalidGraph`.
    pub fn from_foreign(
        foreign: &impl ForeignVertex,
        resolver: &impl NidResolver,
    ) -> Result<Self, LexisError> {
        let meaning = foreign.meaning().resolve(resolver)?;
        let mut properties = BTreeMap::new();
        for (key, value) in foreign.properties() {
            let key = key.resolve(resolver)?;
            let value = value.normalize(resolver)?;
            if properties.insert(key, value).is_some() {
                return Err(LexisError::InvalidGraph(format!(
                    "vertex {} has two properties resolving to {}",
                    foreign.vertex_index(),
                    key
                )));
            }
        }
        Ok(Self {
            id: foreign.vertex_id(),
            index: foreign.vertex_index(),
            meaning,
            properties,
        })
    }

    // -------------------------------------------------------------------------
    // Codec
    // -------------------------------------------------------------------------

    /// Encode, starting from `DEFAULT_VERTEX_BUFFER_SIZE` and growing on
    /// overflow.
    pub fn encode(&self) -> Result<Vec<u8>, LexisError> {
        self.encode_from_capacity(DEFAULT_VERTEX_BUFFER_SIZE)
    }

    /// Encode into a bounded buffer of `initial` bytes, doubling and retrying
    /// until the vertex fits or `MAX_ENCODED_SIZE` is reached.
    pub fn encode_from_capacity(&self, initial: usize) -> Result<Vec<u8>, LexisError> {
        let mut capacity = initial.clamp(1, MAX_ENCODED_SIZE);
        loop {
            let mut writer = ByteWriter::with_capacity(capacity);
            match self.write_body(&mut writer) {
                Ok(()) => return Ok(writer.into_bytes()),
                Err(LexisError::BufferOverflow { needed, .. }) if capacity < MAX_ENCODED_SIZE => {
                    let grown = capacity.saturating_mul(2).min(MAX_ENCODED_SIZE);
                    tracing::trace!(
                        vertex = self.index,
                        needed,
                        from = capacity,
                        to = grown,
                        "growing vertex buffer"
                    );
                    capacity = grown;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn decode(bytes: &[u8], format_version: u8) -> Result<Self, LexisError> {
        check_format_version(format_version)?;
        let mut reader = ByteReader::new(bytes);
        let vertex = Self::read_body(&mut reader, format_version, 0)?;
        reader.expect_end()?;
        Ok(vertex)
    }

    pub(crate) fn write_body(&self, writer: &mut ByteWriter) -> Result<(), LexisError> {
        writer.put_uuid(&self.id)?;
        writer.put_u32(self.index)?;
        writer.put_i32(self.meaning.0)?;
        writer.put_len(self.properties.len())?;
        for (key, value) in &self.properties {
            writer.put_i32(key.0)?;
            value.write_to(writer)?;
        }
        Ok(())
    }

    pub(crate) fn read_body(
        reader: &mut ByteReader<'_>,
        format_version: u8,
        depth: usize,
    ) -> Result<Self, LexisError> {
        let id = reader.get_uuid()?;
        let index = reader.get_u32()?;
        let meaning = Nid(reader.get_i32()?);
        // Key nid, tag, and at least one payload byte.
        let count = reader.get_count(6)?;
        let mut properties = BTreeMap::new();
        for _ in 0..count {
            let key = Nid(reader.get_i32()?);
            let value = FieldValue::read_at_depth(reader, format_version, depth)?;
            if properties.insert(key, value).is_some() {
                return Err(LexisError::Malformed(format!(
                    "vertex {} repeats property {}",
                    index, key
                )));
            }
        }
        Ok(Self {
            id,
            index,
            meaning,
            properties,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
