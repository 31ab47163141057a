//! # Field Codec
//!
//! Self-describing encoding for the closed set of field value types.
//!
//! Every value is written as a one-byte type tag followed by its payload, so a
//! field sequence can be decoded without an external schema. Decoding an
//! unknown tag fails with `LexisError::UnknownFieldType`; decoding under a
//! format version other than `ENTITY_FORMAT_VERSION` fails with
//! `LexisError::UnsupportedFormatVersion`.
//!
//! Numbers keep their declared width on the wire. A 64-bit value is never
//! narrowed by this codec; narrowing only happens in
//! [`GraphVertex::from_foreign`](crate::graph::GraphVertex::from_foreign),
//! where it is explicit.

use crate::formats::bytes::{ByteReader, ByteWriter};
use crate::graph::{DiGraph, GraphVertex};
use crate::primitives::{
    ENTITY_FORMAT_VERSION, MAX_NESTING_DEPTH, TAG_BOOL, TAG_BYTES, TAG_CONCEPT, TAG_DIGRAPH,
    TAG_F32, TAG_F64, TAG_I32, TAG_I64, TAG_NID_LIST, TAG_PATTERN, TAG_SEMANTIC, TAG_STAMP,
    TAG_STRING, TAG_VERTEX,
};
use crate::types::{LexisError, Nid};

/// Fail fast on any format revision this build does not read.
pub fn check_format_version(format_version: u8) -> Result<(), LexisError> {
    if format_version != ENTITY_FORMAT_VERSION {
        return Err(LexisError::UnsupportedFormatVersion {
            found: format_version,
            expected: ENTITY_FORMAT_VERSION,
        });
    }
    Ok(())
}

// =============================================================================
// FIELD TYPE
// =============================================================================

/// The type tag that precedes every encoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldType {
    String,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Bytes,
    Concept,
    Semantic,
    Pattern,
    Stamp,
    NidList,
    Vertex,
    DiGraph,
}

impl FieldType {
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            FieldType::String => TAG_STRING,
            FieldType::I32 => TAG_I32,
            FieldType::I64 => TAG_I64,
            FieldType::F32 => TAG_F32,
            FieldType::F64 => TAG_F64,
            FieldType::Bool => TAG_BOOL,
            FieldType::Bytes => TAG_BYTES,
            FieldType::Concept => TAG_CONCEPT,
            FieldType::Semantic => TAG_SEMANTIC,
            FieldType::Pattern => TAG_PATTERN,
            FieldType::Stamp => TAG_STAMP,
            FieldType::NidList => TAG_NID_LIST,
            FieldType::Vertex => TAG_VERTEX,
            FieldType::DiGraph => TAG_DIGRAPH,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, LexisError> {
        Ok(match tag {
            TAG_STRING => FieldType::String,
            TAG_I32 => FieldType::I32,
            TAG_I64 => FieldType::I64,
            TAG_F32 => FieldType::F32,
            TAG_F64 => FieldType::F64,
            TAG_BOOL => FieldType::Bool,
            TAG_BYTES => FieldType::Bytes,
            TAG_CONCEPT => FieldType::Concept,
            TAG_SEMANTIC => FieldType::Semantic,
            TAG_PATTERN => FieldType::Pattern,
            TAG_STAMP => FieldType::Stamp,
            TAG_NID_LIST => FieldType::NidList,
            TAG_VERTEX => FieldType::Vertex,
            TAG_DIGRAPH => FieldType::DiGraph,
            other => return Err(LexisError::UnknownFieldType(other)),
        })
    }
}

// =============================================================================
// FIELD VALUE
// =============================================================================

/// A typed field value.
///
/// The four reference variants carry the nid of the referenced entity and
/// record which category it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Concept(Nid),
    Semantic(Nid),
    Pattern(Nid),
    Stamp(Nid),
    NidList(Vec<Nid>),
    Vertex(Box<GraphVertex>),
    DiGraph(Box<DiGraph>),
}

impl FieldValue {
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::String(_) => FieldType::String,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::I64(_) => FieldType::I64,
            FieldValue::F32(_) => FieldType::F32,
            FieldValue::F64(_) => FieldType::F64,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Bytes(_) => FieldType::Bytes,
            FieldValue::Concept(_) => FieldType::Concept,
            FieldValue::Semantic(_) => FieldType::Semantic,
            FieldValue::Pattern(_) => FieldType::Pattern,
            FieldValue::Stamp(_) => FieldType::Stamp,
            FieldValue::NidList(_) => FieldType::NidList,
            FieldValue::Vertex(_) => FieldType::Vertex,
            FieldValue::DiGraph(_) => FieldType::DiGraph,
        }
    }

    /// The referenced nid, for the four reference variants.
    #[must_use]
    pub fn as_reference(&self) -> Option<Nid> {
        match self {
            FieldValue::Concept(nid)
            | FieldValue::Semantic(nid)
            | FieldValue::Pattern(nid)
            | FieldValue::Stamp(nid) => Some(*nid),
            _ => None,
        }
    }

    /// Encode this value (tag + payload) on its own.
    pub fn encode(&self) -> Result<Vec<u8>, LexisError> {
        let mut writer = ByteWriter::unbounded();
        self.write_to(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Decode exactly one value; trailing bytes are an error.
    pub fn decode(bytes: &[u8], format_version: u8) -> Result<Self, LexisError> {
        check_format_version(format_version)?;
        let mut reader = ByteReader::new(bytes);
        let value = Self::read_from(&mut reader, format_version)?;
        reader.expect_end()?;
        Ok(value)
    }

    /// Write tag + payload.
    pub fn write_to(&self, writer: &mut ByteWriter) -> Result<(), LexisError> {
        writer.put_u8(self.field_type().tag())?;
        match self {
            FieldValue::String(s) => writer.put_prefixed(s.as_bytes()),
            FieldValue::I32(v) => writer.put_i32(*v),
            FieldValue::I64(v) => writer.put_i64(*v),
            FieldValue::F32(v) => writer.put_f32(*v),
            FieldValue::F64(v) => writer.put_f64(*v),
            FieldValue::Bool(v) => writer.put_u8(u8::from(*v)),
            FieldValue::Bytes(b) => writer.put_prefixed(b),
            FieldValue::Concept(nid)
            | FieldValue::Semantic(nid)
            | FieldValue::Pattern(nid)
            | FieldValue::Stamp(nid) => writer.put_i32(nid.0),
            FieldValue::NidList(nids) => {
                writer.put_len(nids.len())?;
                for nid in nids {
                    writer.put_i32(nid.0)?;
                }
                Ok(())
            }
            FieldValue::Vertex(vertex) => vertex.write_body(writer),
            FieldValue::DiGraph(graph) => graph.write_body(writer),
        }
    }

    /// Read tag + payload.
    pub fn read_from(reader: &mut ByteReader<'_>, format_version: u8) -> Result<Self, LexisError> {
        Self::read_at_depth(reader, format_version, 0)
    }

    pub(crate) fn read_at_depth(
        reader: &mut ByteReader<'_>,
        format_version: u8,
        depth: usize,
    ) -> Result<Self, LexisError> {
        let field_type = FieldType::from_tag(reader.get_u8()?)?;
        Ok(match field_type {
            FieldType::String => {
                let raw = reader.get_prefixed()?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| LexisError::Malformed(format!("invalid UTF-8 string: {}", e)))?;
                FieldValue::String(s.to_owned())
            }
            FieldType::I32 => FieldValue::I32(reader.get_i32()?),
            FieldType::I64 => FieldValue::I64(reader.get_i64()?),
            FieldType::F32 => FieldValue::F32(reader.get_f32()?),
            FieldType::F64 => FieldValue::F64(reader.get_f64()?),
            FieldType::Bool => match reader.get_u8()? {
                0 => FieldValue::Bool(false),
                1 => FieldValue::Bool(true),
                other => {
                    return Err(LexisError::Malformed(format!(
                        "invalid boolean byte {}",
                        other
                    )));
                }
            },
            FieldType::Bytes => FieldValue::Bytes(reader.get_prefixed()?.to_vec()),
            FieldType::Concept => FieldValue::Concept(Nid(reader.get_i32()?)),
            FieldType::Semantic => FieldValue::Semantic(Nid(reader.get_i32()?)),
            FieldType::Pattern => FieldValue::Pattern(Nid(reader.get_i32()?)),
            FieldType::Stamp => FieldValue::Stamp(Nid(reader.get_i32()?)),
            FieldType::NidList => {
                let count = reader.get_count(4)?;
                let mut nids = Vec::with_capacity(count);
                for _ in 0..count {
                    nids.push(Nid(reader.get_i32()?));
                }
                FieldValue::NidList(nids)
            }
            FieldType::Vertex => {
                let depth = nested(depth)?;
                FieldValue::Vertex(Box::new(GraphVertex::read_body(
                    reader,
                    format_version,
                    depth,
                )?))
            }
            FieldType::DiGraph => {
                let depth = nested(depth)?;
                FieldValue::DiGraph(Box::new(DiGraph::read_body(
                    reader,
                    format_version,
                    depth,
                )?))
            }
        })
    }
}

fn nested(depth: usize) -> Result<usize, LexisError> {
    let next = depth + 1;
    if next > MAX_NESTING_DEPTH {
        return Err(LexisError::Malformed(format!(
            "field nesting deeper than {}",
            MAX_NESTING_DEPTH
        )));
    }
    Ok(next)
}

/// Write a counted field list.
pub fn write_fields(writer: &mut ByteWriter, fields: &[FieldValue]) -> Result<(), LexisError> {
    writer.put_len(fields.len())?;
    for field in fields {
        field.write_to(writer)?;
    }
    Ok(())
}

/// Read a counted field list.
pub fn read_fields(
    reader: &mut ByteReader<'_>,
    format_version: u8,
) -> Result<Vec<FieldValue>, LexisError> {
    // Smallest value is a tag plus a one-byte bool.
    let count = reader.get_count(2)?;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(FieldValue::read_from(reader, format_version)?);
    }
    Ok(fields)
}

// =============================================================================
// TESTS
// =============================================================================
