//! # Fixed Primitives
//!
//! Hardcoded constants for the Lexis binary formats and store.
//!
//! These are compiled into the binary and are immutable at runtime. Changing
//! any wire constant is a format break and requires a new
//! `ENTITY_FORMAT_VERSION`.

/// Current entity format version.
///
/// Written as the leading byte of every chronology and checked by every
/// decoder. Bytes carrying any other value are rejected, never guessed at.
pub const ENTITY_FORMAT_VERSION: u8 = 1;

/// First nid handed out by an empty store.
pub const FIRST_NID: i32 = 1;

// =============================================================================
// FIELD TYPE TAGS
// =============================================================================

pub const TAG_STRING: u8 = 1;
pub const TAG_I32: u8 = 2;
pub const TAG_I64: u8 = 3;
pub const TAG_F32: u8 = 4;
pub const TAG_F64: u8 = 5;
pub const TAG_BOOL: u8 = 6;
pub const TAG_BYTES: u8 = 7;
pub const TAG_CONCEPT: u8 = 8;
pub const TAG_SEMANTIC: u8 = 9;
pub const TAG_PATTERN: u8 = 10;
pub const TAG_STAMP: u8 = 11;
pub const TAG_NID_LIST: u8 = 12;
pub const TAG_VERTEX: u8 = 13;
pub const TAG_DIGRAPH: u8 = 14;

// =============================================================================
// KEY & BUFFER SIZES
// =============================================================================

/// Length of a nid key (big-endian i32, sign bit flipped).
pub const NID_KEY_LEN: usize = 4;

/// Length of a UUID key.
pub const UUID_KEY_LEN: usize = 16;

/// Initial buffer size for vertex encoding.
///
/// The encoder retries with a doubled buffer whenever this is too small.
pub const DEFAULT_VERTEX_BUFFER_SIZE: usize = 64;

/// Upper bound for any single encoded value (64 MB).
///
/// Bounds the vertex grow-and-retry loop and rejects absurd length prefixes.
pub const MAX_ENCODED_SIZE: usize = 64 * 1024 * 1024;

/// Maximum nesting depth of vertex / graph field values.
///
/// A vertex property may hold a graph whose vertices hold graphs, and so on.
/// Decoding stops here instead of recursing without bound.
pub const MAX_NESTING_DEPTH: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_tags_are_distinct() {
        let tags = [
            TAG_STRING,
            TAG_I32,
            TAG_I64,
            TAG_F32,
            TAG_F64,
            TAG_BOOL,
            TAG_BYTES,
            TAG_CONCEPT,
            TAG_SEMANTIC,
            TAG_PATTERN,
            TAG_STAMP,
            TAG_NID_LIST,
            TAG_VERTEX,
            TAG_DIGRAPH,
        ];
        let unique: std::collections::BTreeSet<u8> = tags.iter().copied().collect();
        assert_eq!(unique.len(), tags.len());
        assert!(!unique.contains(&0));
    }
}
