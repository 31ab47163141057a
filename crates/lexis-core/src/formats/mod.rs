//! # Binary Formats
//!
//! Pure byte-level transformations, no I/O:
//! - `bytes`: bounded writer and checked reader
//! - `field`: self-describing field values
//! - `chronology`: entity version histories and their merge rule

pub mod bytes;
pub mod chronology;
pub mod field;

pub use chronology::{
    Chronology, ChronologyHeader, EntityKind, StampRecord, Version, merge_bytes,
};
pub use field::{FieldType, FieldValue, check_format_version};
