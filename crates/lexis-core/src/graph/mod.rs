//! # Logical-Definition Graphs
//!
//! `GraphVertex` holds content; `DiGraph` holds topology. Both embed in
//! chronology versions as field values.

pub mod digraph;
pub mod vertex;

pub use digraph::DiGraph;
pub use vertex::{ComponentRef, ForeignValue, ForeignVertex, GraphVertex, NidResolver};
