//! # Directed Logical-Definition Graph
//!
//! Vertices addressed by position index plus a successor list per index.
//! The vertex at index 0 is the root. Construction validates that indices
//! are dense and that the successor relation is acyclic, so every `DiGraph`
//! value in memory is a well-formed DAG.

use crate::formats::bytes::{ByteReader, ByteWriter};
use crate::formats::field::FieldValue;
use crate::graph::vertex::GraphVertex;
use crate::types::{LexisError, Nid};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Smallest encoded vertex body: identity, index, meaning, property count.
const MIN_VERTEX_BODY_LEN: usize = 16 + 4 + 4 + 4;

#[derive(Debug, Clone, PartialEq)]
pub struct DiGraph {
    vertices: Vec<GraphVertex>,
    successors: BTreeMap<u32, Vec<u32>>,
}

impl DiGraph {
    /// Build and validate a graph.
    ///
    /// `vertices[i].index` must equal `i`. Successor lists may only name
    /// existing indices, may not repeat a target, and must not form a cycle.
    /// Empty successor lists are dropped.
    pub fn new(
        vertices: Vec<GraphVertex>,
        successors: BTreeMap<u32, Vec<u32>>,
    ) -> Result<Self, LexisError> {
        let successors = successors
            .into_iter()
            .filter(|(_, targets)| !targets.is_empty())
            .collect();
        let graph = Self {
            vertices,
            successors,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// A graph of one root vertex with no edges.
    pub fn single(root: GraphVertex) -> Result<Self, LexisError> {
        Self::new(vec![root], BTreeMap::new())
    }

    fn validate(&self) -> Result<(), LexisError> {
        for (position, vertex) in self.vertices.iter().enumerate() {
            if vertex.index as usize != position {
                return Err(LexisError::InvalidGraph(format!(
                    "vertex at position {} carries index {}",
                    position, vertex.index
                )));
            }
        }

        let count = self.vertices.len();
        for (&source, targets) in &self.successors {
            if source as usize >= count {
                return Err(LexisError::InvalidGraph(format!(
                    "successor list for missing vertex {}",
                    source
                )));
            }
            let mut seen = BTreeSet::new();
            for &target in targets {
                if target as usize >= count {
                    return Err(LexisError::InvalidGraph(format!(
                        "edge {} -> {} points past {} vertices",
                        source, target, count
                    )));
                }
                if !seen.insert(target) {
                    return Err(LexisError::InvalidGraph(format!(
                        "edge {} -> {} listed twice",
                        source, target
                    )));
                }
            }
        }

        // Kahn: every vertex must drain if there is no cycle.
        let mut in_degree = vec![0usize; count];
        for targets in self.successors.values() {
            for &target in targets {
                in_degree[target as usize] += 1;
            }
        }
        let mut queue: VecDeque<u32> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| index as u32)
            .collect();
        let mut drained = 0usize;
        while let Some(index) = queue.pop_front() {
            drained += 1;
            for &target in self.successors(index) {
                let degree = &mut in_degree[target as usize];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }
        if drained != count {
            return Err(LexisError::InvalidGraph(format!(
                "cycle among {} of {} vertices",
                count - drained,
                count
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn root(&self) -> Option<&GraphVertex> {
        self.vertices.first()
    }

    #[must_use]
    pub fn vertex(&self, index: u32) -> Option<&GraphVertex> {
        self.vertices.get(index as usize)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &GraphVertex> {
        self.vertices.iter()
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.successors.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn successors(&self, index: u32) -> &[u32] {
        self.successors
            .get(&index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Indices with an edge into `index`, ascending.
    #[must_use]
    pub fn predecessors(&self, index: u32) -> Vec<u32> {
        self.successors
            .iter()
            .filter(|(_, targets)| targets.contains(&index))
            .map(|(&source, _)| source)
            .collect()
    }

    /// Depth-first pre-order walk from the root. Each vertex is visited once,
    /// with the depth at which it was first reached.
    pub fn dfs(&self, mut visit: impl FnMut(&GraphVertex, usize)) {
        let Some(root) = self.root() else {
            return;
        };
        let mut visited = BTreeSet::new();
        let mut stack = vec![(root.index, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            if !visited.insert(index) {
                continue;
            }
            if let Some(vertex) = self.vertex(index) {
                visit(vertex, depth);
            }
            // Reverse push keeps successor order on pop.
            for &target in self.successors(index).iter().rev() {
                if !visited.contains(&target) {
                    stack.push((target, depth + 1));
                }
            }
        }
    }

    /// Indented text rendering, one vertex per line, properties beneath.
    ///
    /// `describe` turns a nid into display text. A vertex reached a second
    /// time is printed as a back-reference instead of being expanded again.
    pub fn to_graph_format_string(&self, describe: impl Fn(Nid) -> String) -> String {
        let mut out = String::new();
        let Some(root) = self.root() else {
            return out;
        };
        let mut expanded = BTreeSet::new();
        let mut stack = vec![(root.index, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            let indent = "  ".repeat(depth);
            let Some(vertex) = self.vertex(index) else {
                continue;
            };
            if !expanded.insert(index) {
                out.push_str(&format!("{}-> [{}]\n", indent, index));
                continue;
            }
            out.push_str(&format!(
                "{}[{}] {}\n",
                indent,
                index,
                describe(vertex.meaning)
            ));
            for (key, value) in &vertex.properties {
                out.push_str(&format!(
                    "{}    {}: {}\n",
                    indent,
                    describe(*key),
                    render_value(value, &describe)
                ));
            }
            for &target in self.successors(index).iter().rev() {
                stack.push((target, depth + 1));
            }
        }
        out
    }

    // -------------------------------------------------------------------------
    // Codec
    // -------------------------------------------------------------------------

    pub(crate) fn write_body(&self, writer: &mut ByteWriter) -> Result<(), LexisError> {
        writer.put_len(self.vertices.len())?;
        for vertex in &self.vertices {
            vertex.write_body(writer)?;
        }
        writer.put_len(self.successors.len())?;
        for (&source, targets) in &self.successors {
            writer.put_u32(source)?;
            writer.put_len(targets.len())?;
            for &target in targets {
                writer.put_u32(target)?;
            }
        }
        Ok(())
    }

    pub(crate) fn read_body(
        reader: &mut ByteReader<'_>,
        format_version: u8,
        depth: usize,
    ) -> Result<Self, LexisError> {
        let vertex_count = reader.get_count(MIN_VERTEX_BODY_LEN)?;
        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            vertices.push(GraphVertex::read_body(reader, format_version, depth)?);
        }

        let entry_count = reader.get_count(8)?;
        let mut successors = BTreeMap::new();
        for _ in 0..entry_count {
            let source = reader.get_u32()?;
            let target_count = reader.get_count(4)?;
            let mut targets = Vec::with_capacity(target_count);
            for _ in 0..target_count {
                targets.push(reader.get_u32()?);
            }
            if successors.insert(source, targets).is_some() {
                return Err(LexisError::Malformed(format!(
                    "successor list for vertex {} repeated",
                    source
                )));
            }
        }
        Self::new(vertices, successors)
    }
}

fn render_value(value: &FieldValue, describe: &impl Fn(Nid) -> String) -> String {
    match value {
        FieldValue::String(s) => format!("{:?}", s),
        FieldValue::I32(v) => v.to_string(),
        FieldValue::I64(v) => v.to_string(),
        FieldValue::F32(v) => v.to_string(),
        FieldValue::F64(v) => v.to_string(),
        FieldValue::Bool(v) => v.to_string(),
        FieldValue::Bytes(b) => format!("<{} bytes>", b.len()),
        FieldValue::Concept(nid)
        | FieldValue::Semantic(nid)
        | FieldValue::Pattern(nid)
        | FieldValue::Stamp(nid) => describe(*nid),
        FieldValue::NidList(nids) => {
            let items: Vec<String> = nids.iter().map(|nid| describe(*nid)).collect();
            format!("[{}]", items.join(", "))
        }
        FieldValue::Vertex(vertex) => format!("<vertex {}>", vertex.index),
        FieldValue::DiGraph(graph) => format!("<graph of {}>", graph.vertex_count()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ENTITY_FORMAT_VERSION;
    use uuid::Uuid;

    fn vertex(index: u32, meaning: i32) -> GraphVertex {
        GraphVertex::new(
            Uuid::from_u128(u128::from(index) + 1000),
            index,
            Nid(meaning),
            BTreeMap::new(),
        )
    }

    /// 0 -> {1, 2}, 1 -> 3, 2 -> 3
    fn diamond() -> DiGraph {
        let vertices = (0..4).map(|i| vertex(i, 10 + i as i32)).collect();
        let mut successors = BTreeMap::new();
        successors.insert(0, vec![1, 2]);
        successors.insert(1, vec![3]);
        successors.insert(2, vec![3]);
        DiGraph::new(vertices, successors).expect("valid diamond")
    }

    #[test]
    fn diamond_topology() {
        let graph = diamond();
        assert_eq!(graph.root().map(|v| v.index), Some(0));
        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.successors(0), &[1, 2]);
        assert_eq!(graph.successors(3), &[] as &[u32]);
        assert_eq!(graph.predecessors(3), vec![1, 2]);
        assert!(graph.predecessors(0).is_empty());
    }

    #[test]
    fn dfs_visits_each_vertex_once_in_preorder() {
        let graph = diamond();
        let mut order = Vec::new();
        graph.dfs(|v, depth| order.push((v.index, depth)));
        assert_eq!(order, vec![(0, 0), (1, 1), (3, 2), (2, 1)]);
    }

    #[test]
    fn cycle_rejected() {
        let vertices = (0..3).map(|i| vertex(i, 1)).collect();
        let mut successors = BTreeMap::new();
        successors.insert(0, vec![1]);
        successors.insert(1, vec![2]);
        successors.insert(2, vec![1]);
        assert!(matches!(
            DiGraph::new(vertices, successors),
            Err(LexisError::InvalidGraph(_))
        ));
    }

    #[test]
    fn self_loop_rejected() {
        let mut successors = BTreeMap::new();
        successors.insert(0, vec![0]);
        assert!(DiGraph::new(vec![vertex(0, 1)], successors).is_err());
    }

    #[test]
    fn sparse_or_dangling_indices_rejected() {
        assert!(DiGraph::new(vec![vertex(1, 1)], BTreeMap::new()).is_err());

        let mut successors = BTreeMap::new();
        successors.insert(0, vec![5]);
        assert!(DiGraph::new(vec![vertex(0, 1)], successors).is_err());
    }

    #[test]
    fn graph_roundtrips_as_field_value() {
        let mut graph = diamond();
        graph.vertices[3]
            .properties
            .insert(Nid(50), FieldValue::F32(2.5));
        let value = FieldValue::DiGraph(Box::new(graph));

        let bytes = value.encode().expect("encode");
        let decoded = FieldValue::decode(&bytes, ENTITY_FORMAT_VERSION).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn format_string_marks_shared_vertices() {
        let mut graph = diamond();
        graph.vertices[1]
            .properties
            .insert(Nid(50), FieldValue::Concept(Nid(60)));
        let text = graph.to_graph_format_string(|nid| format!("c{}", nid.value()));

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[0] c10",
                "  [1] c11",
                "      c50: c60",
                "    [3] c13",
                "  [2] c12",
                "    -> [3]",
            ]
        );
    }

    #[test]
    fn empty_graph_has_no_root() {
        let graph = DiGraph::new(Vec::new(), BTreeMap::new()).expect("empty");
        assert!(graph.root().is_none());
        assert!(graph.to_graph_format_string(|n| n.to_string()).is_empty());
    }
}
