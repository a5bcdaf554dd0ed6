// Query-graph model: named node and rel variables from the MATCH pattern,
// and bitset-addressed subgraphs used as DP keys by the join enumerator.

use crate::common::LabelId;
use crate::error::{GraphError, Result};
use std::collections::HashMap;

/// Bitsets cap the pattern size; queries beyond this fail to plan.
pub const MAX_PATTERN_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct QueryNode {
    pub name: String,
    pub label: LabelId,
}

#[derive(Debug, Clone)]
pub struct QueryRel {
    pub name: String,
    pub src_node: usize,
    pub dst_node: usize,
    pub label: LabelId,
    /// Hop bounds; (1, 1) is a plain rel, anything else is recursive.
    pub lower: u32,
    pub upper: u32,
}

impl QueryRel {
    pub fn is_recursive(&self) -> bool {
        !(self.lower == 1 && self.upper == 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryGraph {
    pub nodes: Vec<QueryNode>,
    pub rels: Vec<QueryRel>,
    node_pos: HashMap<String, usize>,
    rel_pos: HashMap<String, usize>,
}

impl QueryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node variable, or returns the position of an existing one
    /// with the same name.
    pub fn add_node(&mut self, name: &str, label: LabelId) -> Result<usize> {
        if let Some(&pos) = self.node_pos.get(name) {
            if self.nodes[pos].label != label {
                return Err(GraphError::Bind(format!(
                    "variable {name} is used with conflicting labels"
                )));
            }
            return Ok(pos);
        }
        if self.nodes.len() == MAX_PATTERN_SIZE {
            return Err(GraphError::Plan(format!(
                "patterns with more than {MAX_PATTERN_SIZE} nodes are not supported"
            )));
        }
        let pos = self.nodes.len();
        self.node_pos.insert(name.to_string(), pos);
        self.nodes.push(QueryNode { name: name.to_string(), label });
        Ok(pos)
    }

    pub fn add_rel(&mut self, rel: QueryRel) -> Result<usize> {
        if self.rel_pos.contains_key(&rel.name) {
            return Err(GraphError::Bind(format!("rel variable {} is used twice", rel.name)));
        }
        if self.rels.len() == MAX_PATTERN_SIZE {
            return Err(GraphError::Plan(format!(
                "patterns with more than {MAX_PATTERN_SIZE} rels are not supported"
            )));
        }
        let pos = self.rels.len();
        self.rel_pos.insert(rel.name.clone(), pos);
        self.rels.push(rel);
        Ok(pos)
    }

    pub fn node_position(&self, name: &str) -> Option<usize> {
        self.node_pos.get(name).copied()
    }

    pub fn rel_position(&self, name: &str) -> Option<usize> {
        self.rel_pos.get(name).copied()
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.node_pos.contains_key(name)
    }

    pub fn contains_rel(&self, name: &str) -> bool {
        self.rel_pos.contains_key(name)
    }

    /// BFS over the pattern from node 0; disconnected MATCH is rejected at
    /// plan time.
    pub fn is_connected(&self) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut frontier = vec![0usize];
        visited[0] = true;
        let mut seen = 1;
        while let Some(node) = frontier.pop() {
            for rel in &self.rels {
                for nbr in [rel.src_node, rel.dst_node] {
                    let touches = rel.src_node == node || rel.dst_node == node;
                    if touches && !visited[nbr] {
                        visited[nbr] = true;
                        seen += 1;
                        frontier.push(nbr);
                    }
                }
            }
        }
        seen == self.nodes.len()
    }

    /// Rels outside `subgraph` with at least one endpoint inside it,
    /// with flags telling which endpoints are covered.
    pub fn connected_rels(&self, subgraph: &SubqueryGraph) -> Vec<(usize, bool, bool)> {
        let mut out = Vec::new();
        for (pos, rel) in self.rels.iter().enumerate() {
            if subgraph.contains_rel(pos) {
                continue;
            }
            let src_in = subgraph.contains_node(rel.src_node);
            let dst_in = subgraph.contains_node(rel.dst_node);
            if src_in || dst_in {
                out.push((pos, src_in, dst_in));
            }
        }
        out
    }
}

/// Subset of a query graph, equality-comparable by its two bitsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubqueryGraph {
    pub node_mask: u64,
    pub rel_mask: u64,
}

impl SubqueryGraph {
    pub fn single_node(pos: usize) -> Self {
        Self { node_mask: 1 << pos, rel_mask: 0 }
    }

    pub fn contains_node(&self, pos: usize) -> bool {
        self.node_mask & (1 << pos) != 0
    }

    pub fn contains_rel(&self, pos: usize) -> bool {
        self.rel_mask & (1 << pos) != 0
    }

    pub fn add_node(&mut self, pos: usize) {
        self.node_mask |= 1 << pos;
    }

    /// Adds a rel and both its endpoints.
    pub fn add_rel(&mut self, graph: &QueryGraph, pos: usize) {
        self.rel_mask |= 1 << pos;
        self.node_mask |= 1 << graph.rels[pos].src_node;
        self.node_mask |= 1 << graph.rels[pos].dst_node;
    }

    pub fn union(&self, other: &SubqueryGraph) -> SubqueryGraph {
        SubqueryGraph {
            node_mask: self.node_mask | other.node_mask,
            rel_mask: self.rel_mask | other.rel_mask,
        }
    }

    pub fn num_rels(&self) -> u32 {
        self.rel_mask.count_ones()
    }

    pub fn shared_nodes(&self, other: &SubqueryGraph) -> u64 {
        self.node_mask & other.node_mask
    }

    pub fn overlaps_rels(&self, other: &SubqueryGraph) -> bool {
        self.rel_mask & other.rel_mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> QueryGraph {
        // (a)-[e1]->(b)-[e2]->(c)
        let mut g = QueryGraph::new();
        let a = g.add_node("a", 0).unwrap();
        let b = g.add_node("b", 0).unwrap();
        let c = g.add_node("c", 0).unwrap();
        g.add_rel(QueryRel { name: "e1".into(), src_node: a, dst_node: b, label: 0, lower: 1, upper: 1 })
            .unwrap();
        g.add_rel(QueryRel { name: "e2".into(), src_node: b, dst_node: c, label: 0, lower: 1, upper: 1 })
            .unwrap();
        g
    }

    #[test]
    fn connectivity() {
        let g = chain_graph();
        assert!(g.is_connected());

        let mut disconnected = QueryGraph::new();
        disconnected.add_node("a", 0).unwrap();
        disconnected.add_node("b", 0).unwrap();
        assert!(!disconnected.is_connected());
    }

    #[test]
    fn connected_rels_report_covered_endpoints() {
        let g = chain_graph();
        let sub = SubqueryGraph::single_node(0);
        let rels = g.connected_rels(&sub);
        assert_eq!(rels, vec![(0, true, false)]);

        let mut sub2 = sub;
        sub2.add_rel(&g, 0);
        let rels2 = g.connected_rels(&sub2);
        assert_eq!(rels2, vec![(1, true, false)]);
    }

    #[test]
    fn subgraph_equality_is_bitset_equality() {
        let g = chain_graph();
        let mut s1 = SubqueryGraph::single_node(0);
        s1.add_rel(&g, 0);
        let mut s2 = SubqueryGraph::single_node(1);
        s2.add_rel(&g, 0);
        assert_eq!(s1, s2);
    }

    #[test]
    fn reusing_a_node_variable_returns_same_position() {
        let mut g = QueryGraph::new();
        let a1 = g.add_node("a", 0).unwrap();
        let a2 = g.add_node("a", 0).unwrap();
        assert_eq!(a1, a2);
        assert!(g.add_node("a", 1).is_err());
    }
}
