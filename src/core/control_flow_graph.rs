//! ControlFlowGraph type for representing control flow between basic blocks.
//!
//! Nodes are the resolved start addresses of basic blocks. Edges come from
//! cross-references whose ends both resolve, plus fall-through edges between
//! a block and the block that starts where it ends.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::core::address::ResolvedAddress;
use crate::core::graph::{DirectedGraph, Edge};
use crate::core::reference::XRefType;

/// Edge kind in control flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlFlowEdgeKind {
    /// Execution runs off the end of one block into the next
    Fallthrough,
    /// Conditional, unconditional or indexed jump
    Branch,
    /// Procedure call
    Call,
}

impl ControlFlowEdgeKind {
    pub fn value(&self) -> &str {
        match self {
            ControlFlowEdgeKind::Fallthrough => "fallthrough",
            ControlFlowEdgeKind::Branch => "branch",
            ControlFlowEdgeKind::Call => "call",
        }
    }
}

/// Edge in control flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlFlowEdge {
    /// Start of the source block
    pub from: ResolvedAddress,
    /// Start of the target block
    pub to: ResolvedAddress,
    pub kind: ControlFlowEdgeKind,
    /// Type of the cross-reference the edge was derived from
    pub xref: Option<XRefType>,
}

impl ControlFlowEdge {
    /// Edge from a block into the block that starts at its end.
    pub fn fallthrough(from: ResolvedAddress, to: ResolvedAddress) -> Self {
        Self {
            from,
            to,
            kind: ControlFlowEdgeKind::Fallthrough,
            xref: None,
        }
    }

    /// Edge derived from a cross-reference between two blocks.
    pub fn from_xref(from: ResolvedAddress, to: ResolvedAddress, xref: XRefType) -> Self {
        let kind = if xref.is_call() {
            ControlFlowEdgeKind::Call
        } else {
            ControlFlowEdgeKind::Branch
        };
        Self {
            from,
            to,
            kind,
            xref: Some(xref),
        }
    }
}

impl Edge for ControlFlowEdge {
    type Node = ResolvedAddress;

    fn source(&self) -> Option<&ResolvedAddress> {
        Some(&self.from)
    }

    fn target(&self) -> Option<&ResolvedAddress> {
        Some(&self.to)
    }
}

impl fmt::Display for ControlFlowEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -{}-> {}", self.from, self.kind.value(), self.to)
    }
}

/// Block-level control flow graph.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    graph: DirectedGraph<ControlFlowEdge>,
    seen: HashSet<ControlFlowEdge>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge; returns `false` if an identical edge already exists.
    pub fn add_edge(&mut self, edge: ControlFlowEdge) -> bool {
        if !self.seen.insert(edge) {
            return false;
        }
        self.graph.add_edge(edge);
        true
    }

    /// Edges leaving `block`
    pub fn outgoing_edges(&self, block: &ResolvedAddress) -> Vec<&ControlFlowEdge> {
        self.graph.edges_from(block).collect()
    }

    /// Edges entering `block`
    pub fn incoming_edges(&self, block: &ResolvedAddress) -> Vec<&ControlFlowEdge> {
        self.graph.edges_to(block).collect()
    }

    /// Distinct successor blocks, in edge order.
    pub fn successors(&self, block: &ResolvedAddress) -> Vec<ResolvedAddress> {
        let mut out = Vec::new();
        for edge in self.graph.edges_from(block) {
            if !out.contains(&edge.to) {
                out.push(edge.to);
            }
        }
        out
    }

    /// Distinct predecessor blocks, in edge order.
    pub fn predecessors(&self, block: &ResolvedAddress) -> Vec<ResolvedAddress> {
        let mut out = Vec::new();
        for edge in self.graph.edges_to(block) {
            if !out.contains(&edge.from) {
                out.push(edge.from);
            }
        }
        out
    }

    pub fn edges(&self) -> impl Iterator<Item = &ControlFlowEdge> {
        self.graph.edges()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.len()
    }

    /// Number of blocks with at least one edge
    pub fn block_count(&self) -> usize {
        self.graph.nodes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.seen.clear();
    }
}
