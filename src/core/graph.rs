//! Append-only directed graph with linked adjacency lists.
//!
//! Edges live in a flat arena. Each node keeps the head and tail index of two
//! singly linked lists threaded through the arena, one for outgoing and one
//! for incoming edges. Without an ordering function an edge is appended to
//! both lists in O(1); with one it is insertion-sorted (equal edges keep
//! insertion order). Edges are never removed.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// An edge whose endpoints may be unknown.
pub trait Edge {
    type Node: Clone + Eq + Hash;

    fn source(&self) -> Option<&Self::Node>;
    fn target(&self) -> Option<&Self::Node>;
}

/// Order used to keep adjacency lists sorted.
pub type EdgeOrder<E> = fn(&E, &E) -> Ordering;

#[derive(Debug, Clone)]
struct Slot<E> {
    edge: E,
    next_out: Option<usize>,
    next_in: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    first_out: Option<usize>,
    last_out: Option<usize>,
    first_in: Option<usize>,
    last_in: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outgoing,
    Incoming,
}

pub struct DirectedGraph<E: Edge> {
    slots: Vec<Slot<E>>,
    nodes: HashMap<E::Node, Links>,
    order: Option<EdgeOrder<E>>,
}

impl<E: Edge> Default for DirectedGraph<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Edge + fmt::Debug> fmt::Debug for DirectedGraph<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectedGraph")
            .field("edges", &self.slots.len())
            .field("nodes", &self.nodes.len())
            .field("sorted", &self.order.is_some())
            .finish()
    }
}

impl<E: Edge> DirectedGraph<E> {
    /// An empty graph with adjacency in insertion order.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            nodes: HashMap::new(),
            order: None,
        }
    }

    /// A graph whose adjacency lists are kept sorted by `order`.
    pub fn with_order(order: EdgeOrder<E>) -> Self {
        Self {
            order: Some(order),
            ..Self::new()
        }
    }

    /// Append an edge and return its arena index.
    pub fn add_edge(&mut self, edge: E) -> usize {
        let index = self.slots.len();
        let source = edge.source().cloned();
        let target = edge.target().cloned();
        self.slots.push(Slot {
            edge,
            next_out: None,
            next_in: None,
        });
        if let Some(node) = source {
            self.link(node, index, Direction::Outgoing);
        }
        if let Some(node) = target {
            self.link(node, index, Direction::Incoming);
        }
        index
    }

    fn next(&self, index: usize, dir: Direction) -> Option<usize> {
        match dir {
            Direction::Outgoing => self.slots[index].next_out,
            Direction::Incoming => self.slots[index].next_in,
        }
    }

    fn set_next(&mut self, index: usize, dir: Direction, next: Option<usize>) {
        match dir {
            Direction::Outgoing => self.slots[index].next_out = next,
            Direction::Incoming => self.slots[index].next_in = next,
        }
    }

    fn link(&mut self, node: E::Node, index: usize, dir: Direction) {
        let links = *self.nodes.entry(node.clone()).or_default();
        let (head, tail) = match dir {
            Direction::Outgoing => (links.first_out, links.last_out),
            Direction::Incoming => (links.first_in, links.last_in),
        };

        // Find the edge after which the new one goes; `None` means the front.
        let after = match (self.order, tail) {
            (_, None) => None,
            (None, Some(tail)) => Some(tail),
            (Some(order), Some(_)) => {
                let mut prev = None;
                let mut cursor = head;
                while let Some(current) = cursor {
                    if order(&self.slots[current].edge, &self.slots[index].edge)
                        == Ordering::Greater
                    {
                        break;
                    }
                    prev = Some(current);
                    cursor = self.next(current, dir);
                }
                prev
            }
        };

        let next = match after {
            Some(prev) => self.next(prev, dir),
            None => head,
        };
        self.set_next(index, dir, next);
        if let Some(prev) = after {
            self.set_next(prev, dir, Some(index));
        }

        let links = self.nodes.entry(node).or_default();
        let (first, last) = match dir {
            Direction::Outgoing => (&mut links.first_out, &mut links.last_out),
            Direction::Incoming => (&mut links.first_in, &mut links.last_in),
        };
        if after.is_none() {
            *first = Some(index);
        }
        if next.is_none() {
            *last = Some(index);
        }
    }

    /// Outgoing edges of `node`, in list order.
    pub fn edges_from(&self, node: &E::Node) -> Adjacent<'_, E> {
        Adjacent {
            graph: self,
            cursor: self.nodes.get(node).and_then(|l| l.first_out),
            dir: Direction::Outgoing,
        }
    }

    /// Incoming edges of `node`, in list order.
    pub fn edges_to(&self, node: &E::Node) -> Adjacent<'_, E> {
        Adjacent {
            graph: self,
            cursor: self.nodes.get(node).and_then(|l| l.first_in),
            dir: Direction::Incoming,
        }
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &E> {
        self.slots.iter().map(|s| &s.edge)
    }

    /// Get an edge by its arena index
    pub fn edge(&self, index: usize) -> Option<&E> {
        self.slots.get(index).map(|s| &s.edge)
    }

    /// Every node that has at least one edge
    pub fn nodes(&self) -> impl Iterator<Item = &E::Node> {
        self.nodes.keys()
    }

    pub fn contains_node(&self, node: &E::Node) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.nodes.clear();
    }
}

/// Iterator over one adjacency list.
pub struct Adjacent<'a, E: Edge> {
    graph: &'a DirectedGraph<E>,
    cursor: Option<usize>,
    dir: Direction,
}

impl<'a, E: Edge> Iterator for Adjacent<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        self.cursor = self.graph.next(index, self.dir);
        Some(&self.graph.slots[index].edge)
    }
}
