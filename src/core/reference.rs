//! Cross-references between logical addresses.
//!
//! An [`XRef`] is a typed control transfer from a source instruction to a
//! target. Either end may be unknown: the entry point has no source, and a
//! dynamic jump has no target. The [`XRefCollection`] stores them in a
//! [`DirectedGraph`] keyed by logical address and notifies subscribers after
//! every insertion.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::core::address::LogicalAddress;
use crate::core::graph::{Adjacent, DirectedGraph, Edge, EdgeOrder};
use crate::error::{DosflowError, Result};

/// Kind of control transfer. Declaration order is processing priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum XRefType {
    /// Entry point supplied by the caller
    UserSpecified,
    NearJump,
    FarJump,
    NearCall,
    FarCall,
    /// Taken or fall-through branch of a conditional jump
    ConditionalJump,
    /// Jump through a table; the target comes from the table slot
    NearIndexedJump,
}

impl XRefType {
    /// Worklist priority; lower values are processed first.
    pub const fn priority(self) -> u8 {
        match self {
            XRefType::UserSpecified => 0,
            XRefType::NearJump => 1,
            XRefType::FarJump => 2,
            XRefType::NearCall => 3,
            XRefType::FarCall => 4,
            XRefType::ConditionalJump => 5,
            XRefType::NearIndexedJump => 6,
        }
    }

    /// Check if this is a near or far call
    pub fn is_call(self) -> bool {
        matches!(self, XRefType::NearCall | XRefType::FarCall)
    }

    pub fn as_str(&self) -> &str {
        match self {
            XRefType::UserSpecified => "entry",
            XRefType::NearJump => "near_jump",
            XRefType::FarJump => "far_jump",
            XRefType::NearCall => "near_call",
            XRefType::FarCall => "far_call",
            XRefType::ConditionalJump => "conditional_jump",
            XRefType::NearIndexedJump => "near_indexed_jump",
        }
    }
}

/// An immutable cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "XRefRecord")]
pub struct XRef {
    source: Option<LogicalAddress>,
    target: Option<LogicalAddress>,
    kind: XRefType,
    data_location: Option<LogicalAddress>,
}

/// Serialized form of an [`XRef`], checked on the way in.
#[derive(Deserialize)]
struct XRefRecord {
    source: Option<LogicalAddress>,
    target: Option<LogicalAddress>,
    kind: XRefType,
    #[serde(default)]
    data_location: Option<LogicalAddress>,
}

impl TryFrom<XRefRecord> for XRef {
    type Error = DosflowError;

    fn try_from(record: XRefRecord) -> Result<Self> {
        let xref = XRef::new(record.source, record.target, record.kind)?;
        Ok(Self {
            data_location: record.data_location,
            ..xref
        })
    }
}

impl XRef {
    /// Create a cross-reference; at most one end may be unknown.
    pub fn new(
        source: Option<LogicalAddress>,
        target: Option<LogicalAddress>,
        kind: XRefType,
    ) -> Result<Self> {
        if source.is_none() && target.is_none() {
            return Err(DosflowError::InvalidXRef);
        }
        Ok(Self {
            source,
            target,
            kind,
            data_location: None,
        })
    }

    /// Entry into analysis at `target`.
    pub fn entry(target: LogicalAddress) -> Self {
        Self {
            source: None,
            target: Some(target),
            kind: XRefType::UserSpecified,
            data_location: None,
        }
    }

    /// A jump-table slot: the target is read from `slot` when processed.
    pub fn indexed(source: LogicalAddress, slot: LogicalAddress) -> Self {
        Self {
            source: Some(source),
            target: None,
            kind: XRefType::NearIndexedJump,
            data_location: Some(slot),
        }
    }

    /// Copy with the target filled in.
    pub fn resolved(&self, target: LogicalAddress) -> Self {
        Self {
            target: Some(target),
            ..*self
        }
    }

    /// Get the source instruction, if known
    pub fn source(&self) -> Option<&LogicalAddress> {
        self.source.as_ref()
    }

    /// Get the target, if resolved
    pub fn target(&self) -> Option<&LogicalAddress> {
        self.target.as_ref()
    }

    /// Get the transfer type
    pub fn kind(&self) -> XRefType {
        self.kind
    }

    /// Get the table slot of an indexed jump
    pub fn data_location(&self) -> Option<&LogicalAddress> {
        self.data_location.as_ref()
    }

    /// Check if the target is unknown
    pub fn is_dynamic(&self) -> bool {
        self.target.is_none()
    }

    /// Order used by the analysis worklist.
    pub fn priority_order(a: &XRef, b: &XRef) -> Ordering {
        a.kind.priority().cmp(&b.kind.priority())
    }
}

impl Edge for XRef {
    type Node = LogicalAddress;

    fn source(&self) -> Option<&LogicalAddress> {
        self.source.as_ref()
    }

    fn target(&self) -> Option<&LogicalAddress> {
        self.target.as_ref()
    }
}

impl fmt::Display for XRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = |a: &Option<LogicalAddress>| match a {
            Some(a) => a.to_string(),
            None => "?".to_string(),
        };
        write!(f, "{} {} -> {}", self.kind.as_str(), end(&self.source), end(&self.target))
    }
}

/// Observer invoked after an XRef has been added.
pub type XRefObserver = Box<dyn FnMut(&XRef)>;

/// Append-only collection of cross-references.
#[derive(Default)]
pub struct XRefCollection {
    graph: DirectedGraph<XRef>,
    observers: Vec<XRefObserver>,
}

impl fmt::Debug for XRefCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XRefCollection")
            .field("graph", &self.graph)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl XRefCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep per-address lists sorted by `order` instead of insertion order.
    pub fn with_order(order: EdgeOrder<XRef>) -> Self {
        Self {
            graph: DirectedGraph::with_order(order),
            observers: Vec::new(),
        }
    }

    /// Register an observer for subsequent insertions.
    pub fn subscribe(&mut self, observer: impl FnMut(&XRef) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Insert a cross-reference and notify subscribers.
    pub fn add(&mut self, xref: XRef) -> Result<()> {
        if xref.source.is_none() && xref.target.is_none() {
            return Err(DosflowError::InvalidXRef);
        }
        let index = self.graph.add_edge(xref);
        if let Some(added) = self.graph.edge(index) {
            for observer in &mut self.observers {
                observer(added);
            }
        }
        Ok(())
    }

    /// References whose target is `address`
    pub fn references_to(&self, address: &LogicalAddress) -> Adjacent<'_, XRef> {
        self.graph.edges_to(address)
    }

    /// References whose source is `address`
    pub fn references_from(&self, address: &LogicalAddress) -> Adjacent<'_, XRef> {
        self.graph.edges_from(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &XRef> {
        self.graph.edges()
    }

    /// References without a target
    pub fn dynamic(&self) -> impl Iterator<Item = &XRef> {
        self.graph.edges().filter(|x| x.is_dynamic())
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn clear(&mut self) {
        self.graph.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::{Referent, SegmentId};
    use crate::core::worklist::Worklist;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn addr(offset: u16) -> LogicalAddress {
        LogicalAddress::new(Referent::Segment(SegmentId(0)), offset)
    }

    fn xref(from: u16, to: u16, kind: XRefType) -> XRef {
        XRef::new(Some(addr(from)), Some(addr(to)), kind).unwrap()
    }

    #[test]
    fn test_both_ends_invalid_rejected() {
        assert!(matches!(
            XRef::new(None, None, XRefType::NearJump),
            Err(DosflowError::InvalidXRef)
        ));
        assert!(XRef::new(Some(addr(0)), None, XRefType::NearCall).unwrap().is_dynamic());
    }

    #[test]
    fn test_deserialize_checks_ends() {
        let xref = XRef::indexed(addr(0), addr(5));
        let json = serde_json::to_string(&xref).unwrap();
        assert_eq!(serde_json::from_str::<XRef>(&json).unwrap(), xref);

        let empty = r#"{"source":null,"target":null,"kind":"NearJump","data_location":null}"#;
        let err = serde_json::from_str::<XRef>(empty).unwrap_err();
        assert!(err.to_string().contains("source or a target"));
    }

    #[test]
    fn test_references_in_insertion_order() {
        let mut xrefs = XRefCollection::new();
        xrefs.add(xref(0x10, 0x40, XRefType::ConditionalJump)).unwrap();
        xrefs.add(xref(0x20, 0x40, XRefType::NearJump)).unwrap();
        xrefs.add(xref(0x10, 0x13, XRefType::ConditionalJump)).unwrap();

        let sources: Vec<u16> = xrefs
            .references_to(&addr(0x40))
            .filter_map(|x| x.source().map(|a| a.offset))
            .collect();
        assert_eq!(sources, vec![0x10, 0x20]);
        assert_eq!(xrefs.references_from(&addr(0x10)).count(), 2);
        assert_eq!(xrefs.len(), 3);
    }

    #[test]
    fn test_sorted_collection() {
        let mut xrefs = XRefCollection::with_order(XRef::priority_order);
        xrefs.add(xref(0x10, 0x40, XRefType::NearIndexedJump)).unwrap();
        xrefs.add(xref(0x20, 0x40, XRefType::NearJump)).unwrap();
        let kinds: Vec<XRefType> = xrefs.references_to(&addr(0x40)).map(|x| x.kind()).collect();
        assert_eq!(kinds, vec![XRefType::NearJump, XRefType::NearIndexedJump]);
    }

    #[test]
    fn test_notification_after_insert() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut xrefs = XRefCollection::new();
        xrefs.subscribe(move |x: &XRef| sink.borrow_mut().push(x.kind()));

        xrefs.add(XRef::entry(addr(0))).unwrap();
        xrefs.add(xref(0, 5, XRefType::NearCall)).unwrap();
        assert_eq!(*seen.borrow(), vec![XRefType::UserSpecified, XRefType::NearCall]);
    }

    #[test]
    fn test_worklist_priority_order() {
        let mut list = Worklist::with_order(XRef::priority_order);
        list.enqueue(xref(1, 0x10, XRefType::ConditionalJump));
        list.enqueue(xref(2, 0x20, XRefType::NearIndexedJump));
        list.enqueue(xref(3, 0x30, XRefType::NearJump));
        list.enqueue(xref(4, 0x40, XRefType::ConditionalJump));
        list.enqueue(xref(5, 0x50, XRefType::NearJump));

        let sources: Vec<u16> = std::iter::from_fn(|| list.dequeue().ok())
            .filter_map(|x| x.source().map(|a| a.offset))
            .collect();
        assert_eq!(sources, vec![3, 5, 1, 4, 2]);
    }
}
