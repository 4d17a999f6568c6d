//! Module tables: logical segments, groups and symbols.
//!
//! These are produced by the executable/object loaders and consumed by the
//! address space when resolving referents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::core::address::{ExternalId, GroupId, ImageId, LogicalAddress, SegmentId};

/// A logical segment mapped onto a range of an image chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub name: String,
    /// Class name from the object module (e.g. `CODE`, `DATA`)
    pub class: String,
    pub image: ImageId,
    /// Offset of the segment's first byte within its image
    pub start: usize,
    pub length: usize,
}

impl Segment {
    /// Image offset one past the segment
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// Check if the segment holds code, by class or `_TEXT` name
    pub fn is_code(&self) -> bool {
        self.class.eq_ignore_ascii_case("CODE") || self.name.to_ascii_uppercase().ends_with("_TEXT")
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {}+{:05X}..{:05X}",
            self.name,
            self.class,
            self.image,
            self.start,
            self.end()
        )
    }
}

/// A named collection of segments sharing one frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub segments: Vec<SegmentId>,
}

/// A symbol referenced by a module but defined elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalSymbol {
    pub id: ExternalId,
    pub name: String,
}

/// A symbol defined by a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicSymbol {
    pub name: String,
    pub address: LogicalAddress,
}
