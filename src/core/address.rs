//! Address types for 16-bit segmented code.
//!
//! Three levels of resolution are used throughout the engine:
//!
//! - a [`Referent`] is an addressable entity (segment, group, external symbol
//!   or physical frame) that other locations are defined relative to;
//! - a [`LogicalAddress`] is a referent plus a 16-bit displacement, which is
//!   how instructions and fix-ups name locations;
//! - a [`ResolvedAddress`] is a byte offset inside a specific image chunk and
//!   is the canonical key for every lookup.
//!
//! Several logical addresses may resolve to the same resolved address.
//! Resolution needs the module tables and lives in
//! [`crate::core::address_space::AddressSpace`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DosflowError, Result};

/// Identifier of an image chunk within an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub u32);

/// Identifier of a logical segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u32);

/// Identifier of a segment group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// Identifier of an external symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId(pub u32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img{}", self.0)
    }
}

/// An entity a logical address is defined relative to.
///
/// Referents compare by identity (tag and id), never by what they resolve to,
/// so comparing two addresses cannot trigger resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Referent {
    /// A logical segment
    Segment(SegmentId),
    /// A physical paragraph frame (real-mode segment value)
    Frame(u16),
    /// An external symbol, resolved through the public symbol table
    External(ExternalId),
    /// A segment group
    Group(GroupId),
}

impl fmt::Display for Referent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Referent::Segment(id) => write!(f, "seg{}", id.0),
            Referent::Frame(frame) => write!(f, "{:04X}", frame),
            Referent::External(id) => write!(f, "ext{}", id.0),
            Referent::Group(id) => write!(f, "grp{}", id.0),
        }
    }
}

/// A referent plus a 16-bit displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalAddress {
    pub referent: Referent,
    pub offset: u16,
}

impl LogicalAddress {
    /// Create a logical address
    pub fn new(referent: Referent, offset: u16) -> Self {
        Self { referent, offset }
    }

    /// Move the displacement by `delta`.
    ///
    /// With `wrapping` the displacement wraps modulo 65536. Without it,
    /// leaving `0..=0xFFFF` fails with [`DosflowError::AddressWrapped`].
    pub fn increment(&self, delta: i32, wrapping: bool) -> Result<Self> {
        let target = i32::from(self.offset) + delta;
        let offset = if wrapping {
            target.rem_euclid(0x1_0000) as u16
        } else {
            u16::try_from(target).map_err(|_| DosflowError::AddressWrapped {
                offset: self.offset,
                delta,
            })?
        };
        Ok(Self::new(self.referent, offset))
    }

    /// Add `delta`, wrapping within the 16-bit offset range.
    pub fn wrapping_add(&self, delta: u16) -> Self {
        Self::new(self.referent, self.offset.wrapping_add(delta))
    }

    /// Add `delta`, failing with `AddressWrapped` past 0xFFFF.
    pub fn checked_add(&self, delta: u16) -> Result<Self> {
        self.increment(i32::from(delta), false)
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:04X}", self.referent, self.offset)
    }
}

/// A byte offset inside an image chunk.
///
/// This is the canonical key for block, procedure and attribute lookups.
/// Unresolvable locations are represented as `None` by the resolving
/// functions rather than by a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub image: ImageId,
    pub offset: usize,
}

impl ResolvedAddress {
    pub fn new(image: ImageId, offset: usize) -> Self {
        Self { image, offset }
    }

    /// The address `delta` bytes further into the image.
    pub fn add(&self, delta: usize) -> Self {
        Self::new(self.image, self.offset + delta)
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:05X}", self.image, self.offset)
    }
}
