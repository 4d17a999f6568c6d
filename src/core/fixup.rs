//! Fix-up (relocation) records attached to image chunks.
//!
//! A fix-up describes an address-dependent field inside an image: where it
//! starts, how wide it is, whether it is patched relative to itself or to a
//! segment base, and the symbolic target it refers to. Object modules carry
//! these for every reference the assembler could not resolve on its own.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::address::Referent;
use crate::error::{DosflowError, Result};

/// The kind of field a fix-up patches, which determines its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixupLocation {
    /// Low byte of an offset
    LowByte,
    /// 16-bit offset
    Offset16,
    /// 16-bit segment base (selector)
    Base16,
    /// 32-bit far pointer (offset followed by selector)
    Pointer32,
}

impl FixupLocation {
    pub fn len(&self) -> usize {
        match self {
            FixupLocation::LowByte => 1,
            FixupLocation::Offset16 | FixupLocation::Base16 => 2,
            FixupLocation::Pointer32 => 4,
        }
    }
}

/// How the patched value relates to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixupMode {
    /// Value is the distance from the end of the field to the target
    SelfRelative,
    /// Value is the target's offset within its frame
    SegmentRelative,
}

/// Which frame a fix-up's offset is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameSpec {
    /// An explicit segment, group, external or physical frame
    Referent(Referent),
    /// The frame of the target itself
    Target,
}

/// A referent plus displacement, resolved only once module tables exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolicTarget {
    pub referent: Referent,
    pub displacement: u16,
}

impl SymbolicTarget {
    /// Create a target `displacement` bytes past `referent`
    pub fn new(referent: Referent, displacement: u16) -> Self {
        Self {
            referent,
            displacement,
        }
    }
}

impl fmt::Display for SymbolicTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.displacement == 0 {
            write!(f, "{}", self.referent)
        } else {
            write!(f, "{}+{:X}", self.referent, self.displacement)
        }
    }
}

/// A single fix-up record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fixup {
    /// Offset of the patched field within its image
    pub start: usize,
    pub location: FixupLocation,
    pub mode: FixupMode,
    pub target: SymbolicTarget,
    pub frame: Option<FrameSpec>,
}

impl Fixup {
    pub fn new(
        start: usize,
        location: FixupLocation,
        mode: FixupMode,
        target: SymbolicTarget,
    ) -> Self {
        Self {
            start,
            location,
            mode,
            target,
            frame: None,
        }
    }

    /// Express the patched offset in `frame`.
    pub fn with_frame(mut self, frame: FrameSpec) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn len(&self) -> usize {
        self.location.len()
    }

    /// Exclusive end offset of the patched field.
    pub fn end(&self) -> usize {
        self.start + self.len()
    }

    /// Check if the patched field touches any byte of `start..end`
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end()
    }
}

/// Fix-ups of one image, sorted by start offset and never overlapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixupList {
    fixups: Vec<Fixup>,
    sealed: bool,
}

impl FixupList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fix-up, keeping the list sorted.
    pub fn add(&mut self, fixup: Fixup) -> Result<()> {
        if self.sealed {
            return Err(DosflowError::FixupsSealed(format!(
                "fix-up at {:#x}",
                fixup.start
            )));
        }
        let index = self.fixups.partition_point(|f| f.start < fixup.start);
        if let Some(prev) = index.checked_sub(1).map(|i| &self.fixups[i]) {
            if prev.end() > fixup.start {
                return Err(DosflowError::OverlappingFixup {
                    start: fixup.start,
                    existing: prev.start,
                });
            }
        }
        if let Some(next) = self.fixups.get(index) {
            if next.start < fixup.end() {
                return Err(DosflowError::OverlappingFixup {
                    start: fixup.start,
                    existing: next.start,
                });
            }
        }
        self.fixups.insert(index, fixup);
        Ok(())
    }

    /// Freeze the list once loading has finished.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Check if loading has finished
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.fixups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fixup> {
        self.fixups.iter()
    }

    /// Fix-ups touching any byte of `start..end`.
    pub fn overlapping(&self, start: usize, end: usize) -> &[Fixup] {
        let lo = self.fixups.partition_point(|f| f.end() <= start);
        let hi = self.fixups.partition_point(|f| f.start < end);
        &self.fixups[lo..hi.max(lo)]
    }

    /// The fix-up starting exactly at `start`
    pub fn at(&self, start: usize) -> Option<&Fixup> {
        self.fixups
            .binary_search_by_key(&start, |f| f.start)
            .ok()
            .map(|i| &self.fixups[i])
    }
}
