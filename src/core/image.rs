//! Image chunks: loaded bytes plus per-byte analysis attributes.
//!
//! The bytes of a chunk never change once loaded. Attributes only move
//! forward, from unknown to code or data, and only through
//! [`ImageChunk::mark_code`] and [`ImageChunk::mark_data`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::address::ImageId;
use crate::core::fixup::{Fixup, FixupList};
use crate::error::{DosflowError, Result};

bitflags! {
    /// What the analysis has learned about a single byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ByteAttributes: u8 {
        const CODE = 0x01;
        const DATA = 0x02;
        /// Alignment filler; never executed
        const PADDING = 0x04;
        /// First byte of an instruction or data item
        const LEAD = 0x08;
    }
}

impl ByteAttributes {
    /// Check if nothing is known about the byte
    pub fn is_unknown(&self) -> bool {
        !self.intersects(Self::CODE | Self::DATA | Self::PADDING)
    }

    pub fn is_code(&self) -> bool {
        self.contains(Self::CODE)
    }

    /// Check if the byte is data or padding
    pub fn is_data(&self) -> bool {
        self.intersects(Self::DATA | Self::PADDING)
    }

    /// Check if the byte starts an instruction or data item
    pub fn is_lead(&self) -> bool {
        self.contains(Self::LEAD)
    }
}

/// An owned byte buffer with attributes and fix-ups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageChunk {
    id: ImageId,
    name: String,
    bytes: Vec<u8>,
    attributes: Vec<ByteAttributes>,
    fixups: FixupList,
}

impl ImageChunk {
    /// Create an image with every byte unattributed
    pub fn new(id: ImageId, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let attributes = vec![ByteAttributes::empty(); bytes.len()];
        Self {
            id,
            name: name.into(),
            bytes,
            attributes,
            fixups: FixupList::new(),
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check if `offset` is inside the image
    pub fn contains(&self, offset: usize) -> bool {
        offset < self.bytes.len()
    }

    /// Read a little-endian word at `offset`
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let b = self.bytes.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Attributes at `offset`; bytes outside the image read as unknown.
    pub fn attributes(&self, offset: usize) -> ByteAttributes {
        self.attributes.get(offset).copied().unwrap_or_default()
    }

    /// True if every byte of `start..end` is inside the image and unknown.
    pub fn is_unattributed(&self, start: usize, end: usize) -> bool {
        end <= self.attributes.len()
            && start <= end
            && self.attributes[start..end].iter().all(|a| a.is_unknown())
    }

    /// Mark an instruction: the first byte becomes a lead byte.
    pub fn mark_code(&mut self, start: usize, len: usize) -> Result<()> {
        self.mark(start, len, ByteAttributes::CODE)
    }

    /// Mark a data item: the first byte becomes a lead byte.
    pub fn mark_data(&mut self, start: usize, len: usize) -> Result<()> {
        self.mark(start, len, ByteAttributes::DATA)
    }

    /// Mark alignment padding between code or data items.
    pub fn mark_padding(&mut self, start: usize, len: usize) -> Result<()> {
        self.mark(start, len, ByteAttributes::PADDING)
    }

    fn mark(&mut self, start: usize, len: usize, kind: ByteAttributes) -> Result<()> {
        let end = start.saturating_add(len);
        if len == 0 || end > self.bytes.len() {
            return Err(DosflowError::InvalidRange {
                start,
                end,
                len: self.bytes.len(),
            });
        }
        if let Some(taken) = (start..end).find(|&i| !self.attributes[i].is_unknown()) {
            return Err(DosflowError::AlreadyAttributed(taken));
        }
        self.attributes[start] = kind | ByteAttributes::LEAD;
        for attr in &mut self.attributes[start + 1..end] {
            *attr = kind;
        }
        Ok(())
    }

    pub fn fixups(&self) -> &FixupList {
        &self.fixups
    }

    /// Record a fix-up; fails on overlap, out-of-range or after sealing.
    pub fn add_fixup(&mut self, fixup: Fixup) -> Result<()> {
        if fixup.end() > self.bytes.len() {
            return Err(DosflowError::InvalidRange {
                start: fixup.start,
                end: fixup.end(),
                len: self.bytes.len(),
            });
        }
        self.fixups.add(fixup).map_err(|e| match e {
            DosflowError::FixupsSealed(_) => DosflowError::FixupsSealed(self.name.clone()),
            other => other,
        })
    }

    /// Freeze the fix-up list once loading has finished.
    pub fn seal_fixups(&mut self) {
        self.fixups.seal();
    }
}
