//! BasicBlock type and the per-image block index.
//!
//! A basic block is a half-open byte range of an image chunk made of whole
//! instructions. Blocks never overlap; splitting replaces a block by two new
//! ones rather than mutating it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::core::address::{ImageId, ResolvedAddress};
use crate::core::image::ImageChunk;
use crate::error::{DosflowError, Result};

/// How control leaves a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockExit {
    /// Ends in a return, halt or unconditional jump
    Terminated,
    /// Ends in a conditional jump; the not-taken path starts at its end
    Conditional,
    /// Runs straight into the block that starts at its end
    FallThrough,
    /// Analysis stopped on an error before the block was complete
    Incomplete,
}

/// A straight-line code region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasicBlock {
    pub image: ImageId,
    /// Offset of the first instruction
    pub start: usize,
    /// Offset one past the last instruction
    pub end: usize,
    pub exit: BlockExit,
}

impl BasicBlock {
    /// Create a block covering `start..end` of `image`
    pub fn new(image: ImageId, start: usize, end: usize, exit: BlockExit) -> Self {
        Self {
            image,
            start,
            end,
            exit,
        }
    }

    /// Resolved address of the first byte
    pub fn start_address(&self) -> ResolvedAddress {
        ResolvedAddress::new(self.image, self.start)
    }

    /// Resolved address one past the last byte
    pub fn end_address(&self) -> ResolvedAddress {
        ResolvedAddress::new(self.image, self.end)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Check if `address` falls inside the block
    pub fn contains(&self, address: ResolvedAddress) -> bool {
        address.image == self.image && self.start <= address.offset && address.offset < self.end
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:05X}..{:05X})", self.image, self.start, self.end)
    }
}

/// Non-overlapping blocks, indexed by start offset per image.
#[derive(Debug, Clone, Default)]
pub struct BasicBlockCollection {
    index: HashMap<ImageId, BTreeMap<usize, BasicBlock>>,
    count: usize,
}

impl BasicBlockCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// The block containing `address`, if any.
    pub fn find(&self, address: ResolvedAddress) -> Option<&BasicBlock> {
        self.index
            .get(&address.image)?
            .range(..=address.offset)
            .next_back()
            .map(|(_, block)| block)
            .filter(|block| block.contains(address))
    }

    /// The block starting exactly at `address`, if any.
    pub fn starting_at(&self, address: ResolvedAddress) -> Option<&BasicBlock> {
        self.index.get(&address.image)?.get(&address.offset)
    }

    /// Insert a block that overlaps no existing block.
    pub fn add(&mut self, block: BasicBlock) -> Result<()> {
        if block.is_empty() {
            return Err(DosflowError::InvalidRange {
                start: block.start,
                end: block.end,
                len: 0,
            });
        }
        let blocks = self.index.entry(block.image).or_default();
        if let Some(existing) = blocks.get(&block.start) {
            return Err(if *existing == block {
                DosflowError::BlockExists(block.to_string())
            } else {
                DosflowError::BlockOverlap {
                    block: block.to_string(),
                    existing: existing.to_string(),
                }
            });
        }
        let before = blocks.range(..block.start).next_back().map(|(_, b)| b);
        let after = blocks.range(block.start..).next().map(|(_, b)| b);
        let clash = before
            .filter(|b| b.end > block.start)
            .or(after.filter(|b| b.start < block.end));
        if let Some(existing) = clash {
            return Err(DosflowError::BlockOverlap {
                block: block.to_string(),
                existing: existing.to_string(),
            });
        }
        blocks.insert(block.start, block);
        self.count += 1;
        Ok(())
    }

    /// Replace `block` by `[start, cutoff)` and `[cutoff, end)`.
    ///
    /// `cutoff` must lie strictly inside the block and be a lead byte of
    /// `image`. The first half falls through into the second.
    pub fn split(
        &mut self,
        block: &BasicBlock,
        cutoff: usize,
        image: &ImageChunk,
    ) -> Result<(BasicBlock, BasicBlock)> {
        let invalid = || DosflowError::InvalidSplit {
            block: block.to_string(),
            cutoff,
        };
        if image.id() != block.image
            || cutoff <= block.start
            || cutoff >= block.end
            || !image.attributes(cutoff).is_lead()
        {
            return Err(invalid());
        }
        let blocks = self.index.get_mut(&block.image).ok_or_else(invalid)?;
        if blocks.get(&block.start) != Some(block) {
            return Err(invalid());
        }
        let first = BasicBlock::new(block.image, block.start, cutoff, BlockExit::FallThrough);
        let second = BasicBlock::new(block.image, cutoff, block.end, block.exit);
        blocks.insert(first.start, first);
        blocks.insert(second.start, second);
        self.count += 1;
        Ok((first, second))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Blocks of one image in address order.
    pub fn in_image(&self, image: ImageId) -> impl Iterator<Item = &BasicBlock> {
        self.index.get(&image).into_iter().flat_map(|b| b.values())
    }

    /// All blocks ordered by image, then address.
    pub fn iter(&self) -> impl Iterator<Item = &BasicBlock> {
        let mut images: Vec<&ImageId> = self.index.keys().collect();
        images.sort();
        images
            .into_iter()
            .flat_map(move |id| self.index[id].values())
    }
}
