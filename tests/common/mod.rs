//! Common test utilities and helpers.
//!
//! Builders for small in-memory programs: one image, a `_TEXT` segment
//! covering it, and helpers to name addresses within it.

#![allow(dead_code)]

use dosflow::config::AnalysisConfig;
use dosflow::core::address::{ImageId, SegmentId};
use dosflow::core::fixup::Fixup;
use dosflow::{AddressSpace, Analyzer, EntryPoint, LogicalAddress, Referent, ResolvedAddress};

/// A single-image program under construction.
pub struct Program {
    pub space: AddressSpace,
    pub image: ImageId,
    pub text: SegmentId,
}

impl Program {
    /// One image holding `bytes`, with a `_TEXT` segment covering all of it.
    pub fn new(bytes: &[u8]) -> Self {
        let mut space = AddressSpace::new();
        let image = space.add_image("test.obj", bytes.to_vec());
        let text = space
            .add_segment("_TEXT", "CODE", image, 0, bytes.len())
            .expect("segment");
        Self { space, image, text }
    }

    /// Like [`Program::new`] but `_TEXT` only covers `text_len` bytes.
    pub fn with_text_len(bytes: &[u8], text_len: usize) -> Self {
        let mut space = AddressSpace::new();
        let image = space.add_image("test.obj", bytes.to_vec());
        let text = space
            .add_segment("_TEXT", "CODE", image, 0, text_len)
            .expect("segment");
        Self { space, image, text }
    }

    pub fn at(&self, offset: u16) -> LogicalAddress {
        LogicalAddress::new(Referent::Segment(self.text), offset)
    }

    pub fn resolved(&self, offset: usize) -> ResolvedAddress {
        ResolvedAddress::new(self.image, offset)
    }

    pub fn mark_data(&mut self, start: usize, len: usize) {
        self.space
            .image_mut(self.image)
            .expect("image")
            .mark_data(start, len)
            .expect("mark data");
    }

    pub fn fixup(&mut self, fixup: Fixup) {
        self.space
            .image_mut(self.image)
            .expect("image")
            .add_fixup(fixup)
            .expect("fixup");
    }

    /// Run the full analysis from near entry points at `entries`.
    pub fn analyze(self, entries: &[u16]) -> Analyzer {
        self.analyze_with(entries, AnalysisConfig::default())
    }

    pub fn analyze_with(self, entries: &[u16], config: AnalysisConfig) -> Analyzer {
        let entries: Vec<EntryPoint> = entries
            .iter()
            .map(|&offset| EntryPoint::new(self.at(offset)))
            .collect();
        let mut analyzer = Analyzer::new(self.space).with_config(config);
        analyzer.analyze(&entries).expect("analysis");
        analyzer
    }
}

/// Block ranges of the analyzer's single image, in address order.
pub fn block_ranges(analyzer: &Analyzer) -> Vec<(usize, usize)> {
    analyzer.blocks().iter().map(|b| (b.start, b.end)).collect()
}
