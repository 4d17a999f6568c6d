//! The address space of a program or library under analysis.
//!
//! An [`AddressSpace`] owns the loaded image chunks and the module tables
//! (segments, groups, external and public symbols) and is the only place
//! where referents are turned into resolved addresses.

use std::collections::HashMap;
use tracing::warn;

use crate::core::address::{
    ExternalId, GroupId, ImageId, LogicalAddress, Referent, ResolvedAddress, SegmentId,
};
use crate::core::image::ImageChunk;
use crate::core::segment::{ExternalSymbol, Group, PublicSymbol, Segment};
use crate::error::{DosflowError, Result};

/// Where physical frames live: the image loaded at `load_segment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBase {
    pub image: ImageId,
    pub load_segment: u16,
}

#[derive(Debug, Clone, Default)]
pub struct AddressSpace {
    images: Vec<ImageChunk>,
    segments: Vec<Segment>,
    groups: Vec<Group>,
    externals: Vec<ExternalSymbol>,
    publics: Vec<PublicSymbol>,
    public_index: HashMap<String, usize>,
    frame_base: Option<FrameBase>,
}

impl AddressSpace {
    /// Create an empty address space
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image and return its id.
    pub fn add_image(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> ImageId {
        let id = ImageId(self.images.len() as u32);
        self.images.push(ImageChunk::new(id, name, bytes));
        id
    }

    /// Get an image by id
    pub fn image(&self, id: ImageId) -> Option<&ImageChunk> {
        self.images.get(id.0 as usize)
    }

    /// Get an image by id for attribute and fix-up updates
    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut ImageChunk> {
        self.images.get_mut(id.0 as usize)
    }

    pub fn images(&self) -> &[ImageChunk] {
        &self.images
    }

    /// Define a segment covering `start..start + length` of `image`.
    pub fn add_segment(
        &mut self,
        name: impl Into<String>,
        class: impl Into<String>,
        image: ImageId,
        start: usize,
        length: usize,
    ) -> Result<SegmentId> {
        let len = self
            .image(image)
            .map(|i| i.len())
            .ok_or(DosflowError::UnknownImage(image.0))?;
        if start > len {
            return Err(DosflowError::InvalidRange {
                start,
                end: start + length,
                len,
            });
        }
        let id = SegmentId(self.segments.len() as u32);
        self.segments.push(Segment {
            id,
            name: name.into(),
            class: class.into(),
            image,
            start,
            length,
        });
        Ok(id)
    }

    /// Get a segment by id
    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0 as usize)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Define a group of existing segments.
    pub fn add_group(
        &mut self,
        name: impl Into<String>,
        segments: Vec<SegmentId>,
    ) -> Result<GroupId> {
        if let Some(missing) = segments.iter().find(|s| self.segment(**s).is_none()) {
            return Err(DosflowError::UnknownSegment(missing.0));
        }
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(Group {
            id,
            name: name.into(),
            segments,
        });
        Ok(id)
    }

    /// Get a group by id
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0 as usize)
    }

    /// Declare an external symbol; it resolves through a public of the same name.
    pub fn add_external(&mut self, name: impl Into<String>) -> ExternalId {
        let id = ExternalId(self.externals.len() as u32);
        self.externals.push(ExternalSymbol {
            id,
            name: name.into(),
        });
        id
    }

    /// Get an external symbol by id
    pub fn external(&self, id: ExternalId) -> Option<&ExternalSymbol> {
        self.externals.get(id.0 as usize)
    }

    /// Define a public symbol. Names must be unique.
    pub fn add_public(&mut self, name: impl Into<String>, address: LogicalAddress) -> Result<()> {
        let name = name.into();
        if self.public_index.contains_key(&name) {
            return Err(DosflowError::DuplicateSymbol(name));
        }
        self.public_index.insert(name.clone(), self.publics.len());
        self.publics.push(PublicSymbol { name, address });
        Ok(())
    }

    /// Look up a public symbol by name
    pub fn public(&self, name: &str) -> Option<&PublicSymbol> {
        self.public_index.get(name).map(|&i| &self.publics[i])
    }

    pub fn publics(&self) -> &[PublicSymbol] {
        &self.publics
    }

    /// Physical frames resolve against the image loaded at `load_segment`.
    pub fn set_frame_base(&mut self, image: ImageId, load_segment: u16) -> Result<()> {
        if self.image(image).is_none() {
            return Err(DosflowError::UnknownImage(image.0));
        }
        self.frame_base = Some(FrameBase {
            image,
            load_segment,
        });
        Ok(())
    }

    /// Resolve a referent to the address of its displacement zero.
    pub fn resolve_referent(&self, referent: &Referent) -> Option<ResolvedAddress> {
        let mut visiting = Vec::new();
        self.resolve_guarded(referent, &mut visiting)
    }

    /// Resolve a logical address; `None` if its referent is unresolvable.
    pub fn resolve(&self, address: &LogicalAddress) -> Option<ResolvedAddress> {
        self.resolve_referent(&address.referent)
            .map(|base| base.add(usize::from(address.offset)))
    }

    fn resolve_guarded(
        &self,
        referent: &Referent,
        visiting: &mut Vec<Referent>,
    ) -> Option<ResolvedAddress> {
        if visiting.contains(referent) {
            warn!(referent = %referent, "cyclic referent resolution");
            return None;
        }
        visiting.push(*referent);
        let resolved = match referent {
            Referent::Segment(id) => self
                .segment(*id)
                .map(|s| ResolvedAddress::new(s.image, s.start)),
            Referent::Group(id) => self.group(*id).and_then(|g| {
                g.segments
                    .iter()
                    .filter_map(|s| self.resolve_guarded(&Referent::Segment(*s), visiting))
                    .min()
            }),
            Referent::Frame(frame) => self.frame_base.and_then(|base| {
                let linear = usize::from(*frame) * 16;
                linear
                    .checked_sub(usize::from(base.load_segment) * 16)
                    .map(|offset| ResolvedAddress::new(base.image, offset))
            }),
            Referent::External(id) => self
                .external(*id)
                .and_then(|ext| self.public(&ext.name))
                .and_then(|public| {
                    let address = public.address;
                    self.resolve_guarded(&address.referent, visiting)
                        .map(|base| base.add(usize::from(address.offset)))
                }),
        };
        visiting.pop();
        resolved
    }

    /// Human-readable label of a referent, using table names where known.
    pub fn label(&self, referent: &Referent) -> String {
        match referent {
            Referent::Segment(id) => self.segment(*id).map(|s| s.name.clone()),
            Referent::Group(id) => self.group(*id).map(|g| g.name.clone()),
            Referent::External(id) => self.external(*id).map(|e| e.name.clone()),
            Referent::Frame(_) => None,
        }
        .unwrap_or_else(|| referent.to_string())
    }

    /// Format an address as `label:offset`.
    pub fn display(&self, address: &LogicalAddress) -> String {
        format!("{}:{:04X}", self.label(&address.referent), address.offset)
    }

    /// Name of a public symbol resolving to `target`, if any.
    pub fn public_at(&self, target: ResolvedAddress) -> Option<&PublicSymbol> {
        self.publics
            .iter()
            .find(|p| self.resolve(&p.address) == Some(target))
    }

    /// The segment of `image` whose range contains `offset`.
    pub fn segment_containing(&self, image: ImageId, offset: usize) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.image == image && s.range().contains(&offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> (AddressSpace, ImageId, SegmentId, SegmentId) {
        let mut space = AddressSpace::new();
        let image = space.add_image("module", vec![0; 0x100]);
        let text = space.add_segment("_TEXT", "CODE", image, 0x00, 0x40).unwrap();
        let data = space.add_segment("_DATA", "DATA", image, 0x40, 0x40).unwrap();
        (space, image, text, data)
    }

    #[test]
    fn test_segment_resolution() {
        let (space, image, _, data) = space();
        let addr = LogicalAddress::new(Referent::Segment(data), 0x10);
        assert_eq!(space.resolve(&addr), Some(ResolvedAddress::new(image, 0x50)));
        assert_eq!(space.display(&addr), "_DATA:0010");
    }

    #[test]
    fn test_group_resolves_to_lowest_member() {
        let (mut space, image, text, data) = space();
        let dgroup = space.add_group("DGROUP", vec![data, text]).unwrap();
        let addr = LogicalAddress::new(Referent::Group(dgroup), 0x44);
        assert_eq!(space.resolve(&addr), Some(ResolvedAddress::new(image, 0x44)));
        assert!(space.add_group("BAD", vec![SegmentId(9)]).is_err());
    }

    #[test]
    fn test_frame_resolution() {
        let (mut space, image, _, _) = space();
        let frame = LogicalAddress::new(Referent::Frame(0x1002), 0x4);
        assert_eq!(space.resolve(&frame), None);
        space.set_frame_base(image, 0x1000).unwrap();
        assert_eq!(space.resolve(&frame), Some(ResolvedAddress::new(image, 0x24)));
        let below = LogicalAddress::new(Referent::Frame(0x0FFF), 0);
        assert_eq!(space.resolve(&below), None);
    }

    #[test]
    fn test_external_resolution() {
        let (mut space, image, text, _) = space();
        let ext = space.add_external("_main");
        let addr = LogicalAddress::new(Referent::External(ext), 2);
        assert_eq!(space.resolve(&addr), None);

        space
            .add_public("_main", LogicalAddress::new(Referent::Segment(text), 0x20))
            .unwrap();
        assert_eq!(space.resolve(&addr), Some(ResolvedAddress::new(image, 0x22)));
        assert_eq!(space.label(&Referent::External(ext)), "_main");
        assert_eq!(
            space.public_at(ResolvedAddress::new(image, 0x20)).map(|p| p.name.as_str()),
            Some("_main")
        );
    }

    #[test]
    fn test_cyclic_external_fails() {
        let mut space = AddressSpace::new();
        let a = space.add_external("a");
        let b = space.add_external("b");
        space
            .add_public("a", LogicalAddress::new(Referent::External(b), 0))
            .unwrap();
        space
            .add_public("b", LogicalAddress::new(Referent::External(a), 0))
            .unwrap();
        assert_eq!(space.resolve_referent(&Referent::External(a)), None);
        assert!(matches!(
            space.add_public("a", LogicalAddress::new(Referent::Frame(0), 0)),
            Err(DosflowError::DuplicateSymbol(_))
        ));
    }

    #[test]
    fn test_round_trip_resolution() {
        let (space, _, _, data) = space();
        let referent = Referent::Segment(data);
        let base = LogicalAddress::new(referent, 0);
        for d in 0..=u16::MAX {
            let stepped = base.increment(i32::from(d), true).unwrap();
            assert_eq!(
                space.resolve(&stepped),
                space.resolve(&LogicalAddress::new(referent, d))
            );
        }
    }
}
