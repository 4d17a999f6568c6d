//! Segment layout validation.

use tracing::debug;

use crate::core::address::{LogicalAddress, Referent};
use crate::core::address_space::AddressSpace;
use crate::core::diagnostics::{ErrorCode, ErrorList};
use crate::core::segment::Segment;

/// Report every segment that starts before the end of an earlier one in the
/// same image. Returns the number of overlaps found.
pub fn check_segment_overlaps(space: &AddressSpace, errors: &mut ErrorList) -> usize {
    let mut segments: Vec<&Segment> = space.segments().iter().collect();
    segments.sort_by_key(|s| (s.image, s.start, s.id));

    let mut found = 0;
    let mut reach: Option<&Segment> = None;
    for segment in segments {
        match reach {
            Some(prev) if prev.image == segment.image && segment.start < prev.end() => {
                debug!(segment = %segment.name, previous = %prev.name, "segment overlap");
                errors.push(
                    Some(LogicalAddress::new(Referent::Segment(segment.id), 0)),
                    ErrorCode::SegmentOverlap,
                    format!(
                        "segment {} [{:05X}..{:05X}) overlaps {} [{:05X}..{:05X})",
                        segment.name,
                        segment.start,
                        segment.end(),
                        prev.name,
                        prev.start,
                        prev.end()
                    ),
                );
                found += 1;
                if segment.end() > prev.end() {
                    reach = Some(segment);
                }
            }
            _ => reach = Some(segment),
        }
    }
    found
}
