//! Symbolic target resolution for fixed-up operands.
//!
//! Object code leaves the bytes of a relocated field meaningless until link
//! time; the fix-up record says what they stand for. Branch and call targets
//! patched by a fix-up are taken from the fix-up, not from the bytes.

use crate::core::address::{LogicalAddress, Referent};
use crate::core::address_space::AddressSpace;
use crate::core::fixup::{Fixup, FixupMode, FrameSpec, SymbolicTarget};
use crate::core::instruction::{FixupField, Instruction, OperandKind};

/// Externals chained through publics deeper than this are treated as cycles.
const MAX_EXTERNAL_CHAIN: usize = 16;

/// Resolve a symbolic target to a logical address.
///
/// Returns `None` when the referent does not resolve, which is expected for
/// symbols defined outside the modules under analysis. External referents
/// are replaced by the public symbol's own address.
pub fn resolve_symbolic_target(
    target: &SymbolicTarget,
    space: &AddressSpace,
) -> Option<LogicalAddress> {
    space.resolve_referent(&target.referent)?;
    let mut address = LogicalAddress::new(target.referent, target.displacement);
    for _ in 0..MAX_EXTERNAL_CHAIN {
        let Referent::External(id) = address.referent else {
            return Some(address);
        };
        let public = space.external(id).and_then(|ext| space.public(&ext.name))?;
        address = public.address.wrapping_add(address.offset);
    }
    None
}

/// Resolve the address a fix-up refers to, expressed in its frame if the
/// fix-up names one explicitly.
pub fn resolve_fixup(fixup: &Fixup, space: &AddressSpace) -> Option<LogicalAddress> {
    let target = resolve_symbolic_target(&fixup.target, space)?;
    let frame = match (fixup.mode, fixup.frame) {
        (FixupMode::SegmentRelative, Some(FrameSpec::Referent(frame))) => frame,
        (FixupMode::SegmentRelative, Some(FrameSpec::Target) | None) => return Some(target),
        (FixupMode::SelfRelative, _) => return Some(target),
    };
    if frame == target.referent {
        return Some(target);
    }
    let rebased = space.resolve(&target).zip(space.resolve_referent(&frame)).and_then(
        |(resolved, base)| {
            if resolved.image != base.image {
                return None;
            }
            let offset = resolved.offset.checked_sub(base.offset)?;
            u16::try_from(offset)
                .ok()
                .map(|offset| LogicalAddress::new(frame, offset))
        },
    );
    Some(rebased.unwrap_or(target))
}

/// Static target of a branch or call instruction.
///
/// `source` is the logical address of the instruction. Returns `None` for
/// register and memory operands and for fix-ups whose target does not
/// resolve.
pub fn branch_target(
    instr: &Instruction,
    source: &LogicalAddress,
    space: &AddressSpace,
) -> Option<LogicalAddress> {
    let operand = instr.first_operand()?;
    match (&operand.kind, &operand.fixup) {
        (OperandKind::Relative { .. }, Some(patch)) => resolve_fixup(&patch.fixup, space),
        (OperandKind::Relative { target }, None) => {
            Some(LogicalAddress::new(source.referent, *target))
        }
        (OperandKind::Pointer { offset, .. }, Some(patch)) => match patch.field {
            FixupField::Whole | FixupField::Offset => resolve_fixup(&patch.fixup, space),
            FixupField::Selector => {
                let referent = patch.fixup.target.referent;
                space.resolve_referent(&referent)?;
                Some(LogicalAddress::new(referent, *offset))
            }
        },
        (OperandKind::Pointer { selector, offset }, None) => {
            Some(LogicalAddress::new(Referent::Frame(*selector), *offset))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::{ImageId, ResolvedAddress, SegmentId};
    use crate::core::fixup::FixupLocation;
    use crate::core::instruction::{FlowKind, Operand};

    struct Fixture {
        space: AddressSpace,
        image: ImageId,
        text: SegmentId,
        lib: SegmentId,
    }

    fn fixture() -> Fixture {
        let mut space = AddressSpace::new();
        let image = space.add_image("module", vec![0x90; 0x40]);
        let text = space.add_segment("_TEXT", "CODE", image, 0x00, 0x20).unwrap();
        let lib = space.add_segment("LIB_TEXT", "CODE", image, 0x20, 0x20).unwrap();
        space
            .add_public("_helper", LogicalAddress::new(Referent::Segment(lib), 0x04))
            .unwrap();
        Fixture {
            space,
            image,
            text,
            lib,
        }
    }

    fn call(operand: Operand) -> Instruction {
        Instruction {
            offset: 0,
            ip: 0,
            length: 3,
            mnemonic: "call".into(),
            text: "call".into(),
            flow: FlowKind::Call { far: false },
            operands: vec![operand],
        }
    }

    #[test]
    fn test_external_follows_public() {
        let mut f = fixture();
        let helper = f.space.add_external("_helper");
        let missing = f.space.add_external("_missing");

        let target = SymbolicTarget::new(Referent::External(helper), 2);
        let resolved = resolve_symbolic_target(&target, &f.space).unwrap();
        assert_eq!(resolved, LogicalAddress::new(Referent::Segment(f.lib), 0x06));
        assert_eq!(
            f.space.resolve(&resolved),
            Some(ResolvedAddress::new(f.image, 0x26))
        );

        let unresolved = SymbolicTarget::new(Referent::External(missing), 0);
        assert!(resolve_symbolic_target(&unresolved, &f.space).is_none());
    }

    #[test]
    fn test_frame_rebasing() {
        let mut f = fixture();
        let dgroup = f.space.add_group("DGROUP", vec![f.text, f.lib]).unwrap();
        let space = &f.space;
        let fixup = Fixup::new(
            1,
            FixupLocation::Offset16,
            FixupMode::SegmentRelative,
            SymbolicTarget::new(Referent::Segment(f.lib), 0x04),
        )
        .with_frame(FrameSpec::Referent(Referent::Group(dgroup)));
        assert_eq!(
            resolve_fixup(&fixup, space),
            Some(LogicalAddress::new(Referent::Group(dgroup), 0x24))
        );

        // The target's own frame keeps the segment-relative offset.
        let own = fixup.with_frame(FrameSpec::Target);
        assert_eq!(
            resolve_fixup(&own, space),
            Some(LogicalAddress::new(Referent::Segment(f.lib), 0x04))
        );
    }

    #[test]
    fn test_branch_targets() {
        let f = fixture();
        let source = LogicalAddress::new(Referent::Segment(f.text), 0);

        let relative = call(Operand::new(OperandKind::Relative { target: 0x10 }));
        assert_eq!(
            branch_target(&relative, &source, &f.space),
            Some(LogicalAddress::new(Referent::Segment(f.text), 0x10))
        );

        let far = call(Operand::new(OperandKind::Pointer {
            selector: 0x1000,
            offset: 0x20,
        }));
        assert_eq!(
            branch_target(&far, &source, &f.space),
            Some(LogicalAddress::new(Referent::Frame(0x1000), 0x20))
        );

        let register = call(Operand::new(OperandKind::Register("ax".into())));
        assert_eq!(branch_target(&register, &source, &f.space), None);
    }

    #[test]
    fn test_fixed_up_relative_branch() {
        let f = fixture();
        let source = LogicalAddress::new(Referent::Segment(f.text), 0);
        let fixup = Fixup::new(
            1,
            FixupLocation::Offset16,
            FixupMode::SelfRelative,
            SymbolicTarget::new(Referent::Segment(f.lib), 0x04),
        );
        let instr = call(
            Operand::new(OperandKind::Relative { target: 3 }).with_fixup(FixupField::Whole, fixup),
        );
        assert_eq!(
            branch_target(&instr, &source, &f.space),
            Some(LogicalAddress::new(Referent::Segment(f.lib), 0x04))
        );
    }
}
