//! Indexed near-jump table heuristic.
//!
//! Compilers emit `jmp word ptr cs:[bx+table]` with the table placed right
//! after the jump. The table length is unknown, so slots are consumed one at
//! a time, each only after the targets of earlier slots have been analyzed,
//! and the table is considered finished at the first slot that does not look
//! like a code pointer.

use tracing::trace;

use crate::analysis::fixup_resolver::resolve_fixup;
use crate::core::address::{LogicalAddress, ResolvedAddress};
use crate::core::address_space::AddressSpace;
use crate::core::instruction::{FlowKind, Instruction, OperandKind};
use crate::core::reference::{XRef, XRefType};

/// Size of one table slot.
pub const SLOT_SIZE: usize = 2;

/// Why a table was considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEnd {
    /// The slot does not resolve
    UnresolvedSlot,
    /// The slot lies in a different segment than the jump
    ForeignSegment,
    /// The slot bytes are outside the image or already attributed
    SlotAttributed,
    /// The slot value points outside the image
    TargetOutOfImage,
    /// The slot value points into data or into the middle of an instruction
    TargetNotCode,
    /// Not an unresolved indexed jump entry
    NotAnIndexedJump,
}

/// A consumed table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSlot {
    /// The indexed jump, now with the slot value as target
    pub xref: XRef,
    /// Entry for the following slot, if its address does not wrap
    pub next: Option<XRef>,
    pub slot: ResolvedAddress,
    pub location: LogicalAddress,
}

/// Address of the first slot if `instr` is a near jump through a table that
/// immediately follows it.
pub fn table_start(
    instr: &Instruction,
    source: &LogicalAddress,
    space: &AddressSpace,
) -> Option<LogicalAddress> {
    if instr.flow != (FlowKind::Jump { far: false }) {
        return None;
    }
    let operand = instr.first_operand()?;
    let OperandKind::Memory {
        segment,
        base,
        index,
        displacement,
    } = &operand.kind
    else {
        return None;
    };
    if segment != "cs" || base.is_none() || index.is_some() {
        return None;
    }
    let following = LogicalAddress::new(source.referent, instr.next_ip()?);
    match &operand.fixup {
        Some(patch) => {
            let slot = resolve_fixup(&patch.fixup, space)?;
            let same = space.resolve(&slot).is_some()
                && space.resolve(&slot) == space.resolve(&following);
            same.then_some(following)
        }
        None => (*displacement == following.offset).then_some(following),
    }
}

/// Consume the slot named by an unresolved indexed jump entry.
///
/// On success the slot bytes are marked as data.
pub fn read_slot(xref: &XRef, space: &mut AddressSpace) -> Result<TableSlot, TableEnd> {
    let (Some(source), Some(location), None) =
        (xref.source().copied(), xref.data_location().copied(), xref.target())
    else {
        return Err(TableEnd::NotAnIndexedJump);
    };
    if xref.kind() != XRefType::NearIndexedJump {
        return Err(TableEnd::NotAnIndexedJump);
    }

    let slot = space.resolve(&location).ok_or(TableEnd::UnresolvedSlot)?;
    if let Some(jump) = space.resolve(&source) {
        let owner = space.segment_containing(jump.image, jump.offset).map(|s| s.id);
        let slot_owner = space.segment_containing(slot.image, slot.offset).map(|s| s.id);
        if owner.is_some() && owner != slot_owner {
            return Err(TableEnd::ForeignSegment);
        }
    }

    let value = {
        let image = space.image(slot.image).ok_or(TableEnd::SlotAttributed)?;
        if !image.is_unattributed(slot.offset, slot.offset + SLOT_SIZE) {
            return Err(TableEnd::SlotAttributed);
        }
        image.read_u16(slot.offset).ok_or(TableEnd::SlotAttributed)?
    };

    let target = LogicalAddress::new(source.referent, value);
    let resolved = space.resolve(&target).ok_or(TableEnd::TargetOutOfImage)?;
    {
        let image = space.image(resolved.image).ok_or(TableEnd::TargetOutOfImage)?;
        if !image.contains(resolved.offset) {
            return Err(TableEnd::TargetOutOfImage);
        }
        let attrs = image.attributes(resolved.offset);
        if !(attrs.is_unknown() || (attrs.is_code() && attrs.is_lead())) {
            return Err(TableEnd::TargetNotCode);
        }
    }

    space
        .image_mut(slot.image)
        .and_then(|image| image.mark_data(slot.offset, SLOT_SIZE).ok())
        .ok_or(TableEnd::SlotAttributed)?;
    trace!(slot = %location, target = %target, "jump table slot");

    let next = location
        .checked_add(SLOT_SIZE as u16)
        .ok()
        .map(|next| XRef::indexed(source, next));
    Ok(TableSlot {
        xref: xref.resolved(target),
        next,
        slot,
        location,
    })
}
