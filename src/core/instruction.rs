//! Instruction and Operand types for decoded 16-bit instructions.
//!
//! An Instruction is what the flow analysis sees of a decoded instruction:
//! where it is, how long it is, how it transfers control, and its typed
//! operands. Operands patched by a fix-up carry that fix-up so symbolic
//! targets can be resolved before the flow analysis inspects them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::fixup::Fixup;

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    /// Execution continues with the next instruction
    Next,
    Call { far: bool },
    Jump { far: bool },
    ConditionalJump,
    /// RET/RETF/IRET
    Return,
    Halt,
    /// Software interrupt; execution continues after it
    Interrupt,
}

/// Which part of an operand a fix-up patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixupField {
    /// The whole operand (relative displacement, 16-bit offset, far pointer)
    Whole,
    /// The offset half of a far pointer
    Offset,
    /// The selector half of a far pointer
    Selector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperandFixup {
    pub field: FixupField,
    pub fixup: Fixup,
}

/// Types of operands that can appear in instructions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    /// Branch target relative to the next instruction, already applied
    Relative { target: u16 },
    /// Immediate far pointer `selector:offset`
    Pointer { selector: u16, offset: u16 },
    /// Memory reference `segment:[base + index + displacement]`
    Memory {
        segment: String,
        base: Option<String>,
        index: Option<String>,
        displacement: u16,
    },
    Register(String),
    Immediate { value: u64, size: u8 },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operand {
    pub kind: OperandKind,
    pub fixup: Option<OperandFixup>,
}

impl Operand {
    /// An operand without a fix-up
    pub fn new(kind: OperandKind) -> Self {
        Self { kind, fixup: None }
    }

    /// Attach the fix-up that patches `field`.
    pub fn with_fixup(mut self, field: FixupField, fixup: Fixup) -> Self {
        self.fixup = Some(OperandFixup { field, fixup });
        self
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperandKind::Relative { target } => write!(f, "{:04X}", target),
            OperandKind::Pointer { selector, offset } => write!(f, "{:04X}:{:04X}", selector, offset),
            OperandKind::Memory {
                segment,
                base,
                index,
                displacement,
            } => {
                write!(f, "{}:[", segment)?;
                let mut parts: Vec<String> = base.iter().chain(index.iter()).cloned().collect();
                if *displacement != 0 || parts.is_empty() {
                    parts.push(format!("{:04X}", displacement));
                }
                write!(f, "{}]", parts.join("+"))
            }
            OperandKind::Register(name) => write!(f, "{}", name),
            OperandKind::Immediate { value, .. } => write!(f, "{:X}", value),
            OperandKind::Other => write!(f, "?"),
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Offset of the first byte within its image
    pub offset: usize,
    /// Instruction pointer (displacement within its segment)
    pub ip: u16,
    pub length: usize,
    pub mnemonic: String,
    /// Formatted text, e.g. `jmp word ptr cs:[bx+5]`
    pub text: String,
    pub flow: FlowKind,
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Image offset one past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// IP of the following instruction; `None` past the 16-bit range.
    pub fn next_ip(&self) -> Option<u16> {
        u16::try_from(usize::from(self.ip) + self.length).ok()
    }

    /// The branch or call operand, if any
    pub fn first_operand(&self) -> Option<&Operand> {
        self.operands.first()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}: {}", self.ip, self.text)
    }
}
