use iced_x86::{Code, ConstantOffsets, FlowControl, Mnemonic, OpKind, Register as IReg};

use crate::core::disassembler::{DecodeError, DecodeResult, Decoder};
use crate::core::image::ImageChunk;
use crate::core::instruction::{FixupField, FlowKind, Instruction, Operand, OperandKind};

const MAX_INSTRUCTION_LENGTH: usize = 15;

/// A byte range of the instruction that a fix-up may patch.
#[derive(Debug, Clone, Copy)]
struct Field {
    start: usize,
    len: usize,
    operand: usize,
    field: FixupField,
}

/// 16-bit x86 decoder on top of iced-x86.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcedDecoder;

impl IcedDecoder {
    /// Create a 16-bit decoder
    pub fn new() -> Self {
        Self
    }

    fn register_name(reg: IReg) -> Option<String> {
        if reg == IReg::None {
            None
        } else {
            Some(format!("{:?}", reg).to_ascii_lowercase())
        }
    }

    fn iced_operands(instr: &iced_x86::Instruction) -> Vec<Operand> {
        let mut out = Vec::new();
        for i in 0..instr.op_count() {
            let kind = match instr.op_kind(i) {
                OpKind::Register => OperandKind::Register(
                    Self::register_name(instr.op_register(i)).unwrap_or_default(),
                ),
                OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                    OperandKind::Relative {
                        target: instr.near_branch_target() as u16,
                    }
                }
                OpKind::FarBranch16 => OperandKind::Pointer {
                    selector: instr.far_branch_selector(),
                    offset: instr.far_branch16(),
                },
                OpKind::FarBranch32 => OperandKind::Pointer {
                    selector: instr.far_branch_selector(),
                    offset: instr.far_branch32() as u16,
                },
                OpKind::Memory => OperandKind::Memory {
                    segment: Self::register_name(instr.memory_segment()).unwrap_or_default(),
                    base: Self::register_name(instr.memory_base()),
                    index: Self::register_name(instr.memory_index()),
                    displacement: instr.memory_displacement32() as u16,
                },
                kind @ (OpKind::Immediate8
                | OpKind::Immediate8_2nd
                | OpKind::Immediate16
                | OpKind::Immediate32
                | OpKind::Immediate64
                | OpKind::Immediate8to16
                | OpKind::Immediate8to32
                | OpKind::Immediate8to64
                | OpKind::Immediate32to64) => OperandKind::Immediate {
                    value: instr.immediate(i),
                    size: match kind {
                        OpKind::Immediate8 | OpKind::Immediate8_2nd => 1,
                        OpKind::Immediate16 | OpKind::Immediate8to16 => 2,
                        OpKind::Immediate32 | OpKind::Immediate8to32 => 4,
                        _ => 8,
                    },
                },
                _ => OperandKind::Other,
            };
            out.push(Operand::new(kind));
        }
        out
    }

    /// Constant fields of the instruction at `offset`, per operand.
    fn fields(instr: &iced_x86::Instruction, offsets: &ConstantOffsets, offset: usize) -> Vec<Field> {
        let mut out = Vec::new();
        let imm = (
            offset + offsets.immediate_offset(),
            offsets.immediate_size(),
        );
        let imm2 = (
            offset + offsets.immediate_offset2(),
            offsets.immediate_size2(),
        );
        let mut push = |(start, len): (usize, usize), operand: usize, field: FixupField| {
            if len > 0 {
                out.push(Field {
                    start,
                    len,
                    operand,
                    field,
                });
            }
        };
        for i in 0..instr.op_count() {
            let operand = i as usize;
            match instr.op_kind(i) {
                OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
                    if offsets.has_immediate() =>
                {
                    push(imm, operand, FixupField::Whole);
                }
                OpKind::FarBranch16 | OpKind::FarBranch32
                    if offsets.has_immediate() && offsets.has_immediate2() =>
                {
                    push((imm.0, imm.1 + imm2.1), operand, FixupField::Whole);
                    push(imm, operand, FixupField::Offset);
                    push(imm2, operand, FixupField::Selector);
                }
                OpKind::Memory if offsets.has_displacement() => {
                    let displacement = (
                        offset + offsets.displacement_offset(),
                        offsets.displacement_size(),
                    );
                    push(displacement, operand, FixupField::Whole);
                }
                OpKind::Immediate8_2nd if offsets.has_immediate2() => {
                    push(imm2, operand, FixupField::Whole);
                }
                OpKind::Immediate8
                | OpKind::Immediate16
                | OpKind::Immediate32
                | OpKind::Immediate64
                | OpKind::Immediate8to16
                | OpKind::Immediate8to32
                | OpKind::Immediate8to64
                | OpKind::Immediate32to64
                    if offsets.has_immediate() =>
                {
                    push(imm, operand, FixupField::Whole);
                }
                _ => {}
            }
        }
        out
    }

    fn flow_kind(instr: &iced_x86::Instruction) -> FlowKind {
        let far_operand = matches!(instr.op0_kind(), OpKind::FarBranch16 | OpKind::FarBranch32);
        let far_memory = matches!(
            instr.code(),
            Code::Jmp_m1616 | Code::Jmp_m1632 | Code::Call_m1616 | Code::Call_m1632
        );
        if instr.mnemonic() == Mnemonic::Hlt {
            return FlowKind::Halt;
        }
        match instr.flow_control() {
            FlowControl::Return => FlowKind::Return,
            FlowControl::UnconditionalBranch => FlowKind::Jump { far: far_operand },
            FlowControl::IndirectBranch => FlowKind::Jump { far: far_memory },
            FlowControl::ConditionalBranch => FlowKind::ConditionalJump,
            FlowControl::Call => FlowKind::Call { far: far_operand },
            FlowControl::IndirectCall => FlowKind::Call { far: far_memory },
            FlowControl::Interrupt => FlowKind::Interrupt,
            FlowControl::Exception => FlowKind::Halt,
            _ => FlowKind::Next,
        }
    }
}

impl Decoder for IcedDecoder {
    fn decode(&self, image: &ImageChunk, offset: usize, ip: u16) -> DecodeResult<Instruction> {
        use iced_x86::{DecoderError, DecoderOptions, Formatter, IntelFormatter};

        let bytes = image
            .bytes()
            .get(offset..)
            .filter(|b| !b.is_empty())
            .ok_or(DecodeError::InsufficientBytes { offset })?;
        let window = &bytes[..bytes.len().min(MAX_INSTRUCTION_LENGTH)];
        let mut decoder = iced_x86::Decoder::with_ip(16, window, u64::from(ip), DecoderOptions::NONE);

        let instr = decoder.decode();
        if instr.is_invalid() {
            return Err(match decoder.last_error() {
                DecoderError::NoMoreBytes => DecodeError::InsufficientBytes { offset },
                _ => DecodeError::InvalidInstruction { offset },
            });
        }
        let length = instr.len();
        let mut operands = Self::iced_operands(&instr);

        let fields = Self::fields(&instr, &decoder.get_constant_offsets(&instr), offset);
        for fixup in image.fixups().overlapping(offset, offset + length) {
            let field = fields
                .iter()
                .find(|f| f.start == fixup.start && f.len == fixup.len())
                .ok_or(DecodeError::BrokenFixup {
                    offset,
                    fixup_start: fixup.start,
                })?;
            let Some(operand) = operands.get_mut(field.operand) else {
                continue;
            };
            // A selector fix-up never displaces the fix-up of the offset.
            let keep_existing = matches!(
                (&operand.fixup, field.field),
                (Some(_), FixupField::Selector)
            );
            if !keep_existing {
                *operand = Operand::new(operand.kind.clone()).with_fixup(field.field, *fixup);
            }
        }

        let mut formatter = IntelFormatter::new();
        let mut text = String::new();
        formatter.format(&instr, &mut text);

        Ok(Instruction {
            offset,
            ip,
            length,
            mnemonic: format!("{:?}", instr.mnemonic()).to_ascii_lowercase(),
            text,
            flow: Self::flow_kind(&instr),
            operands,
        })
    }

    fn max_instruction_length(&self) -> usize {
        MAX_INSTRUCTION_LENGTH
    }

    fn name(&self) -> &str {
        "iced-x86"
    }
}
