//! Instruction-level method bodies
//!
//! [`CodeBody`] is the editable form of a method's code: instructions are
//! addressed by index instead of byte offset, so inserting or replacing
//! instructions never invalidates jump targets or handler ranges. Bodies are
//! decoded from and encoded back to the byte form stored in a [`MethodDef`].
//!
//! [`MethodDef`]: crate::unit::MethodDef

use crate::constants::ConstantPool;
use crate::descriptor::{DescriptorError, MethodDescriptor};
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::opcode::{Opcode, OperandKind};
use crate::unit::Handler;
use thiserror::Error;

/// Errors raised while decoding, encoding or analyzing a body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    /// Byte-level decode failure
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Handler range or target does not land on instruction boundaries
    #[error("Invalid exception handler #{index}")]
    InvalidHandler {
        /// Position in the handler table
        index: usize,
    },

    /// Jump refers to an instruction that does not exist
    #[error("Jump at instruction {index} targets missing instruction {target}")]
    JumpOutOfRange {
        /// Jumping instruction
        index: usize,
        /// Target instruction index
        target: usize,
    },

    /// Instruction pops more values than the stack holds
    #[error("Stack underflow at instruction {0}")]
    StackUnderflow(usize),

    /// Two paths reach an instruction with different stack depths
    #[error("Stack depth mismatch at instruction {index}: {expected} vs {actual}")]
    StackMismatch {
        /// Merge point
        index: usize,
        /// Depth recorded first
        expected: u32,
        /// Conflicting depth
        actual: u32,
    },

    /// Stack depth does not fit the u16 header field
    #[error("Stack overflow at instruction {0}")]
    StackOverflow(usize),

    /// Execution can run past the last instruction
    #[error("Execution falls off the end of the body")]
    FallOffEnd,

    /// Operand refers to a missing constant pool entry
    #[error("Invalid constant reference {constant} at instruction {index}")]
    InvalidConstantRef {
        /// Referencing instruction
        index: usize,
        /// Constant pool index
        constant: u32,
    },

    /// Invoked member has an unparsable descriptor
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// Decoded instruction operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// i32 immediate
    I32(i32),
    /// f64 immediate
    F64(f64),
    /// Local slot
    Local(u16),
    /// String constant index
    Str(u32),
    /// Member-ref constant index
    Member(u32),
    /// Target instruction index
    Jump(usize),
}

/// A single instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Insn {
    /// Operation
    pub opcode: Opcode,
    /// Operand, matching `opcode.operand_kind()`
    pub operand: Operand,
}

impl Insn {
    /// Instruction without operand
    pub fn op(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: Operand::None,
        }
    }

    /// LOAD_LOCAL
    pub fn load(slot: u16) -> Self {
        Self {
            opcode: Opcode::LoadLocal,
            operand: Operand::Local(slot),
        }
    }

    /// STORE_LOCAL
    pub fn store(slot: u16) -> Self {
        Self {
            opcode: Opcode::StoreLocal,
            operand: Operand::Local(slot),
        }
    }

    /// CONST_STR
    pub fn const_str(index: u32) -> Self {
        Self {
            opcode: Opcode::ConstStr,
            operand: Operand::Str(index),
        }
    }

    /// Instruction referencing a member (invokes and field access)
    pub fn member(opcode: Opcode, index: u32) -> Self {
        Self {
            opcode,
            operand: Operand::Member(index),
        }
    }

    /// Jump to an instruction index
    pub fn jump(opcode: Opcode, target: usize) -> Self {
        Self {
            opcode,
            operand: Operand::Jump(target),
        }
    }

    /// Member-ref index, if the operand is one
    pub fn member_index(&self) -> Option<u32> {
        match self.operand {
            Operand::Member(index) => Some(index),
            _ => None,
        }
    }
}

/// Exception handler addressed by instruction index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsnHandler {
    /// First covered instruction
    pub start: usize,
    /// End of the covered range (exclusive, may equal the body length)
    pub end: usize,
    /// Handler entry instruction
    pub target: usize,
    /// Caught type; `None` catches everything
    pub catch_type: Option<String>,
}

/// Editable method body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeBody {
    /// Instructions in program order
    pub insns: Vec<Insn>,
    /// Exception handlers, innermost first
    pub handlers: Vec<InsnHandler>,
}

/// Sink used by [`CodeBody::rewrite`]
///
/// Jumps pushed with [`Emitter::emit`] address instructions of the original
/// body and are relocated. Jumps pushed with [`Emitter::emit_forward`] are
/// left for the caller to bind with [`CodeBody::bind_jumps`].
#[derive(Debug, Default)]
pub struct Emitter {
    out: Vec<Insn>,
    forward: Vec<usize>,
}

impl Emitter {
    /// Emit an instruction; jump operands refer to the original body
    pub fn emit(&mut self, insn: Insn) {
        self.out.push(insn);
    }

    /// Emit a jump whose target is bound after the rewrite
    pub fn emit_forward(&mut self, opcode: Opcode) {
        self.forward.push(self.out.len());
        self.out.push(Insn::jump(opcode, usize::MAX));
    }
}

impl CodeBody {
    /// Decode raw code bytes and their byte-offset handler table
    pub fn decode(code: &[u8], handlers: &[Handler]) -> Result<Self, CodeError> {
        let mut reader = BytecodeReader::new(code);
        // Byte offset -> instruction index, with one slot for the end offset
        let mut index_of = vec![None; code.len() + 1];
        let mut raw = Vec::new();

        while reader.has_more() {
            let offset = reader.position();
            index_of[offset] = Some(raw.len());
            let opcode = reader.read_opcode()?;
            let operand = match opcode.operand_kind() {
                OperandKind::None => RawOperand::Ready(Operand::None),
                OperandKind::I32 => RawOperand::Ready(Operand::I32(reader.read_i32()?)),
                OperandKind::F64 => RawOperand::Ready(Operand::F64(reader.read_f64()?)),
                OperandKind::Local => RawOperand::Ready(Operand::Local(reader.read_u16()?)),
                OperandKind::StringRef => RawOperand::Ready(Operand::Str(reader.read_u32()?)),
                OperandKind::MemberRef => RawOperand::Ready(Operand::Member(reader.read_u32()?)),
                OperandKind::Jump => {
                    // Encoded relative to the end of the jump
                    let relative = reader.read_i32()? as i64;
                    RawOperand::JumpTo(reader.position() as i64 + relative)
                }
            };
            raw.push((offset, opcode, operand));
        }
        index_of[code.len()] = Some(raw.len());

        let mut insns = Vec::with_capacity(raw.len());
        for (offset, opcode, operand) in raw {
            let operand = match operand {
                RawOperand::JumpTo(target) => {
                    let index = usize::try_from(target)
                        .ok()
                        .filter(|t| *t < code.len())
                        .and_then(|t| index_of[t])
                        .ok_or(DecodeError::InvalidJumpTarget { offset, target })?;
                    Operand::Jump(index)
                }
                RawOperand::Ready(operand) => operand,
            };
            insns.push(Insn { opcode, operand });
        }

        let lookup = |offset: u32, allow_end: bool| -> Option<usize> {
            let offset = offset as usize;
            if offset > code.len() || (offset == code.len() && !allow_end) {
                return None;
            }
            index_of[offset]
        };
        let mut decoded = Vec::with_capacity(handlers.len());
        for (index, handler) in handlers.iter().enumerate() {
            let invalid = CodeError::InvalidHandler { index };
            let start = lookup(handler.start, false).ok_or_else(|| invalid.clone())?;
            let end = lookup(handler.end, true).ok_or_else(|| invalid.clone())?;
            let target = lookup(handler.target, false).ok_or_else(|| invalid.clone())?;
            if start >= end {
                return Err(invalid);
            }
            decoded.push(InsnHandler {
                start,
                end,
                target,
                catch_type: handler.catch_type.clone(),
            });
        }

        Ok(Self {
            insns,
            handlers: decoded,
        })
    }

    /// Encode back to code bytes and a byte-offset handler table
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<Handler>), CodeError> {
        let mut offsets = Vec::with_capacity(self.insns.len() + 1);
        let mut offset = 0usize;
        for insn in &self.insns {
            offsets.push(offset);
            offset += insn.opcode.encoded_size();
        }
        offsets.push(offset);

        let mut writer = BytecodeWriter::with_capacity(offset);
        for (index, insn) in self.insns.iter().enumerate() {
            writer.emit_opcode(insn.opcode);
            match (insn.opcode.operand_kind(), insn.operand) {
                (OperandKind::None, _) => {}
                (OperandKind::I32, Operand::I32(value)) => writer.emit_i32(value),
                (OperandKind::F64, Operand::F64(value)) => writer.emit_f64(value),
                (OperandKind::Local, Operand::Local(slot)) => writer.emit_u16(slot),
                (OperandKind::StringRef, Operand::Str(constant))
                | (OperandKind::MemberRef, Operand::Member(constant)) => writer.emit_u32(constant),
                (OperandKind::Jump, Operand::Jump(target)) if target < self.insns.len() => {
                    let relative = offsets[target] as i64 - offsets[index + 1] as i64;
                    writer.emit_i32(relative as i32);
                }
                (OperandKind::Jump, Operand::Jump(target)) => {
                    return Err(CodeError::JumpOutOfRange { index, target });
                }
                _ => {
                    return Err(DecodeError::InvalidTag {
                        what: "operand",
                        tag: insn.opcode.to_u8(),
                        offset: offsets[index],
                    }
                    .into())
                }
            }
        }

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for (index, handler) in self.handlers.iter().enumerate() {
            let len = self.insns.len();
            if handler.start >= handler.end || handler.end > len || handler.target >= len {
                return Err(CodeError::InvalidHandler { index });
            }
            handlers.push(Handler {
                start: offsets[handler.start] as u32,
                end: offsets[handler.end] as u32,
                target: offsets[handler.target] as u32,
                catch_type: handler.catch_type.clone(),
            });
        }

        Ok((writer.into_bytes(), handlers))
    }

    /// Rebuild the body, replacing each instruction with what `f` emits
    ///
    /// `prefix` runs once before the first original instruction; jumps to
    /// the original entry land after it. A jump to an original instruction
    /// lands on the first instruction emitted for it. Handler ranges cover
    /// everything emitted for the instructions they covered. Returns the
    /// indexes of forward jumps still to be bound.
    pub fn rewrite<F>(&self, prefix: Vec<Insn>, mut f: F) -> (CodeBody, Vec<usize>)
    where
        F: FnMut(usize, &Insn, &mut Emitter),
    {
        let mut emitter = Emitter {
            out: prefix,
            forward: Vec::new(),
        };
        let relocate_from = emitter.out.len();
        let mut map = Vec::with_capacity(self.insns.len() + 1);
        for (index, insn) in self.insns.iter().enumerate() {
            map.push(emitter.out.len());
            f(index, insn, &mut emitter);
        }
        map.push(emitter.out.len());

        let Emitter { mut out, forward } = emitter;
        for (position, insn) in out.iter_mut().enumerate().skip(relocate_from) {
            if let Operand::Jump(target) = insn.operand {
                if !forward.contains(&position) {
                    insn.operand = Operand::Jump(map.get(target).copied().unwrap_or(usize::MAX));
                }
            }
        }

        let handlers = self
            .handlers
            .iter()
            .map(|h| InsnHandler {
                start: map[h.start],
                end: map[h.end],
                target: map[h.target],
                catch_type: h.catch_type.clone(),
            })
            .collect();

        (
            CodeBody {
                insns: out,
                handlers,
            },
            forward,
        )
    }

    /// Point every jump at the given positions to `target`
    pub fn bind_jumps(&mut self, jumps: &[usize], target: usize) {
        for &position in jumps {
            if let Some(insn) = self.insns.get_mut(position) {
                insn.operand = Operand::Jump(target);
            }
        }
    }

    /// Highest local slot referenced plus one
    pub fn locals_used(&self) -> u16 {
        self.insns
            .iter()
            .filter_map(|insn| match insn.operand {
                Operand::Local(slot) => Some(slot.saturating_add(1)),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Compute the maximum operand stack depth
    ///
    /// Handler entries start with the thrown value on the stack. Fails when
    /// a path underflows, paths merge at different depths, or execution can
    /// run past the last instruction.
    pub fn compute_max_stack(&self, pool: &ConstantPool) -> Result<u16, CodeError> {
        self.analyze_stack(pool).map(|(_, max)| max)
    }

    /// Operand stack depth on entry to each instruction, `None` where unreachable
    pub fn stack_depths(&self, pool: &ConstantPool) -> Result<Vec<Option<u32>>, CodeError> {
        self.analyze_stack(pool).map(|(depths, _)| depths)
    }

    fn analyze_stack(&self, pool: &ConstantPool) -> Result<(Vec<Option<u32>>, u16), CodeError> {
        if self.insns.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let len = self.insns.len();
        let mut depth_at: Vec<Option<u32>> = vec![None; len];
        let mut worklist = vec![(0usize, 0u32)];
        for handler in &self.handlers {
            if handler.target >= len {
                return Err(CodeError::JumpOutOfRange {
                    index: handler.start,
                    target: handler.target,
                });
            }
            worklist.push((handler.target, 1));
        }

        let mut max = 0u32;
        while let Some((index, depth)) = worklist.pop() {
            match depth_at[index] {
                Some(seen) if seen == depth => continue,
                Some(seen) => {
                    return Err(CodeError::StackMismatch {
                        index,
                        expected: seen,
                        actual: depth,
                    })
                }
                None => depth_at[index] = Some(depth),
            }

            let insn = &self.insns[index];
            let (pops, pushes) = stack_effect(index, insn, pool)?;
            let after = depth
                .checked_sub(pops)
                .ok_or(CodeError::StackUnderflow(index))?
                + pushes;
            max = max.max(after).max(depth);
            if max > u16::MAX as u32 {
                return Err(CodeError::StackOverflow(index));
            }

            if let Operand::Jump(target) = insn.operand {
                if target >= len {
                    return Err(CodeError::JumpOutOfRange { index, target });
                }
                worklist.push((target, after));
            }
            if !insn.opcode.is_terminator() {
                if index + 1 >= len {
                    return Err(CodeError::FallOffEnd);
                }
                worklist.push((index + 1, after));
            }
        }

        Ok((depth_at, max as u16))
    }

    /// Render the body one instruction per line
    pub fn disassemble(&self, pool: &ConstantPool) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for (index, insn) in self.insns.iter().enumerate() {
            let _ = write!(out, "{:4}: {}", index, insn.opcode.name());
            let _ = match insn.operand {
                Operand::None => Ok(()),
                Operand::I32(value) => write!(out, " {}", value),
                Operand::F64(value) => write!(out, " {}", value),
                Operand::Local(slot) => write!(out, " ${}", slot),
                Operand::Jump(target) => write!(out, " -> {}", target),
                Operand::Str(constant) => match pool.get_string(constant) {
                    Some(s) => write!(out, " {:?}", s),
                    None => write!(out, " #{}?", constant),
                },
                Operand::Member(constant) => match pool.get_member(constant) {
                    Some(member) => write!(out, " {}", member),
                    None => write!(out, " @{}?", constant),
                },
            };
            out.push('\n');
        }
        for handler in &self.handlers {
            let _ = writeln!(
                out,
                "  catch {} [{}, {}) -> {}",
                handler.catch_type.as_deref().unwrap_or("*"),
                handler.start,
                handler.end,
                handler.target
            );
        }
        out
    }
}

/// Operand before jump targets are mapped to instruction indexes
enum RawOperand {
    Ready(Operand),
    JumpTo(i64),
}

/// (pops, pushes) for one instruction
fn stack_effect(index: usize, insn: &Insn, pool: &ConstantPool) -> Result<(u32, u32), CodeError> {
    use Opcode::*;
    let effect = match insn.opcode {
        Nop | Jmp | ReturnVoid => (0, 0),
        Pop | StoreLocal | JmpIfFalse | JmpIfTrue | JmpIfNull | JmpIfNotNull | Return | Throw => {
            (1, 0)
        }
        Dup => (1, 2),
        Swap => (2, 2),
        ConstNull | ConstTrue | ConstFalse | ConstI32 | ConstF64 | ConstStr | LoadLocal | New => {
            (0, 1)
        }
        Iadd | Isub | Imul | Idiv | Fadd | Fsub | Fmul | Fdiv | Ieq | Ine | Ilt | Igt | RefEq => {
            (2, 1)
        }
        Ineg | CheckCast | InstanceOf => (1, 1),
        GetField => (1, 1),
        PutField => (2, 0),
        GetStatic => (0, 1),
        PutStatic => (1, 0),
        InvokeStatic | InvokeVirtual | InvokeSpecial | InvokeInterface => {
            let constant = insn.member_index().unwrap_or(u32::MAX);
            let member = pool
                .get_member(constant)
                .ok_or(CodeError::InvalidConstantRef { index, constant })?;
            let descriptor = MethodDescriptor::parse(&member.descriptor)?;
            let receiver = u32::from(insn.opcode != InvokeStatic);
            (
                descriptor.arg_slots() as u32 + receiver,
                u32::from(descriptor.returns_value()),
            )
        }
    };
    Ok(effect)
}
