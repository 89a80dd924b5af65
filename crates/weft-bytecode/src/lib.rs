//! Weft Code Unit Format
//!
//! This crate provides the binary code-unit format woven by the weaver: the
//! instruction set, constant pool, unit encoding with integrity header,
//! method descriptors, an index-addressed body editor and a structural
//! verifier.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod code;
pub mod constants;
pub mod descriptor;
pub mod encoder;
pub mod opcode;
pub mod unit;
pub mod verify;

pub use code::{CodeBody, CodeError, Emitter, Insn, InsnHandler, Operand};
pub use constants::{ConstantPool, MemberRef};
pub use descriptor::{DescriptorError, MethodDescriptor, TypeDesc};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use opcode::Opcode;
pub use unit::{access, CodeUnit, FieldDef, Handler, MethodDef, UnitError};
pub use verify::{verify_unit, VerifyError};
