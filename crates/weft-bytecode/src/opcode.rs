//! Bytecode opcodes
//!
//! Opcodes are single bytes organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Local variables
//! - 0x20-0x2F: Integer arithmetic
//! - 0x30-0x3F: Float arithmetic
//! - 0x50-0x5F: Comparison
//! - 0x90-0x9F: Control flow
//! - 0xA0-0xAF: Calls and returns
//! - 0xB0-0xBF: Object operations
//! - 0xE0-0xEF: Error handling

/// Operand layout following an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    None,
    /// i32 immediate
    I32,
    /// f64 immediate
    F64,
    /// u16 local slot
    Local,
    /// u32 string constant index
    StringRef,
    /// u32 member-ref constant index
    MemberRef,
    /// i32 jump offset, relative to the end of the instruction
    Jump,
}

impl OperandKind {
    /// Encoded operand size in bytes
    pub fn size(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::Local => 2,
            OperandKind::I32 | OperandKind::StringRef | OperandKind::MemberRef | OperandKind::Jump => 4,
            OperandKind::F64 => 8,
        }
    }
}

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push 64-bit float constant (operand: f64)
    ConstF64 = 0x08,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x09,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,

    // ===== Integer Arithmetic (0x20-0x2F) =====
    /// Integer addition: pop b, pop a, push a + b
    Iadd = 0x20,
    /// Integer subtraction: pop b, pop a, push a - b
    Isub = 0x21,
    /// Integer multiplication: pop b, pop a, push a * b
    Imul = 0x22,
    /// Integer division: pop b, pop a, push a / b
    Idiv = 0x23,
    /// Integer negation: pop a, push -a
    Ineg = 0x24,

    // ===== Float Arithmetic (0x30-0x3F) =====
    /// Float addition
    Fadd = 0x30,
    /// Float subtraction
    Fsub = 0x31,
    /// Float multiplication
    Fmul = 0x32,
    /// Float division
    Fdiv = 0x33,

    // ===== Comparison (0x50-0x5F) =====
    /// Integer equality: pop b, pop a, push a == b
    Ieq = 0x50,
    /// Integer inequality
    Ine = 0x51,
    /// Integer less than
    Ilt = 0x52,
    /// Integer greater than
    Igt = 0x53,
    /// Reference equality
    RefEq = 0x54,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 offset)
    Jmp = 0x90,
    /// Jump if false (operand: i32 offset)
    JmpIfFalse = 0x91,
    /// Jump if true (operand: i32 offset)
    JmpIfTrue = 0x92,
    /// Jump if null (operand: i32 offset)
    JmpIfNull = 0x93,
    /// Jump if not null (operand: i32 offset)
    JmpIfNotNull = 0x94,

    // ===== Calls and Returns (0xA0-0xAF) =====
    /// Call a static method (operand: u32 member ref)
    InvokeStatic = 0xA0,
    /// Call a virtual method on the receiver (operand: u32 member ref)
    InvokeVirtual = 0xA1,
    /// Call a method non-virtually: constructors, super calls (operand: u32 member ref)
    InvokeSpecial = 0xA2,
    /// Call an interface method (operand: u32 member ref)
    InvokeInterface = 0xA3,
    /// Return top of stack
    Return = 0xA4,
    /// Return without value
    ReturnVoid = 0xA5,

    // ===== Object Operations (0xB0-0xBF) =====
    /// Allocate an instance (operand: u32 string index of the type name)
    New = 0xB0,
    /// Read an instance field (operand: u32 member ref)
    GetField = 0xB1,
    /// Write an instance field (operand: u32 member ref)
    PutField = 0xB2,
    /// Read a static field (operand: u32 member ref)
    GetStatic = 0xB3,
    /// Write a static field (operand: u32 member ref)
    PutStatic = 0xB4,
    /// Checked cast (operand: u32 string index of the type name)
    CheckCast = 0xB5,
    /// Instance test (operand: u32 string index of the type name)
    InstanceOf = 0xB6,

    // ===== Error Handling (0xE0-0xEF) =====
    /// Throw top of stack
    Throw = 0xE0,
}

impl Opcode {
    /// Convert a byte to an opcode
    ///
    /// Returns None if the byte is not a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        let opcode = match byte {
            0x00 => Nop,
            0x01 => Pop,
            0x02 => Dup,
            0x03 => Swap,
            0x04 => ConstNull,
            0x05 => ConstTrue,
            0x06 => ConstFalse,
            0x07 => ConstI32,
            0x08 => ConstF64,
            0x09 => ConstStr,
            0x10 => LoadLocal,
            0x11 => StoreLocal,
            0x20 => Iadd,
            0x21 => Isub,
            0x22 => Imul,
            0x23 => Idiv,
            0x24 => Ineg,
            0x30 => Fadd,
            0x31 => Fsub,
            0x32 => Fmul,
            0x33 => Fdiv,
            0x50 => Ieq,
            0x51 => Ine,
            0x52 => Ilt,
            0x53 => Igt,
            0x54 => RefEq,
            0x90 => Jmp,
            0x91 => JmpIfFalse,
            0x92 => JmpIfTrue,
            0x93 => JmpIfNull,
            0x94 => JmpIfNotNull,
            0xA0 => InvokeStatic,
            0xA1 => InvokeVirtual,
            0xA2 => InvokeSpecial,
            0xA3 => InvokeInterface,
            0xA4 => Return,
            0xA5 => ReturnVoid,
            0xB0 => New,
            0xB1 => GetField,
            0xB2 => PutField,
            0xB3 => GetStatic,
            0xB4 => PutStatic,
            0xB5 => CheckCast,
            0xB6 => InstanceOf,
            0xE0 => Throw,
            _ => return None,
        };
        Some(opcode)
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Operand layout for this opcode
    pub fn operand_kind(self) -> OperandKind {
        use Opcode::*;
        match self {
            ConstI32 => OperandKind::I32,
            ConstF64 => OperandKind::F64,
            ConstStr | New | CheckCast | InstanceOf => OperandKind::StringRef,
            LoadLocal | StoreLocal => OperandKind::Local,
            Jmp | JmpIfFalse | JmpIfTrue | JmpIfNull | JmpIfNotNull => OperandKind::Jump,
            InvokeStatic | InvokeVirtual | InvokeSpecial | InvokeInterface | GetField
            | PutField | GetStatic | PutStatic => OperandKind::MemberRef,
            _ => OperandKind::None,
        }
    }

    /// Encoded size of the instruction (opcode byte + operand)
    pub fn encoded_size(self) -> usize {
        1 + self.operand_kind().size()
    }

    /// Get the opcode name (for debugging and disassembly)
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Pop => "POP",
            Dup => "DUP",
            Swap => "SWAP",
            ConstNull => "CONST_NULL",
            ConstTrue => "CONST_TRUE",
            ConstFalse => "CONST_FALSE",
            ConstI32 => "CONST_I32",
            ConstF64 => "CONST_F64",
            ConstStr => "CONST_STR",
            LoadLocal => "LOAD_LOCAL",
            StoreLocal => "STORE_LOCAL",
            Iadd => "IADD",
            Isub => "ISUB",
            Imul => "IMUL",
            Idiv => "IDIV",
            Ineg => "INEG",
            Fadd => "FADD",
            Fsub => "FSUB",
            Fmul => "FMUL",
            Fdiv => "FDIV",
            Ieq => "IEQ",
            Ine => "INE",
            Ilt => "ILT",
            Igt => "IGT",
            RefEq => "REF_EQ",
            Jmp => "JMP",
            JmpIfFalse => "JMP_IF_FALSE",
            JmpIfTrue => "JMP_IF_TRUE",
            JmpIfNull => "JMP_IF_NULL",
            JmpIfNotNull => "JMP_IF_NOT_NULL",
            InvokeStatic => "INVOKE_STATIC",
            InvokeVirtual => "INVOKE_VIRTUAL",
            InvokeSpecial => "INVOKE_SPECIAL",
            InvokeInterface => "INVOKE_INTERFACE",
            Return => "RETURN",
            ReturnVoid => "RETURN_VOID",
            New => "NEW",
            GetField => "GET_FIELD",
            PutField => "PUT_FIELD",
            GetStatic => "GET_STATIC",
            PutStatic => "PUT_STATIC",
            CheckCast => "CHECK_CAST",
            InstanceOf => "INSTANCE_OF",
            Throw => "THROW",
        }
    }

    /// Check if this is a jump instruction
    pub fn is_jump(self) -> bool {
        self.operand_kind() == OperandKind::Jump
    }

    /// Check if this is a method invocation
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Opcode::InvokeStatic | Opcode::InvokeVirtual | Opcode::InvokeSpecial | Opcode::InvokeInterface
        )
    }

    /// Check if this is a return instruction
    pub fn is_return(self) -> bool {
        matches!(self, Opcode::Return | Opcode::ReturnVoid)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Return | Opcode::ReturnVoid | Opcode::Jmp | Opcode::Throw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=255u8 {
            if let Some(opcode) = Opcode::from_u8(byte) {
                assert_eq!(opcode.to_u8(), byte, "Failed roundtrip for {:?}", opcode);
            }
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x0F), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Nop.name(), "NOP");
        assert_eq!(Opcode::InvokeStatic.name(), "INVOKE_STATIC");
        assert_eq!(Opcode::JmpIfNotNull.name(), "JMP_IF_NOT_NULL");
    }

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(Opcode::Nop.encoded_size(), 1);
        assert_eq!(Opcode::LoadLocal.encoded_size(), 3);
        assert_eq!(Opcode::Jmp.encoded_size(), 5);
        assert_eq!(Opcode::InvokeVirtual.encoded_size(), 5);
        assert_eq!(Opcode::ConstF64.encoded_size(), 9);
    }

    #[test]
    fn test_terminator_detection() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::ReturnVoid.is_terminator());
        assert!(Opcode::Jmp.is_terminator());
        assert!(Opcode::Throw.is_terminator());
        assert!(!Opcode::JmpIfFalse.is_terminator());
        assert!(!Opcode::InvokeStatic.is_terminator());
    }
}
