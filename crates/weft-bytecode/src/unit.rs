//! Code unit format
//!
//! A code unit is the binary form of one loadable type: its header, its
//! place in the type hierarchy, its constant pool, fields and methods.

use crate::constants::ConstantPool;
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use thiserror::Error;

/// Magic number for code units: "WEFT"
pub const MAGIC: [u8; 4] = *b"WEFT";

/// Current format version
pub const VERSION: u32 = 1;

/// Size of the fixed header: magic + version + reserved + crc32 + sha256
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 32;

/// Name of constructors
pub const CONSTRUCTOR: &str = "<init>";

/// Name of static initializers
pub const STATIC_INIT: &str = "<clinit>";

/// Unit encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected WEFT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value
        actual: u32,
    },

    /// Reserved header word is not zero
    #[error("Reserved header word is {0:#x}, expected 0")]
    ReservedHeader(u32),

    /// SHA-256 digest mismatch with a matching CRC32
    #[error("Content digest mismatch")]
    DigestMismatch,

    /// Bytes remain after the last table
    #[error("{0} trailing bytes after unit payload")]
    TrailingBytes(usize),
}

/// Access flags shared by units, fields and methods
pub mod access {
    /// Visible everywhere
    pub const PUBLIC: u32 = 0x0001;
    /// Visible to the declaring type only
    pub const PRIVATE: u32 = 0x0002;
    /// Visible to subtypes
    pub const PROTECTED: u32 = 0x0004;
    /// Belongs to the type, not to instances
    pub const STATIC: u32 = 0x0008;
    /// Cannot be overridden or reassigned
    pub const FINAL: u32 = 0x0010;
    /// Invocation holds the receiver's monitor
    pub const SYNCHRONIZED: u32 = 0x0020;
    /// Compiler-generated bridge method
    pub const BRIDGE: u32 = 0x0040;
    /// Implemented outside bytecode
    pub const NATIVE: u32 = 0x0100;
    /// The unit is an interface
    pub const INTERFACE: u32 = 0x0200;
    /// No implementation
    pub const ABSTRACT: u32 = 0x0400;
    /// Not present in source
    pub const SYNTHETIC: u32 = 0x1000;

    /// Mask of the three visibility bits
    pub const VISIBILITY: u32 = PUBLIC | PRIVATE | PROTECTED;
}

/// Exception handler entry (byte offsets into the method's code)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    /// First covered byte (inclusive)
    pub start: u32,
    /// Last covered byte (exclusive)
    pub end: u32,
    /// Handler entry offset
    pub target: u32,
    /// Caught type; `None` catches everything
    pub catch_type: Option<String>,
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Access flags
    pub access: u32,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
}

impl FieldDef {
    /// Whether the field is static
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.access);
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            access: reader.read_u32()?,
            name: reader.read_string()?,
            descriptor: reader.read_string()?,
        })
    }
}

/// Method definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// Access flags
    pub access: u32,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Marker annotations attached to the method
    pub markers: Vec<String>,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local slots, including receiver and parameters
    pub max_locals: u16,
    /// Instruction bytes (empty for abstract/native methods)
    pub code: Vec<u8>,
    /// Exception handler table
    pub handlers: Vec<Handler>,
}

impl MethodDef {
    /// Create a method with no body
    pub fn new(access: u32, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            markers: Vec::new(),
            max_stack: 0,
            max_locals: 0,
            code: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Whether the method is static
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Whether the method has no bytecode body
    pub fn is_abstract_or_native(&self) -> bool {
        self.access & (access::ABSTRACT | access::NATIVE) != 0
    }

    /// Whether the method is a constructor
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }

    /// Whether the method is a static initializer
    pub fn is_static_init(&self) -> bool {
        self.name == STATIC_INIT
    }

    /// Whether the method carries the given marker
    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.access);
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
        writer.emit_strings(&self.markers);
        writer.emit_u16(self.max_stack);
        writer.emit_u16(self.max_locals);

        writer.emit_u32(self.code.len() as u32);
        writer.buffer.extend_from_slice(&self.code);

        writer.emit_u32(self.handlers.len() as u32);
        for handler in &self.handlers {
            writer.emit_u32(handler.start);
            writer.emit_u32(handler.end);
            writer.emit_u32(handler.target);
            writer.emit_opt_string(handler.catch_type.as_deref());
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let access = reader.read_u32()?;
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        let markers = reader.read_strings()?;
        let max_stack = reader.read_u16()?;
        let max_locals = reader.read_u16()?;

        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;

        let handler_count = reader.read_u32()? as usize;
        let mut handlers = Vec::with_capacity(handler_count.min(reader.remaining() / 13));
        for _ in 0..handler_count {
            handlers.push(Handler {
                start: reader.read_u32()?,
                end: reader.read_u32()?,
                target: reader.read_u32()?,
                catch_type: reader.read_opt_string()?,
            });
        }

        Ok(Self {
            access,
            name,
            descriptor,
            markers,
            max_stack,
            max_locals,
            code,
            handlers,
        })
    }
}

/// A decoded code unit
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    /// Format version
    pub version: u32,
    /// Access flags of the type
    pub access: u32,
    /// Type name (internal form, `a/b/C`)
    pub name: String,
    /// Superclass name; `None` only for the root type
    pub super_name: Option<String>,
    /// Directly implemented interfaces, in declaration order
    pub interfaces: Vec<String>,
    /// Marker annotations attached to the type
    pub markers: Vec<String>,
    /// Constant pool
    pub constants: ConstantPool,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Method definitions
    pub methods: Vec<MethodDef>,
    /// Source file path
    pub source_file: Option<String>,
}

impl CodeUnit {
    /// Create a new empty public unit
    pub fn new(name: impl Into<String>, super_name: Option<String>) -> Self {
        Self {
            version: VERSION,
            access: access::PUBLIC,
            name: name.into(),
            super_name,
            interfaces: Vec::new(),
            markers: Vec::new(),
            constants: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// Whether the unit is an interface
    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Find a method by name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Find a field by name
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Encode the unit to binary format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + reserved (u32, zero) + crc32 (u32) + sha256 (32 bytes)
    /// - Type info: access, name, super name, interfaces, markers, source file
    /// - Constant pool
    /// - Field table
    /// - Method table
    pub fn encode(&self) -> Vec<u8> {
        use sha2::{Digest, Sha256};

        let mut writer = BytecodeWriter::new();

        writer.buffer.extend_from_slice(&MAGIC);
        writer.emit_u32(self.version);
        writer.emit_u32(0);
        let crc32_offset = writer.offset();
        writer.emit_u32(0); // Placeholder for CRC32
        let sha256_offset = writer.offset();
        writer.buffer.extend_from_slice(&[0u8; 32]); // Placeholder for SHA-256

        writer.emit_u32(self.access);
        writer.emit_string(&self.name);
        writer.emit_opt_string(self.super_name.as_deref());
        writer.emit_strings(&self.interfaces);
        writer.emit_strings(&self.markers);
        writer.emit_opt_string(self.source_file.as_deref());

        self.constants.encode(&mut writer);

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(&mut writer);
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        let payload = &writer.buffer[HEADER_SIZE..];
        let crc32 = crc32fast::hash(payload);
        let digest: [u8; 32] = Sha256::digest(payload).into();

        writer.patch_u32(crc32_offset, crc32);
        writer.buffer[sha256_offset..sha256_offset + 32].copy_from_slice(&digest);

        writer.into_bytes()
    }

    /// Decode a unit from binary format
    pub fn decode(data: &[u8]) -> Result<Self, UnitError> {
        use sha2::{Digest, Sha256};

        let mut reader = BytecodeReader::new(data);

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&reader.read_bytes(4)?);
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(UnitError::UnsupportedVersion(version));
        }

        let reserved = reader.read_u32()?;
        if reserved != 0 {
            return Err(UnitError::ReservedHeader(reserved));
        }
        let stored_crc32 = reader.read_u32()?;
        let stored_sha256 = reader.read_bytes(32)?;

        let payload = &data[HEADER_SIZE..];
        let calculated_crc32 = crc32fast::hash(payload);
        if stored_crc32 != calculated_crc32 {
            return Err(UnitError::ChecksumMismatch {
                expected: stored_crc32,
                actual: calculated_crc32,
            });
        }
        if stored_sha256.as_slice() != Sha256::digest(payload).as_slice() {
            return Err(UnitError::DigestMismatch);
        }

        let access = reader.read_u32()?;
        let name = reader.read_string()?;
        let super_name = reader.read_opt_string()?;
        let interfaces = reader.read_strings()?;
        let markers = reader.read_strings()?;
        let source_file = reader.read_opt_string()?;

        let constants = ConstantPool::decode(&mut reader)?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(reader.remaining() / 12));
        for _ in 0..field_count {
            fields.push(FieldDef::decode(&mut reader)?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(reader.remaining() / 24));
        for _ in 0..method_count {
            methods.push(MethodDef::decode(&mut reader)?);
        }

        if reader.has_more() {
            return Err(UnitError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            version,
            access,
            name,
            super_name,
            interfaces,
            markers,
            constants,
            fields,
            methods,
            source_file,
        })
    }

    /// Read only the type name from encoded bytes, without checksum validation
    ///
    /// Lets callers reject a unit by name before paying for integrity hashing.
    pub fn peek_name(data: &[u8]) -> Option<String> {
        let mut reader = BytecodeReader::new(data.get(HEADER_SIZE..)?);
        reader.read_u32().ok()?;
        reader.read_string().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MemberRef;

    fn sample_unit() -> CodeUnit {
        let mut unit = CodeUnit::new("com/acme/Widget", Some("com/acme/Base".to_string()));
        unit.interfaces.push("com/acme/Named".to_string());
        unit.markers.push("com/acme/Component".to_string());
        unit.source_file = Some("Widget.src".to_string());
        unit.constants.add_string("hello".to_string());
        unit.constants
            .intern_member(&MemberRef::new("com/acme/Base", "run", "()V"));
        unit.fields.push(FieldDef {
            access: access::PRIVATE,
            name: "count".to_string(),
            descriptor: "I".to_string(),
        });
        let mut method = MethodDef::new(access::PUBLIC, "run", "()V");
        method.markers.push("com/acme/Traced".to_string());
        method.max_locals = 1;
        method.code = vec![crate::Opcode::ReturnVoid.to_u8()];
        method.handlers.push(Handler {
            start: 0,
            end: 1,
            target: 0,
            catch_type: None,
        });
        unit.methods.push(method);
        unit
    }

    #[test]
    fn test_unit_creation() {
        let unit = CodeUnit::new("a/B", None);
        assert_eq!(unit.version, VERSION);
        assert!(!unit.is_interface());
        assert_eq!(unit.access, access::PUBLIC);
    }

    #[test]
    fn test_unit_encoding() {
        let unit = sample_unit();
        let bytes = unit.encode();
        assert_eq!(&bytes[..4], &MAGIC);
        let decoded = CodeUnit::decode(&bytes).unwrap();
        assert_eq!(decoded, unit);
        assert_eq!(CodeUnit::peek_name(&bytes), Some("com/acme/Widget".to_string()));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let unit = sample_unit();
        assert_eq!(unit.encode(), unit.encode());
    }

    #[test]
    fn test_unit_checksum_validation() {
        let mut bytes = sample_unit().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            CodeUnit::decode(&bytes),
            Err(UnitError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic_number() {
        let mut bytes = vec![b'X', b'X', b'X', b'X'];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        let result = CodeUnit::decode(&bytes);
        assert!(matches!(result, Err(UnitError::InvalidMagic(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"WEFT");
        bytes.extend_from_slice(&999u32.to_le_bytes());
        let result = CodeUnit::decode(&bytes);
        assert!(matches!(result, Err(UnitError::UnsupportedVersion(999))));
    }

    #[test]
    fn test_reserved_header_word() {
        let mut bytes = sample_unit().encode();
        bytes[8] = 1;
        assert!(matches!(CodeUnit::decode(&bytes), Err(UnitError::ReservedHeader(1))));
    }

    #[test]
    fn test_peek_name_skips_integrity_checks() {
        let mut bytes = sample_unit().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(CodeUnit::decode(&bytes).is_err());
        assert_eq!(CodeUnit::peek_name(&bytes), Some("com/acme/Widget".to_string()));
        assert_eq!(CodeUnit::peek_name(b"WEFT"), None);
    }

    #[test]
    fn test_truncated_unit() {
        let bytes = sample_unit().encode();
        let result = CodeUnit::decode(&bytes[..20]);
        assert!(matches!(result, Err(UnitError::DecodeError(DecodeError::UnexpectedEnd(_)))));
    }
}
