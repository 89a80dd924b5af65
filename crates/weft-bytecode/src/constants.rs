//! Constant pool for code units

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use std::fmt;

/// Reference to a method or field of some owner type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Owner type name (internal form)
    pub owner: String,
    /// Member name
    pub name: String,
    /// Method or field descriptor
    pub descriptor: String,
}

impl MemberRef {
    /// Create a new member reference
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Constant pool containing literal strings and member references
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    /// String constants
    pub strings: Vec<String>,
    /// Member references (methods and fields)
    pub members: Vec<MemberRef>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string constant and return its index
    pub fn add_string(&mut self, s: String) -> u32 {
        let index = self.strings.len();
        self.strings.push(s);
        index as u32
    }

    /// Return the index of an equal string, adding it if absent
    pub fn intern_string(&mut self, s: &str) -> u32 {
        match self.strings.iter().position(|existing| existing == s) {
            Some(index) => index as u32,
            None => self.add_string(s.to_string()),
        }
    }

    /// Return the index of an equal member ref, adding it if absent
    pub fn intern_member(&mut self, member: &MemberRef) -> u32 {
        match self.members.iter().position(|existing| existing == member) {
            Some(index) => index as u32,
            None => {
                let index = self.members.len();
                self.members.push(member.clone());
                index as u32
            }
        }
    }

    /// Get a string constant by index
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    /// Get a member reference by index
    pub fn get_member(&self, index: u32) -> Option<&MemberRef> {
        self.members.get(index as usize)
    }

    /// Encode the constant pool to binary format
    ///
    /// Format:
    /// - String count (u32), then each string: length (u32) + UTF-8 bytes
    /// - Member count (u32), then each member: owner, name, descriptor strings
    pub fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_strings(&self.strings);

        writer.emit_u32(self.members.len() as u32);
        for member in &self.members {
            writer.emit_string(&member.owner);
            writer.emit_string(&member.name);
            writer.emit_string(&member.descriptor);
        }
    }

    /// Decode the constant pool from binary format
    pub fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let strings = reader.read_strings()?;

        let member_count = reader.read_u32()? as usize;
        let mut members = Vec::with_capacity(member_count.min(reader.remaining() / 12));
        for _ in 0..member_count {
            let owner = reader.read_string()?;
            let name = reader.read_string()?;
            let descriptor = reader.read_string()?;
            members.push(MemberRef {
                owner,
                name,
                descriptor,
            });
        }

        Ok(Self { strings, members })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_reuses_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.intern_string("timer");
        let b = pool.intern_string("timer");
        assert_eq!(a, b);
        assert_eq!(pool.strings.len(), 1);

        let start = MemberRef::new("weft/TimerRuntime", "start", "(S)Lweft/TimerHandle;");
        let first = pool.intern_member(&start);
        let second = pool.intern_member(&start.clone());
        assert_eq!(first, second);
        assert_eq!(pool.get_member(first), Some(&start));
    }

    #[test]
    fn test_pool_encoding() {
        let mut pool = ConstantPool::new();
        pool.add_string("hello".to_string());
        pool.intern_member(&MemberRef::new("a/B", "run", "()V"));

        let mut writer = BytecodeWriter::new();
        pool.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = ConstantPool::decode(&mut BytecodeReader::new(&bytes)).unwrap();
        assert_eq!(decoded, pool);
    }

    #[test]
    fn test_member_display() {
        let member = MemberRef::new("a/B", "run", "(I)V");
        assert_eq!(member.to_string(), "a/B.run(I)V");
    }
}
