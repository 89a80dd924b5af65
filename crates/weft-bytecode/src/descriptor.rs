//! Method and field descriptors
//!
//! Descriptor grammar:
//!
//! ```text
//! method := '(' type* ')' (type | 'V')
//! type   := 'I' | 'F' | 'Z' | 'S' | 'L' name ';' | '[' type
//! ```
//!
//! Every value occupies exactly one local or stack slot.

use std::fmt;
use thiserror::Error;

/// Descriptor parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Descriptor does not follow the grammar
    #[error("Malformed descriptor {descriptor:?} at position {position}")]
    Malformed {
        /// The descriptor text
        descriptor: String,
        /// Position of the first unexpected character
        position: usize,
    },
}

/// A value type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    /// 32-bit integer
    Int,
    /// 64-bit float
    Float,
    /// Boolean
    Bool,
    /// String
    Str,
    /// Reference to an instance of the named type
    Object(String),
    /// Array of the element type
    Array(Box<TypeDesc>),
    /// No value (return position only)
    Void,
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Int => write!(f, "I"),
            TypeDesc::Float => write!(f, "F"),
            TypeDesc::Bool => write!(f, "Z"),
            TypeDesc::Str => write!(f, "S"),
            TypeDesc::Object(name) => write!(f, "L{};", name),
            TypeDesc::Array(element) => write!(f, "[{}", element),
            TypeDesc::Void => write!(f, "V"),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in order
    pub params: Vec<TypeDesc>,
    /// Return type
    pub ret: TypeDesc,
}

impl MethodDescriptor {
    /// Parse a method descriptor
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let bytes = descriptor.as_bytes();
        let malformed = |position: usize| DescriptorError::Malformed {
            descriptor: descriptor.to_string(),
            position,
        };

        if bytes.first() != Some(&b'(') {
            return Err(malformed(0));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while bytes.get(pos) != Some(&b')') {
            if pos >= bytes.len() {
                return Err(malformed(pos));
            }
            let (ty, next) = parse_type(descriptor, pos, false).ok_or_else(|| malformed(pos))?;
            params.push(ty);
            pos = next;
        }
        pos += 1;
        let (ret, end) = parse_type(descriptor, pos, true).ok_or_else(|| malformed(pos))?;
        if end != bytes.len() {
            return Err(malformed(end));
        }
        Ok(Self { params, ret })
    }

    /// Number of argument slots, excluding any receiver
    pub fn arg_slots(&self) -> usize {
        self.params.len()
    }

    /// Whether the method produces a value
    pub fn returns_value(&self) -> bool {
        self.ret != TypeDesc::Void
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        write!(f, "){}", self.ret)
    }
}

/// Parse a single field descriptor
pub fn parse_field(descriptor: &str) -> Result<TypeDesc, DescriptorError> {
    match parse_type(descriptor, 0, false) {
        Some((ty, end)) if end == descriptor.len() => Ok(ty),
        Some((_, end)) => Err(DescriptorError::Malformed {
            descriptor: descriptor.to_string(),
            position: end,
        }),
        None => Err(DescriptorError::Malformed {
            descriptor: descriptor.to_string(),
            position: 0,
        }),
    }
}

/// Deepest array nesting a descriptor may use
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

fn parse_type(descriptor: &str, pos: usize, allow_void: bool) -> Option<(TypeDesc, usize)> {
    let bytes = descriptor.as_bytes();
    let dimensions = bytes[pos.min(bytes.len())..].iter().take_while(|&&b| b == b'[').count();
    if dimensions > MAX_ARRAY_DIMENSIONS {
        return None;
    }

    let start = pos + dimensions;
    let (mut ty, next) = match *bytes.get(start)? {
        b'I' => (TypeDesc::Int, start + 1),
        b'F' => (TypeDesc::Float, start + 1),
        b'Z' => (TypeDesc::Bool, start + 1),
        b'S' => (TypeDesc::Str, start + 1),
        b'V' if allow_void && dimensions == 0 => (TypeDesc::Void, start + 1),
        b'L' => {
            let end = descriptor[start + 1..].find(';')? + start + 1;
            if end == start + 1 {
                return None;
            }
            (TypeDesc::Object(descriptor[start + 1..end].to_string()), end + 1)
        }
        _ => return None,
    };
    for _ in 0..dimensions {
        ty = TypeDesc::Array(Box::new(ty));
    }
    Some((ty, next))
}
