//! Error types for the weaving engine

use thiserror::Error;
use weft_bytecode::{CodeError, DescriptorError, UnitError};

/// Name pattern compilation errors
#[derive(Debug, Error)]
pub enum PatternError {
    /// Pattern text is empty
    #[error("Empty name pattern")]
    Empty,

    /// `/regex/` pattern failed to compile
    #[error("Invalid pattern {pattern:?}: {source}")]
    Regex {
        /// Pattern text
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },
}

/// Rule catalog construction errors
///
/// Any of these rejects the whole catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Failed to read the catalog file
    #[error("Failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog JSON is malformed
    #[error("Failed to parse catalog: {0}")]
    Json(#[from] serde_json::Error),

    /// A name pattern does not compile
    #[error("{context}: {source}")]
    Pattern {
        /// Entry the pattern belongs to
        context: String,
        /// Compilation error
        #[source]
        source: PatternError,
    },

    /// A unit named by the catalog cannot be found
    #[error("{context}: unit {name} not found")]
    MissingUnit {
        /// Entry that references the unit
        context: String,
        /// Unit name
        name: String,
    },

    /// A unit named by the catalog does not decode
    #[error("{context}: unit {name} is malformed: {source}")]
    MalformedUnit {
        /// Entry that references the unit
        context: String,
        /// Unit name
        name: String,
        /// Decode error
        #[source]
        source: UnitError,
    },

    /// Shim target value has an unexpected shape
    #[error("{context}: {message}")]
    ShimValue {
        /// Entry holding the value
        context: String,
        /// Description of the unexpected value
        message: String,
    },

    /// Entry is structurally invalid
    #[error("{context}: {message}")]
    Invalid {
        /// Offending entry
        context: String,
        /// What is wrong with it
        message: String,
    },
}

/// Errors raised while weaving a single unit
#[derive(Debug, Error)]
pub enum WeaveError {
    /// Unit bytes do not decode
    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    /// Unit bytes name a different type than the host asked for
    #[error("Unit is named {actual}, expected {expected}")]
    NameMismatch {
        /// Name passed by the host
        expected: String,
        /// Name in the unit
        actual: String,
    },

    /// A method body could not be decoded or re-encoded
    #[error("Method {method}: {source}")]
    Code {
        /// `owner.name` + descriptor
        method: String,
        /// Underlying error
        #[source]
        source: CodeError,
    },

    /// A method descriptor is malformed
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Ancestor resolution found a cycle
    #[error("Circular type hierarchy: {}", chain.join(" -> "))]
    Circularity {
        /// Types on the cycle, starting at the woven type
        chain: Vec<String>,
    },
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override holds an unrecognized value
    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },
}
