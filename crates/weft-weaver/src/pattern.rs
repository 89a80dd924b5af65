//! Name patterns used by pointcuts and mixin targets
//!
//! Syntax:
//! - `com/acme/Foo` matches exactly
//! - `com/acme/*` uses `*` as a wildcard over any characters
//! - `run|stop` matches any of the alternatives, each of which may use `*`
//! - `/regex/` is a full regular expression, anchored at both ends

use crate::error::PatternError;
use regex::Regex;
use std::fmt;

/// A compiled name pattern
#[derive(Clone)]
pub struct NamePattern {
    source: String,
    kind: PatternKind,
}

#[derive(Clone)]
enum PatternKind {
    Exact(String),
    Any,
    Regex {
        regex: Regex,
        /// Alternatives without wildcards, for explicit-name checks
        literals: Vec<String>,
    },
}

impl NamePattern {
    /// Compile a pattern
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let compile = |expr: String| {
            Regex::new(&expr).map_err(|source| PatternError::Regex {
                pattern: pattern.to_string(),
                source,
            })
        };

        let kind = if pattern == "*" {
            PatternKind::Any
        } else if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let inner = &pattern[1..pattern.len() - 1];
            PatternKind::Regex {
                regex: compile(format!("^(?:{})$", inner))?,
                literals: Vec::new(),
            }
        } else if pattern.contains('*') || pattern.contains('|') {
            let mut literals = Vec::new();
            let alternatives: Vec<String> = pattern
                .split('|')
                .map(|alt| {
                    if !alt.contains('*') {
                        literals.push(alt.to_string());
                    }
                    alt.split('*')
                        .map(regex::escape)
                        .collect::<Vec<_>>()
                        .join(".*")
                })
                .collect();
            PatternKind::Regex {
                regex: compile(format!("^(?:{})$", alternatives.join("|")))?,
                literals,
            }
        } else {
            PatternKind::Exact(pattern.to_string())
        };

        Ok(Self {
            source: pattern.to_string(),
            kind,
        })
    }

    /// Pattern matching every name
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            kind: PatternKind::Any,
        }
    }

    /// Test a name against the pattern
    pub fn matches(&self, name: &str) -> bool {
        match &self.kind {
            PatternKind::Exact(exact) => exact == name,
            PatternKind::Any => true,
            PatternKind::Regex { regex, .. } => regex.is_match(name),
        }
    }

    /// Whether the pattern spells out `name` literally, without wildcards
    pub fn names_explicitly(&self, name: &str) -> bool {
        match &self.kind {
            PatternKind::Exact(exact) => exact == name,
            PatternKind::Any => false,
            PatternKind::Regex { literals, .. } => literals.iter().any(|l| l == name),
        }
    }

    /// Original pattern text
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamePattern({:?})", self.source)
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
