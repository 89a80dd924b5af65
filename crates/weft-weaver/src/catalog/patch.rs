//! Static initializer patches
//!
//! A patch neutralizes calls to a named callee inside `<clinit>` of
//! matching types: the call's arguments are popped and, if it returns a
//! value, null is pushed in its place. A patch may also stub methods,
//! replacing their bodies with a return of the default value.

use crate::error::CatalogError;
use crate::pattern::NamePattern;
use serde::{Deserialize, Serialize};
use weft_bytecode::CodeUnit;

/// Declared form of a patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchDecl {
    /// Pattern over type names
    pub class_name: String,

    /// Name of the method whose calls are removed from `<clinit>`
    #[serde(default)]
    pub callee: String,

    /// Methods whose bodies become a bare default return
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stub_methods: Vec<String>,
}

/// A compiled patch
#[derive(Debug, Clone)]
pub struct StaticInitPatch {
    /// Pattern over type names
    pub class_name: NamePattern,
    /// Name of the method whose calls are removed; empty for none
    pub callee: String,
    /// Methods to stub
    pub stub_methods: Vec<String>,
}

impl StaticInitPatch {
    /// Compile a declared patch
    pub fn build(decl: &PatchDecl, index: usize) -> Result<Self, CatalogError> {
        let context = format!("patch #{}", index);
        let invalid = |message: String| CatalogError::Invalid {
            context: context.clone(),
            message,
        };
        if decl.callee.is_empty() && decl.stub_methods.is_empty() {
            return Err(invalid("neither callee nor stub_methods given".to_string()));
        }
        if let Some(name) = decl.stub_methods.iter().find(|n| n.is_empty() || n.starts_with('<')) {
            return Err(invalid(format!("cannot stub method {:?}", name)));
        }
        let class_name = NamePattern::parse(&decl.class_name).map_err(|source| CatalogError::Pattern {
            context: context.clone(),
            source,
        })?;
        Ok(Self {
            class_name,
            callee: decl.callee.clone(),
            stub_methods: decl.stub_methods.clone(),
        })
    }

    /// Whether the patch changes anything in `unit`
    pub fn applies_to(&self, unit: &CodeUnit) -> bool {
        if !self.class_name.matches(&unit.name) {
            return false;
        }
        let patches_init = !self.callee.is_empty() && unit.methods.iter().any(|m| m.is_static_init());
        patches_init || unit.methods.iter().any(|m| self.stub_methods.contains(&m.name))
    }
}
