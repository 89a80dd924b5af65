//! Mixins: an interface plus the members implementing it, copied into
//! matching types

use super::load_unit;
use crate::error::CatalogError;
use crate::loader::Loader;
use crate::pattern::NamePattern;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use weft_bytecode::CodeUnit;

/// Declared form of a mixin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixinDecl {
    /// Patterns over target type names (matched against the type and its ancestors)
    pub targets: Vec<String>,

    /// Interface added to targets
    pub interface: String,

    /// Unit whose fields and methods implement the interface
    pub template: String,

    /// Template method called at the end of every constructor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<String>,
}

/// A compiled mixin
#[derive(Debug, Clone)]
pub struct MixinType {
    /// Target type patterns
    pub targets: Vec<NamePattern>,
    /// Interface added to targets
    pub interface: String,
    /// Implementation template
    pub template: Arc<CodeUnit>,
    /// Instance `()V` method of the template run after construction
    pub init_method: Option<String>,
}

impl MixinType {
    /// Compile a declared mixin, loading its template unit
    pub fn build(decl: &MixinDecl, loader: &Arc<dyn Loader>, index: usize) -> Result<Self, CatalogError> {
        let context = format!("mixin #{} ({})", index, decl.interface);
        let invalid = |message: String| CatalogError::Invalid {
            context: context.clone(),
            message,
        };

        if decl.targets.is_empty() {
            return Err(invalid("no target patterns".to_string()));
        }
        let targets = decl
            .targets
            .iter()
            .map(|t| {
                NamePattern::parse(t).map_err(|source| CatalogError::Pattern {
                    context: context.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let template = load_unit(loader, &decl.template, &context)?;
        if template.is_interface() {
            return Err(invalid(format!("template {} is an interface", template.name)));
        }
        if let Some(init) = &decl.init {
            match template.find_method(init, "()V") {
                Some(method) if !method.is_static() && !method.is_abstract_or_native() => {}
                _ => {
                    return Err(invalid(format!(
                        "template {} has no concrete instance method {}()V",
                        template.name, init
                    )))
                }
            }
        }

        Ok(Self {
            targets,
            interface: decl.interface.clone(),
            template: Arc::new(template),
            init_method: decl.init.clone(),
        })
    }

    /// Whether any target pattern matches the name
    pub fn matches(&self, name: &str) -> bool {
        self.targets.iter().any(|t| t.matches(name))
    }
}
