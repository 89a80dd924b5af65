//! Rule Catalog
//!
//! The immutable set of advice, mixin, shim and patch rules consulted by
//! every weave. A catalog is built once from its JSON declaration; the
//! [`CatalogHandle`] publishes new snapshots without disturbing weaves that
//! already hold the previous one.

pub mod advice;
pub mod mixin;
pub mod patch;
pub mod shim;

pub use advice::{Advice, AdviceDecl, Pointcut, PointcutDecl};
pub use mixin::{MixinDecl, MixinType};
pub use patch::{PatchDecl, StaticInitPatch};
pub use shim::{decode_shim_value, ShimDecl, ShimMethod, ShimMethodDecl, ShimType};

use crate::error::CatalogError;
use crate::loader::{find_through_chain, Loader};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weft_bytecode::CodeUnit;

/// Marker names recognized on types and methods
pub mod markers {
    /// Type defines weaving rules and must not be woven itself
    pub const POINTCUT: &str = "weft/Pointcut";
    /// Advice method run on entry
    pub const ON_BEFORE: &str = "weft/OnBefore";
    /// Advice method run before a normal return
    pub const ON_RETURN: &str = "weft/OnReturn";
    /// Advice method run when the body throws
    pub const ON_THROW: &str = "weft/OnThrow";
    /// Advice method run on every exit
    pub const ON_AFTER: &str = "weft/OnAfter";
    /// Override opts out of advice inherited from the overridden method
    pub const NO_INHERITED_ADVICE: &str = "weft/NoInheritedAdvice";

    /// All advice method markers
    pub const ADVICE_METHODS: [&str; 4] = [ON_BEFORE, ON_RETURN, ON_THROW, ON_AFTER];
}

/// Declared form of a catalog, as read from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDecl {
    /// Advice entries, in declaration order
    #[serde(default)]
    pub advice: Vec<AdviceDecl>,

    /// Mixins
    #[serde(default)]
    pub mixins: Vec<MixinDecl>,

    /// Shims
    #[serde(default)]
    pub shims: Vec<ShimDecl>,

    /// Static initializer patches
    #[serde(default)]
    pub patches: Vec<PatchDecl>,
}

impl CatalogDecl {
    /// Parse a declaration from JSON text
    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse a declaration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// Immutable rule set
#[derive(Debug, Default)]
pub struct RuleCatalog {
    advice: Vec<Advice>,
    mixins: Vec<MixinType>,
    shims: Vec<ShimType>,
    patches: Vec<StaticInitPatch>,
    rule_types: FxHashSet<String>,
}

impl RuleCatalog {
    /// Catalog with no rules
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a catalog from compiled parts
    pub fn from_parts(
        advice: Vec<Advice>,
        mixins: Vec<MixinType>,
        shims: Vec<ShimType>,
        patches: Vec<StaticInitPatch>,
    ) -> Self {
        let rule_types = advice.iter().map(|a| a.advice_type.clone()).collect();
        Self {
            advice,
            mixins,
            shims,
            patches,
            rule_types,
        }
    }

    /// Compile a declaration, resolving referenced units through `loader`
    ///
    /// The first invalid entry rejects the whole catalog.
    pub fn build(decl: &CatalogDecl, loader: &Arc<dyn Loader>) -> Result<Self, CatalogError> {
        let advice = decl
            .advice
            .iter()
            .enumerate()
            .map(|(i, d)| Advice::build(d, loader, i))
            .collect::<Result<Vec<_>, _>>()?;
        let mixins = decl
            .mixins
            .iter()
            .enumerate()
            .map(|(i, d)| MixinType::build(d, loader, i))
            .collect::<Result<Vec<_>, _>>()?;
        let shims = decl
            .shims
            .iter()
            .enumerate()
            .map(|(i, d)| ShimType::build(d, loader, i))
            .collect::<Result<Vec<_>, _>>()?;
        let patches = decl
            .patches
            .iter()
            .enumerate()
            .map(|(i, d)| StaticInitPatch::build(d, i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_parts(advice, mixins, shims, patches))
    }

    /// Parse and compile a JSON declaration
    pub fn from_json(content: &str, loader: &Arc<dyn Loader>) -> Result<Self, CatalogError> {
        Self::build(&CatalogDecl::from_json(content)?, loader)
    }

    /// Advice entries in declaration order
    pub fn advice(&self) -> &[Advice] {
        &self.advice
    }

    /// Mixins in declaration order
    pub fn mixins(&self) -> &[MixinType] {
        &self.mixins
    }

    /// Shims in declaration order
    pub fn shims(&self) -> &[ShimType] {
        &self.shims
    }

    /// Static initializer patches
    pub fn patches(&self) -> &[StaticInitPatch] {
        &self.patches
    }

    /// Whether the catalog holds no rules at all
    pub fn is_empty(&self) -> bool {
        self.advice.is_empty() && self.mixins.is_empty() && self.shims.is_empty() && self.patches.is_empty()
    }

    /// Whether the named type declares advice of this catalog
    pub fn is_rule_definition(&self, name: &str) -> bool {
        self.rule_types.contains(name)
    }
}

/// Shared handle publishing the current catalog snapshot
pub struct CatalogHandle {
    current: RwLock<Arc<RuleCatalog>>,
    generation: AtomicU64,
}

impl CatalogHandle {
    /// Create a handle holding `catalog`
    pub fn new(catalog: RuleCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot; stays valid across later reloads
    pub fn snapshot(&self) -> Arc<RuleCatalog> {
        self.current.read().clone()
    }

    /// Publish a new catalog and return its generation
    pub fn reload(&self, catalog: RuleCatalog) -> u64 {
        let mut current = self.current.write();
        *current = Arc::new(catalog);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of reloads so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Load and decode a unit referenced by a catalog entry
pub(crate) fn load_unit(loader: &Arc<dyn Loader>, name: &str, context: &str) -> Result<CodeUnit, CatalogError> {
    let (_, bytes) = find_through_chain(loader, name).ok_or_else(|| CatalogError::MissingUnit {
        context: context.to_string(),
        name: name.to_string(),
    })?;
    CodeUnit::decode(&bytes).map_err(|source| CatalogError::MalformedUnit {
        context: context.to_string(),
        name: name.to_string(),
        source,
    })
}
