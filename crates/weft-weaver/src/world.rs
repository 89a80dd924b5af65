//! Type World
//!
//! Hierarchy-aware cache of analyzed type metadata keyed by type name and
//! defining loader. Entries are created on first observation and live for
//! the life of the world. Concurrent first analysis of the same key may run
//! twice; the first insert wins and both callers see the same entry.

use crate::error::WeaveError;
use crate::loader::{delegation_chain, Loader, LoaderId};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, trace};
use weft_bytecode::{access, CodeUnit};

/// Method metadata kept by the world
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedMethod {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Access flags
    pub access: u32,
    /// Marker annotations
    pub markers: Vec<String>,
}

impl AnalyzedMethod {
    /// Whether the method carries the marker
    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    /// Whether the method can be overridden by a subtype
    pub fn is_overridable(&self) -> bool {
        self.access & (access::STATIC | access::PRIVATE | access::FINAL) == 0
            && !self.name.starts_with('<')
    }

    /// Whether the method has a body
    pub fn is_concrete(&self) -> bool {
        self.access & (access::ABSTRACT | access::NATIVE) == 0
    }
}

/// Analyzed type entry
#[derive(Debug)]
pub struct AnalyzedType {
    /// Type name
    pub name: String,
    /// Defining loader
    pub loader: LoaderId,
    /// Access flags
    pub access: u32,
    /// Superclass name
    pub super_name: Option<String>,
    /// Directly implemented interfaces
    pub interfaces: Vec<String>,
    /// Type-level markers
    pub markers: Vec<String>,
    /// Declared methods
    pub methods: Vec<AnalyzedMethod>,
    applied: Mutex<FxHashSet<String>>,
}

impl AnalyzedType {
    /// Analyze a decoded unit
    pub fn from_unit(unit: &CodeUnit, loader: LoaderId) -> Self {
        Self {
            name: unit.name.clone(),
            loader,
            access: unit.access,
            super_name: unit.super_name.clone(),
            interfaces: unit.interfaces.clone(),
            markers: unit.markers.clone(),
            methods: unit
                .methods
                .iter()
                .map(|m| AnalyzedMethod {
                    name: m.name.clone(),
                    descriptor: m.descriptor.clone(),
                    access: m.access,
                    markers: m.markers.clone(),
                })
                .collect(),
            applied: Mutex::new(FxHashSet::default()),
        }
    }

    /// Whether the type is an interface
    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Whether the type carries the marker
    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    /// Find a declared method
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&AnalyzedMethod> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Record a mixin or shim interface as applied
    ///
    /// Returns `false` if it was already recorded. Check and insert happen
    /// under one lock.
    pub fn mark_applied(&self, interface: &str) -> bool {
        self.applied.lock().insert(interface.to_string())
    }

    /// Whether a mixin or shim interface was applied to this type
    pub fn has_applied(&self, interface: &str) -> bool {
        self.applied.lock().contains(interface)
    }
}

/// Resolved ancestry of a type
#[derive(Debug, Default, Clone)]
pub struct Hierarchy {
    /// Superclass chain, nearest first
    pub superclasses: Vec<Arc<AnalyzedType>>,
    /// All interfaces reachable from the type, in discovery order
    pub interfaces: Vec<Arc<AnalyzedType>>,
    /// Per interface: depth of the deepest class that inherits it
    /// (0 = the type itself, `k` = `superclasses[k - 1]`)
    pub interface_depths: Vec<usize>,
}

impl Hierarchy {
    /// Interfaces also implemented by at least one superclass
    pub fn superclass_interfaces(&self) -> impl Iterator<Item = &Arc<AnalyzedType>> {
        self.interfaces
            .iter()
            .zip(&self.interface_depths)
            .filter(|(_, depth)| **depth > 0)
            .map(|(ty, _)| ty)
    }

    /// Superclasses followed by interfaces
    pub fn ancestors(&self) -> impl Iterator<Item = &Arc<AnalyzedType>> {
        self.superclasses.iter().chain(self.interfaces.iter())
    }

    /// Whether the named type is an ancestor
    pub fn contains(&self, name: &str) -> bool {
        self.ancestors().any(|t| t.name == name)
    }
}

/// Concurrent cache of analyzed types
#[derive(Default)]
pub struct TypeWorld {
    types: DashMap<(String, LoaderId), Arc<AnalyzedType>>,
}

impl TypeWorld {
    /// Create an empty world
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
        }
    }

    /// Number of analyzed types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether nothing has been analyzed yet
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Cached entry for a (name, loader) pair
    pub fn get(&self, name: &str, loader: LoaderId) -> Option<Arc<AnalyzedType>> {
        self.types
            .get(&(name.to_string(), loader))
            .map(|entry| entry.clone())
    }

    /// Record a unit being loaded by `loader`, returning the shared entry
    pub fn observe(&self, unit: &CodeUnit, loader: LoaderId) -> Arc<AnalyzedType> {
        if let Some(existing) = self.get(&unit.name, loader) {
            return existing;
        }
        let analyzed = Arc::new(AnalyzedType::from_unit(unit, loader));
        self.types
            .entry((unit.name.clone(), loader))
            .or_insert(analyzed)
            .clone()
    }

    /// Find a type visible from `loader`, analyzing it on first sight
    ///
    /// Follows parent-first delegation. Returns `None` when no loader in the
    /// chain defines the type or its unit does not decode.
    pub fn resolve(&self, name: &str, loader: &Arc<dyn Loader>) -> Option<Arc<AnalyzedType>> {
        for candidate in delegation_chain(loader) {
            let id = candidate.id();
            if let Some(existing) = self.get(name, id) {
                return Some(existing);
            }
            if let Some(bytes) = candidate.find_unit(name) {
                return match CodeUnit::decode(&bytes) {
                    Ok(unit) => Some(self.observe(&unit, id)),
                    Err(error) => {
                        debug!(unit = name, loader = %id, %error, "ancestor unit does not decode");
                        None
                    }
                };
            }
        }
        None
    }

    /// Resolve every ancestor of a type
    ///
    /// Unresolvable ancestors are skipped. Fails with
    /// [`WeaveError::Circularity`] when a type is reached again while its
    /// own ancestors are still being resolved.
    pub fn hierarchy(
        &self,
        name: &str,
        super_name: Option<&str>,
        interfaces: &[String],
        loader: &Arc<dyn Loader>,
    ) -> Result<Hierarchy, WeaveError> {
        let mut walk = Walk {
            world: self,
            loader,
            visiting: vec![name.to_string()],
            seen: FxHashSet::default(),
            index: FxHashMap::default(),
            hierarchy: Hierarchy::default(),
        };

        let mut next_super = super_name.map(str::to_string);
        let mut pending_interfaces: Vec<(String, usize)> =
            interfaces.iter().map(|i| (i.clone(), 0)).collect();
        // Superclass chain first, so it wins method resolution over interface defaults
        while let Some(current) = next_super.take() {
            walk.enter(&current)?;
            if !walk.seen.insert(current.clone()) {
                break;
            }
            let Some(ty) = self.resolve(&current, loader) else {
                trace!(unit = name, ancestor = %current, "ancestor not found");
                break;
            };
            walk.visiting.push(current);
            let depth = walk.hierarchy.superclasses.len() + 1;
            pending_interfaces.extend(ty.interfaces.iter().map(|i| (i.clone(), depth)));
            next_super = ty.super_name.clone();
            walk.hierarchy.superclasses.push(ty);
        }
        walk.visiting.truncate(1);

        for (interface, depth) in pending_interfaces {
            walk.interface(&interface, depth)?;
        }

        Ok(walk.hierarchy)
    }
}

struct Walk<'a> {
    world: &'a TypeWorld,
    loader: &'a Arc<dyn Loader>,
    visiting: Vec<String>,
    seen: FxHashSet<String>,
    index: FxHashMap<String, usize>,
    hierarchy: Hierarchy,
}

impl Walk<'_> {
    fn enter(&self, name: &str) -> Result<(), WeaveError> {
        if self.visiting.iter().any(|v| v == name) {
            let mut chain = self.visiting.clone();
            chain.push(name.to_string());
            return Err(WeaveError::Circularity { chain });
        }
        Ok(())
    }

    fn interface(&mut self, name: &str, depth: usize) -> Result<(), WeaveError> {
        self.enter(name)?;
        let ty = if let Some(&position) = self.index.get(name) {
            // Seen before; only revisit to carry a deeper inheriting class upwards
            if self.hierarchy.interface_depths[position] >= depth {
                return Ok(());
            }
            self.hierarchy.interface_depths[position] = depth;
            self.hierarchy.interfaces[position].clone()
        } else {
            if !self.seen.insert(name.to_string()) {
                return Ok(());
            }
            let Some(ty) = self.world.resolve(name, self.loader) else {
                return Ok(());
            };
            self.index.insert(name.to_string(), self.hierarchy.interfaces.len());
            self.hierarchy.interfaces.push(ty.clone());
            self.hierarchy.interface_depths.push(depth);
            ty
        };
        self.visiting.push(name.to_string());
        for parent in &ty.interfaces {
            self.interface(parent, depth)?;
        }
        self.visiting.pop();
        Ok(())
    }
}
