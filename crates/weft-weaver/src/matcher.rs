//! Rule Matcher
//!
//! Decides, for one unit and its resolved ancestry, which advice applies to
//! which methods, which inherited methods need an advised override, and
//! which mixins, shims and patches apply. Advice lists are kept
//! in catalog order, which is also the nesting order (first = outermost).

use crate::catalog::{markers, MixinType, Pointcut, RuleCatalog, ShimType};
use crate::config::WeaverConfig;
use crate::timer::is_timer_wrapper;
use crate::world::Hierarchy;
use rustc_hash::FxHashSet;
use tracing::warn;
use weft_bytecode::unit::{CONSTRUCTOR, STATIC_INIT};
use weft_bytecode::{access, CodeUnit, MethodDef};

/// Advice selected for a declared method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodPlan {
    /// Index into the unit's methods
    pub method: usize,
    /// Advice indexes, outermost first
    pub advice: Vec<usize>,
}

/// Override to synthesize for an inherited method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedOverride {
    /// Ancestor providing the implementation
    pub owner: String,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Access flags for the override
    pub access: u32,
    /// Advice indexes, outermost first
    pub advice: Vec<usize>,
}

/// One forwarding method of an applied shim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimDelegate {
    /// Shim method name
    pub name: String,
    /// Shared descriptor
    pub descriptor: String,
    /// Resolved target method name
    pub target: String,
}

/// Shim applied to the unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimPlan {
    /// Index into the catalog's shims
    pub shim: usize,
    /// Methods to emit (shim methods the unit already declares are omitted)
    pub delegates: Vec<ShimDelegate>,
}

/// Everything the transformer will do to one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPlan {
    /// Advised declared methods, in declaration order
    pub methods: Vec<MethodPlan>,
    /// Overrides to synthesize
    pub overrides: Vec<InheritedOverride>,
    /// Indexes of mixins to apply
    pub mixins: Vec<usize>,
    /// Shims to apply
    pub shims: Vec<ShimPlan>,
    /// Indexes of static-init patches to apply
    pub patches: Vec<usize>,
}

impl MatchPlan {
    /// Whether nothing applies
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
            && self.overrides.is_empty()
            && self.patches.is_empty()
            && !self.has_type_obligations()
    }

    /// Whether a mixin or shim applies
    pub fn has_type_obligations(&self) -> bool {
        !self.mixins.is_empty() || !self.shims.is_empty()
    }
}

/// Matches one unit against a catalog
pub struct Matcher<'a> {
    unit: &'a CodeUnit,
    hierarchy: &'a Hierarchy,
    catalog: &'a RuleCatalog,
    config: &'a WeaverConfig,
}

impl<'a> Matcher<'a> {
    /// Create a matcher
    pub fn new(
        unit: &'a CodeUnit,
        hierarchy: &'a Hierarchy,
        catalog: &'a RuleCatalog,
        config: &'a WeaverConfig,
    ) -> Self {
        Self {
            unit,
            hierarchy,
            catalog,
            config,
        }
    }

    /// Build the plan
    pub fn plan(&self) -> MatchPlan {
        let mut plan = MatchPlan::default();

        if !self.unit.is_interface() {
            self.plan_methods(&mut plan);
            self.plan_overrides(&mut plan);
            self.plan_shims(&mut plan);
        }
        if !self.unit.is_interface() || self.config.weave_interfaces_for_mixins {
            self.plan_mixins(&mut plan);
        }
        self.plan_patches(&mut plan);

        plan
    }

    // ===== Advice =====

    fn plan_methods(&self, plan: &mut MatchPlan) {
        for (index, method) in self.unit.methods.iter().enumerate() {
            if !is_eligible(method.access, &method.name) {
                continue;
            }
            let advice: Vec<usize> = self
                .catalog
                .advice()
                .iter()
                .enumerate()
                .filter(|(_, a)| self.restriction_holds(&a.pointcut))
                .filter(|(_, a)| self.matches_direct(&a.pointcut, method) || self.matches_inherited(&a.pointcut, method))
                .map(|(i, _)| i)
                .collect();
            if !advice.is_empty() {
                plan.methods.push(MethodPlan { method: index, advice });
            }
        }
    }

    fn matches_direct(&self, pointcut: &Pointcut, method: &MethodDef) -> bool {
        class_matches(pointcut, &self.unit.name, &self.unit.markers)
            && method_matches(pointcut, &method.name, &method.descriptor, &method.markers)
    }

    /// Overrides inherit advice matched on the overridden ancestor method
    fn matches_inherited(&self, pointcut: &Pointcut, method: &MethodDef) -> bool {
        if method.has_marker(markers::NO_INHERITED_ADVICE)
            || method.access & (access::STATIC | access::PRIVATE) != 0
            || method.is_constructor()
        {
            return false;
        }
        self.hierarchy.ancestors().any(|ancestor| {
            class_matches(pointcut, &ancestor.name, &ancestor.markers)
                && ancestor
                    .find_method(&method.name, &method.descriptor)
                    .map_or(false, |m| {
                        m.is_overridable() && method_matches(pointcut, &m.name, &m.descriptor, &m.markers)
                    })
        })
    }

    fn restriction_holds(&self, pointcut: &Pointcut) -> bool {
        match &pointcut.super_type_restriction {
            Some(required) => &self.unit.name == required || self.hierarchy.contains(required),
            None => true,
        }
    }

    /// Inherited concrete methods of a directly matched type get an advised override
    fn plan_overrides(&self, plan: &mut MatchPlan) {
        let mut declared: FxHashSet<(&str, &str)> = self
            .unit
            .methods
            .iter()
            .map(|m| (m.name.as_str(), m.descriptor.as_str()))
            .collect();

        // Superclasses resolve before interface defaults; first declaration wins
        for ancestor in self.hierarchy.ancestors() {
            for method in &ancestor.methods {
                if !declared.insert((method.name.as_str(), method.descriptor.as_str())) {
                    continue;
                }
                if !method.is_overridable() || !method.is_concrete() || !is_eligible(method.access, &method.name) {
                    continue;
                }

                let advice: Vec<usize> = self
                    .catalog
                    .advice()
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| {
                        let pointcut = &a.pointcut;
                        class_matches(pointcut, &self.unit.name, &self.unit.markers)
                            && self.restriction_holds(pointcut)
                            && method_matches(pointcut, &method.name, &method.descriptor, &method.markers)
                            // A matching class ancestor is woven in place
                            && (ancestor.is_interface()
                                || !class_matches(pointcut, &ancestor.name, &ancestor.markers))
                    })
                    .map(|(i, _)| i)
                    .collect();

                if !advice.is_empty() {
                    plan.overrides.push(InheritedOverride {
                        owner: ancestor.name.clone(),
                        name: method.name.clone(),
                        descriptor: method.descriptor.clone(),
                        access: method.access & !(access::ABSTRACT | access::NATIVE),
                        advice,
                    });
                }
            }
        }
    }

    // ===== Mixins =====

    fn plan_mixins(&self, plan: &mut MatchPlan) {
        let mut interfaces: FxHashSet<&str> = FxHashSet::default();
        for (index, mixin) in self.catalog.mixins().iter().enumerate() {
            let targeted = mixin.matches(&self.unit.name) || self.hierarchy.ancestors().any(|a| mixin.matches(&a.name));
            if !targeted
                || self.unit.interfaces.contains(&mixin.interface)
                || self.superclass_carries(mixin)
                || !interfaces.insert(mixin.interface.as_str())
            {
                continue;
            }
            plan.mixins.push(index);
        }
    }

    /// A superclass that is itself a target receives the mixin instead
    fn superclass_carries(&self, mixin: &MixinType) -> bool {
        self.hierarchy
            .superclasses
            .iter()
            .any(|s| mixin.matches(&s.name) || s.has_applied(&mixin.interface) || s.interfaces.contains(&mixin.interface))
            || self
                .hierarchy
                .superclass_interfaces()
                .any(|i| mixin.matches(&i.name) || i.name == mixin.interface)
    }

    // ===== Shims =====

    fn plan_shims(&self, plan: &mut MatchPlan) {
        for (index, shim) in self.catalog.shims().iter().enumerate() {
            if !shim.targets_type(&self.unit.name) || self.unit.interfaces.contains(&shim.iface) {
                continue;
            }
            match self.resolve_shim(shim) {
                Ok(delegates) => plan.shims.push(ShimPlan { shim: index, delegates }),
                Err(method) => warn!(
                    unit = %self.unit.name,
                    shim = %shim.iface,
                    method = %method,
                    "no target method for shim method, shim skipped"
                ),
            }
        }
    }

    fn resolve_shim(&self, shim: &ShimType) -> Result<Vec<ShimDelegate>, String> {
        let mut delegates = Vec::new();
        for method in &shim.shim_methods {
            if self.unit.find_method(&method.name, &method.descriptor).is_some() {
                continue;
            }
            let target = method
                .targets
                .iter()
                .find(|candidate| self.has_instance_method(candidate, &method.descriptor))
                .ok_or_else(|| format!("{}{}", method.name, method.descriptor))?;
            delegates.push(ShimDelegate {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                target: target.clone(),
            });
        }
        Ok(delegates)
    }

    fn has_instance_method(&self, name: &str, descriptor: &str) -> bool {
        let declared = self
            .unit
            .find_method(name, descriptor)
            .map_or(false, |m| !m.is_static());
        declared
            || self.hierarchy.superclasses.iter().any(|s| {
                s.find_method(name, descriptor)
                    .map_or(false, |m| m.access & (access::STATIC | access::PRIVATE) == 0)
            })
    }

    // ===== Patches =====

    fn plan_patches(&self, plan: &mut MatchPlan) {
        for (index, patch) in self.catalog.patches().iter().enumerate() {
            if patch.applies_to(self.unit) {
                plan.patches.push(index);
            }
        }
    }
}

/// Whether a method may receive advice at all
fn is_eligible(access_flags: u32, name: &str) -> bool {
    access_flags & (access::ABSTRACT | access::NATIVE | access::BRIDGE | access::SYNTHETIC) == 0
        && name != STATIC_INIT
        && !is_timer_wrapper(name)
}

fn class_matches(pointcut: &Pointcut, name: &str, type_markers: &[String]) -> bool {
    pointcut.class_name.matches(name)
        && pointcut
            .class_marker
            .as_ref()
            .map_or(true, |marker| type_markers.contains(marker))
}

fn method_matches(pointcut: &Pointcut, name: &str, descriptor: &str, method_markers: &[String]) -> bool {
    // Constructors only match when named outright
    if name == CONSTRUCTOR && !pointcut.method_name.names_explicitly(CONSTRUCTOR) {
        return false;
    }
    pointcut.method_name.matches(name)
        && pointcut.method_descriptor.matches(descriptor)
        && pointcut
            .method_marker
            .as_ref()
            .map_or(true, |marker| method_markers.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Advice, PointcutDecl, ShimMethod};
    use crate::loader::{Loader, MemoryLoader};
    use crate::world::TypeWorld;
    use std::sync::Arc;

    fn advice(class_name: &str, method_name: &str) -> Advice {
        let decl = PointcutDecl {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            ..Default::default()
        };
        Advice {
            advice_type: "adv/A".to_string(),
            pointcut: Pointcut::compile(&decl, "test").unwrap(),
            on_before: None,
            on_return: None,
            on_throw: None,
            on_after: None,
        }
    }

    fn method(access_flags: u32, name: &str, descriptor: &str) -> MethodDef {
        let mut method = MethodDef::new(access_flags, name, descriptor);
        if access_flags & (access::ABSTRACT | access::NATIVE) == 0 {
            method.code = vec![weft_bytecode::Opcode::ReturnVoid.to_u8()];
        }
        method
    }

    fn unit(name: &str, super_name: &str, methods: Vec<MethodDef>) -> CodeUnit {
        let mut unit = CodeUnit::new(name, Some(super_name.to_string()));
        unit.methods = methods;
        unit
    }

    fn plan_for(unit: &CodeUnit, catalog: &RuleCatalog, loader: &Arc<dyn Loader>) -> MatchPlan {
        let world = TypeWorld::new();
        let hierarchy = world
            .hierarchy(&unit.name, unit.super_name.as_deref(), &unit.interfaces, loader)
            .unwrap();
        let config = WeaverConfig::default();
        Matcher::new(unit, &hierarchy, catalog, &config).plan()
    }

    fn empty_loader() -> Arc<dyn Loader> {
        MemoryLoader::new(1, None).into_handle()
    }

    #[test]
    fn test_catalog_order_preserved() {
        let catalog = RuleCatalog::from_parts(
            vec![advice("app/T", "m"), advice("app/*", "*"), advice("other/X", "m")],
            vec![],
            vec![],
            vec![],
        );
        let t = unit("app/T", "weft/Object", vec![method(access::PUBLIC, "m", "()V")]);
        let plan = plan_for(&t, &catalog, &empty_loader());
        assert_eq!(plan.methods, vec![MethodPlan { method: 0, advice: vec![0, 1] }]);
    }

    #[test]
    fn test_ineligible_methods_skipped() {
        let catalog = RuleCatalog::from_parts(vec![advice("app/T", "*")], vec![], vec![], vec![]);
        let t = unit(
            "app/T",
            "weft/Object",
            vec![
                method(access::PUBLIC | access::ABSTRACT, "a", "()V"),
                method(access::PUBLIC | access::NATIVE, "n", "()V"),
                method(access::PUBLIC | access::BRIDGE, "b", "()V"),
                method(access::STATIC, STATIC_INIT, "()V"),
                method(access::PRIVATE, "m$weft$timer$x$0", "()V"),
                method(access::PUBLIC, CONSTRUCTOR, "()V"),
                method(access::PUBLIC, "ok", "()V"),
            ],
        );
        let plan = plan_for(&t, &catalog, &empty_loader());
        assert_eq!(plan.methods, vec![MethodPlan { method: 6, advice: vec![0] }]);
    }

    #[test]
    fn test_constructor_needs_explicit_name() {
        let catalog = RuleCatalog::from_parts(vec![advice("app/T", "<init>|run")], vec![], vec![], vec![]);
        let t = unit("app/T", "weft/Object", vec![method(access::PUBLIC, CONSTRUCTOR, "()V")]);
        let plan = plan_for(&t, &catalog, &empty_loader());
        assert_eq!(plan.methods.len(), 1);
    }

    #[test]
    fn test_override_inherits_and_opts_out() {
        let mut base = unit("app/Base", "weft/Object", vec![method(access::PUBLIC | access::ABSTRACT, "handle", "()V")]);
        base.access |= access::ABSTRACT;
        let loader = MemoryLoader::new(1, None)
            .with_unit("app/Base", base.encode())
            .into_handle();
        let catalog = RuleCatalog::from_parts(vec![advice("app/Base", "handle")], vec![], vec![], vec![]);

        let sub = unit("app/Sub", "app/Base", vec![method(access::PUBLIC, "handle", "()V")]);
        assert_eq!(plan_for(&sub, &catalog, &loader).methods.len(), 1);

        let mut opted_out = method(access::PUBLIC, "handle", "()V");
        opted_out.markers.push(markers::NO_INHERITED_ADVICE.to_string());
        let sub = unit("app/Sub", "app/Base", vec![opted_out]);
        assert!(plan_for(&sub, &catalog, &loader).is_empty());
    }

    #[test]
    fn test_inherited_concrete_method_gets_override() {
        let base = unit(
            "lib/Base",
            "weft/Object",
            vec![
                method(access::PUBLIC, "run", "()V"),
                method(access::PUBLIC | access::FINAL, "fixed", "()V"),
            ],
        );
        let loader = MemoryLoader::new(1, None)
            .with_unit("lib/Base", base.encode())
            .into_handle();
        let catalog = RuleCatalog::from_parts(vec![advice("app/Sub", "*")], vec![], vec![], vec![]);

        let sub = unit("app/Sub", "lib/Base", vec![]);
        let plan = plan_for(&sub, &catalog, &loader);
        assert_eq!(plan.overrides.len(), 1);
        assert_eq!(plan.overrides[0].owner, "lib/Base");
        assert_eq!(plan.overrides[0].name, "run");
    }

    #[test]
    fn test_interface_default_gets_override() {
        let mut greeter = unit("lib/Greeter", "weft/Object", vec![method(access::PUBLIC, "greet", "()V")]);
        greeter.access = access::PUBLIC | access::INTERFACE | access::ABSTRACT;
        let base = unit("lib/Base", "weft/Object", vec![method(access::PUBLIC, "greet", "()V")]);
        let loader = MemoryLoader::new(1, None)
            .with_unit("lib/Greeter", greeter.encode())
            .with_unit("lib/Base", base.encode())
            .into_handle();
        let catalog = RuleCatalog::from_parts(vec![advice("app/Sub", "greet")], vec![], vec![], vec![]);

        let mut sub = unit("app/Sub", "weft/Object", vec![]);
        sub.interfaces.push("lib/Greeter".to_string());
        let plan = plan_for(&sub, &catalog, &loader);
        assert_eq!(
            plan.overrides,
            vec![InheritedOverride {
                owner: "lib/Greeter".to_string(),
                name: "greet".to_string(),
                descriptor: "()V".to_string(),
                access: access::PUBLIC,
                advice: vec![0],
            }]
        );

        // A superclass declaration wins over the interface default
        let mut sub = unit("app/Sub", "lib/Base", vec![]);
        sub.interfaces.push("lib/Greeter".to_string());
        let plan = plan_for(&sub, &catalog, &loader);
        assert_eq!(plan.overrides.len(), 1);
        assert_eq!(plan.overrides[0].owner, "lib/Base");
    }

    #[test]
    fn test_super_type_restriction() {
        let mut restricted = advice("app/*", "m");
        restricted.pointcut.super_type_restriction = Some("lib/Servlet".to_string());
        let catalog = RuleCatalog::from_parts(vec![restricted], vec![], vec![], vec![]);
        let t = unit("app/T", "weft/Object", vec![method(access::PUBLIC, "m", "()V")]);
        assert!(plan_for(&t, &catalog, &empty_loader()).is_empty());
    }

    #[test]
    fn test_shim_skipped_without_target() {
        let shim = ShimType {
            iface: "shim/Conn".to_string(),
            targets: vec!["app/T".to_string()],
            shim_methods: vec![ShimMethod {
                name: "weft$url".to_string(),
                descriptor: "()S".to_string(),
                targets: vec!["getUrl".to_string(), "url".to_string()],
            }],
        };
        let catalog = RuleCatalog::from_parts(vec![], vec![], vec![shim], vec![]);

        let t = unit("app/T", "weft/Object", vec![method(access::PUBLIC, "url", "()S")]);
        let plan = plan_for(&t, &catalog, &empty_loader());
        assert_eq!(plan.shims[0].delegates[0].target, "url");

        let t = unit("app/T", "weft/Object", vec![method(access::PUBLIC, "other", "()S")]);
        assert!(plan_for(&t, &catalog, &empty_loader()).shims.is_empty());
    }

    #[test]
    fn test_interfaces_get_no_advice() {
        let catalog = RuleCatalog::from_parts(vec![advice("app/*", "*")], vec![], vec![], vec![]);
        let mut iface = unit("app/I", "weft/Object", vec![method(access::PUBLIC, "dflt", "()V")]);
        iface.access |= access::INTERFACE | access::ABSTRACT;
        assert!(plan_for(&iface, &catalog, &empty_loader()).is_empty());
    }
}
