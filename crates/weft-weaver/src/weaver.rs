//! Weaver
//!
//! Entry point called by the host for every unit it loads. A weave never
//! fails past this boundary: every error is logged and degrades to leaving
//! the unit as loaded.
//!
//! # Per-unit states
//!
//! ```text
//! Loaded -> Analyzing -> ShortCircuited          -> original bytes
//!                     -> RuleDefinitionFallback  -> visibility-fixed bytes
//!                     -> CircularityAborted      -> original bytes
//!                     -> InterfaceSuppressed     -> original bytes
//!                     -> FullyWoven              -> rewritten bytes
//! ```

use crate::catalog::{markers, CatalogHandle, RuleCatalog};
use crate::config::WeaverConfig;
use crate::error::WeaveError;
use crate::loader::Loader;
use crate::matcher::{MatchPlan, Matcher};
use crate::timer::{NopTimerService, TimerGuard, WeavingTimerService};
use crate::transform;
use crate::world::{AnalyzedType, TypeWorld};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use weft_bytecode::{verify_unit, CodeUnit};

/// Result of weaving one unit
#[derive(Debug)]
pub enum WeaveOutcome {
    /// No rule applies; keep the unit as loaded
    Unchanged,
    /// Rules applied; new unit bytes
    Rewritten(Vec<u8>),
    /// Interface without mixin or shim obligations; keep the unit as loaded
    Suppressed,
    /// Rule-definition unit; visibility fixes only
    FallbackRewritten(Vec<u8>),
    /// Weaving failed; keep the unit as loaded
    Failed(WeaveError),
}

impl WeaveOutcome {
    /// Bytes to hand back to the host, `None` meaning "leave unchanged"
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            WeaveOutcome::Rewritten(bytes) | WeaveOutcome::FallbackRewritten(bytes) => Some(bytes),
            WeaveOutcome::Unchanged | WeaveOutcome::Suppressed | WeaveOutcome::Failed(_) => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            WeaveOutcome::Unchanged => "unchanged",
            WeaveOutcome::Rewritten(_) => "rewritten",
            WeaveOutcome::Suppressed => "suppressed",
            WeaveOutcome::FallbackRewritten(_) => "fallback-rewritten",
            WeaveOutcome::Failed(_) => "failed",
        }
    }
}

/// Result of the structural traversal that precedes any rewrite
enum Traversal {
    Matched(MatchPlan),
    ShortCircuit,
    RuleDefinitionFound,
    Circularity(WeaveError),
}

/// Weaving orchestrator
///
/// Shared by every loading thread; holds no per-weave state.
pub struct Weaver {
    catalog: Arc<CatalogHandle>,
    world: Arc<TypeWorld>,
    timers: Box<dyn WeavingTimerService>,
    config: WeaverConfig,
}

impl Weaver {
    /// Create a weaver over a catalog handle and a type world
    pub fn new(catalog: Arc<CatalogHandle>, world: Arc<TypeWorld>, config: WeaverConfig) -> Self {
        Self {
            catalog,
            world,
            timers: Box::new(NopTimerService),
            config,
        }
    }

    /// Time every weave with `service`
    pub fn with_timer_service(mut self, service: impl WeavingTimerService + 'static) -> Self {
        self.timers = Box::new(service);
        self
    }

    /// Catalog handle, for reloads
    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    /// Shared type world
    pub fn world(&self) -> &Arc<TypeWorld> {
        &self.world
    }

    /// Active configuration
    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    /// Host boundary: new bytes, or `None` to keep the unit as loaded
    ///
    /// Panics inside the weave are caught here.
    pub fn transform(
        &self,
        bytes: &[u8],
        name: &str,
        origin: Option<&str>,
        loader: &Arc<dyn Loader>,
    ) -> Option<Vec<u8>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.weave(bytes, name, origin, loader))) {
            Ok(outcome) => outcome.into_bytes(),
            Err(_) => {
                error!(unit = name, loader = %loader.id(), "weaving panicked, unit left unchanged");
                None
            }
        }
    }

    /// Weave one unit
    pub fn weave(&self, bytes: &[u8], name: &str, origin: Option<&str>, loader: &Arc<dyn Loader>) -> WeaveOutcome {
        if self.config.timer_wrapper_methods {
            weave_weft_timer_weaving_0(self, bytes, name, origin, loader)
        } else {
            self.weave_unit(bytes, name, origin, loader)
        }
    }

    fn weave_unit(&self, bytes: &[u8], name: &str, origin: Option<&str>, loader: &Arc<dyn Loader>) -> WeaveOutcome {
        let _timer = TimerGuard::start(self.timers.as_ref());
        let catalog = self.catalog.snapshot();

        // Cheap header read; integrity hashing only runs for the expected unit
        if let Some(actual) = CodeUnit::peek_name(bytes).filter(|actual| actual != name) {
            return name_mismatch(name, actual);
        }
        let unit = match CodeUnit::decode(bytes) {
            Ok(unit) => unit,
            Err(error) => {
                warn!(unit = name, %error, "unit does not decode, left unchanged");
                return WeaveOutcome::Failed(error.into());
            }
        };
        if unit.name != name {
            return name_mismatch(name, unit.name);
        }
        let entry = self.world.observe(&unit, loader.id());

        let outcome = match self.traverse(&unit, &catalog, loader) {
            Traversal::ShortCircuit => WeaveOutcome::Unchanged,
            Traversal::Circularity(error) => {
                error!(unit = name, loader = %loader.id(), %error, "circular type hierarchy, unit left unchanged");
                WeaveOutcome::Unchanged
            }
            Traversal::RuleDefinitionFound => fallback(unit),
            Traversal::Matched(plan) => self.weave_plan(unit, bytes, &plan, &catalog, &entry),
        };
        debug!(unit = name, origin = origin.unwrap_or(""), outcome = outcome.kind(), "weave finished");
        outcome
    }

    fn traverse(&self, unit: &CodeUnit, catalog: &RuleCatalog, loader: &Arc<dyn Loader>) -> Traversal {
        if catalog.is_rule_definition(&unit.name) || unit.markers.iter().any(|m| m == markers::POINTCUT) {
            return Traversal::RuleDefinitionFound;
        }
        if catalog.is_empty() {
            return Traversal::ShortCircuit;
        }

        let hierarchy = match self
            .world
            .hierarchy(&unit.name, unit.super_name.as_deref(), &unit.interfaces, loader)
        {
            Ok(hierarchy) => hierarchy,
            Err(error) => return Traversal::Circularity(error),
        };
        let plan = Matcher::new(unit, &hierarchy, catalog, &self.config).plan();
        if plan.is_empty() {
            Traversal::ShortCircuit
        } else {
            Traversal::Matched(plan)
        }
    }

    fn weave_plan(
        &self,
        mut unit: CodeUnit,
        original: &[u8],
        plan: &MatchPlan,
        catalog: &RuleCatalog,
        entry: &AnalyzedType,
    ) -> WeaveOutcome {
        if unit.is_interface() && !plan.has_type_obligations() {
            return WeaveOutcome::Suppressed;
        }

        if let Err(error) = transform::apply(&mut unit, plan, catalog, &self.config) {
            warn!(unit = %unit.name, %error, "weaving failed, unit left unchanged");
            return WeaveOutcome::Failed(error);
        }

        let applied = plan
            .mixins
            .iter()
            .filter_map(|&i| catalog.mixins().get(i).map(|m| &m.interface))
            .chain(plan.shims.iter().filter_map(|s| catalog.shims().get(s.shim).map(|s| &s.iface)));
        for interface in applied {
            if entry.mark_applied(interface) {
                trace!(unit = %unit.name, interface = %interface, "recorded applied interface");
            }
        }

        let woven = unit.encode();
        if self.config.verify {
            verify_bytes(&unit.name, "original", original);
            verify_bytes(&unit.name, "woven", &woven);
        }
        WeaveOutcome::Rewritten(woven)
    }
}

/// Marker frame attributing weaving cost in timer-wrapper mode
#[inline(never)]
fn weave_weft_timer_weaving_0(
    weaver: &Weaver,
    bytes: &[u8],
    name: &str,
    origin: Option<&str>,
    loader: &Arc<dyn Loader>,
) -> WeaveOutcome {
    weaver.weave_unit(bytes, name, origin, loader)
}

fn name_mismatch(expected: &str, actual: String) -> WeaveOutcome {
    warn!(unit = expected, actual = %actual, "unit name mismatch, left unchanged");
    WeaveOutcome::Failed(WeaveError::NameMismatch {
        expected: expected.to_string(),
        actual,
    })
}

fn fallback(mut unit: CodeUnit) -> WeaveOutcome {
    if transform::expose_rule_definition(&mut unit) {
        WeaveOutcome::FallbackRewritten(unit.encode())
    } else {
        WeaveOutcome::Unchanged
    }
}

/// Decode and verify, logging rather than failing
fn verify_bytes(name: &str, stage: &'static str, bytes: &[u8]) {
    let result = CodeUnit::decode(bytes)
        .map_err(|e| e.to_string())
        .and_then(|unit| verify_unit(&unit).map_err(|e| e.to_string()));
    if let Err(error) = result {
        warn!(unit = name, stage, %error, "unit failed verification");
    }
}
