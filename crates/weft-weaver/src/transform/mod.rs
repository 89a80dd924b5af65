//! Transformer
//!
//! Applies a [`MatchPlan`] to a decoded unit. Edits run in a fixed order:
//! static-init patches, mixins, shims, synthesized overrides, then advice.
//! New methods are only ever appended, so the method indexes recorded in the
//! plan stay valid throughout.

mod advice;
mod mixin;
mod patch;
mod shim;

use crate::catalog::{markers, RuleCatalog};
use crate::config::WeaverConfig;
use crate::error::WeaveError;
use crate::matcher::MatchPlan;
use weft_bytecode::{
    access, CodeBody, CodeError, CodeUnit, ConstantPool, Insn, MemberRef, MethodDef, MethodDescriptor, Opcode,
};

/// Apply every edit of `plan` to `unit`
pub fn apply(
    unit: &mut CodeUnit,
    plan: &MatchPlan,
    catalog: &RuleCatalog,
    config: &WeaverConfig,
) -> Result<(), WeaveError> {
    for &index in &plan.patches {
        if let Some(p) = catalog.patches().get(index) {
            patch::apply(unit, p)?;
        }
    }
    for &index in &plan.mixins {
        if let Some(m) = catalog.mixins().get(index) {
            mixin::apply(unit, m)?;
        }
    }
    for shim_plan in &plan.shims {
        if let Some(s) = catalog.shims().get(shim_plan.shim) {
            shim::apply(unit, s, &shim_plan.delegates)?;
        }
    }

    let mut advised: Vec<(usize, Vec<usize>)> = plan
        .methods
        .iter()
        .map(|m| (m.method, m.advice.clone()))
        .collect();
    for o in &plan.overrides {
        let callee = MemberRef::new(&o.owner, &o.name, &o.descriptor);
        let method = forwarding_method(unit, o.access, &o.name, Opcode::InvokeSpecial, &callee)?;
        unit.methods.push(method);
        advised.push((unit.methods.len() - 1, o.advice.clone()));
    }

    for (index, advice) in advised {
        let selected: Vec<_> = advice.iter().filter_map(|&i| catalog.advice().get(i)).collect();
        advice::apply(unit, index, &selected, config.timer_wrapper_methods)?;
    }
    Ok(())
}

/// Make a rule-definition unit and its advice methods public
///
/// Returns whether anything changed.
pub fn expose_rule_definition(unit: &mut CodeUnit) -> bool {
    let mut changed = make_public(&mut unit.access);
    for method in &mut unit.methods {
        if markers::ADVICE_METHODS.iter().any(|m| method.has_marker(m)) {
            changed |= make_public(&mut method.access);
        }
    }
    changed
}

fn make_public(flags: &mut u32) -> bool {
    let public = (*flags & !access::VISIBILITY) | access::PUBLIC;
    let changed = public != *flags;
    *flags = public;
    changed
}

// ===== Shared helpers =====

/// `owner.name` + descriptor label used in errors
fn method_label(unit: &CodeUnit, method: &MethodDef) -> String {
    format!("{}.{}{}", unit.name, method.name, method.descriptor)
}

fn code_error(label: &str) -> impl Fn(CodeError) -> WeaveError + '_ {
    move |source| WeaveError::Code {
        method: label.to_string(),
        source,
    }
}

/// Encode `body` into `method`, recomputing its frame sizes
fn store_body(method: &mut MethodDef, body: &CodeBody, pool: &ConstantPool, label: &str) -> Result<(), WeaveError> {
    let max_stack = body.compute_max_stack(pool).map_err(code_error(label))?;
    let (code, handlers) = body.encode().map_err(code_error(label))?;
    method.code = code;
    method.handlers = handlers;
    method.max_stack = max_stack;
    method.max_locals = method.max_locals.max(body.locals_used());
    Ok(())
}

/// Number of local slots taken by the receiver and parameters
fn param_slots(descriptor: &MethodDescriptor, is_static: bool) -> u16 {
    (descriptor.arg_slots() + usize::from(!is_static)) as u16
}

/// Body that forwards all arguments to `callee` and returns its result
fn forwarding_body(
    pool: &mut ConstantPool,
    descriptor: &MethodDescriptor,
    is_static: bool,
    invoke: Opcode,
    callee: &MemberRef,
) -> CodeBody {
    let mut insns: Vec<Insn> = (0..param_slots(descriptor, is_static)).map(Insn::load).collect();
    insns.push(Insn::member(invoke, pool.intern_member(callee)));
    insns.push(Insn::op(if descriptor.returns_value() {
        Opcode::Return
    } else {
        Opcode::ReturnVoid
    }));
    CodeBody {
        insns,
        handlers: Vec::new(),
    }
}

/// Instance method `name` of `unit` forwarding to `callee`, which shares its descriptor
fn forwarding_method(
    unit: &mut CodeUnit,
    access_flags: u32,
    name: &str,
    invoke: Opcode,
    callee: &MemberRef,
) -> Result<MethodDef, WeaveError> {
    let parsed = MethodDescriptor::parse(&callee.descriptor)?;
    let mut method = MethodDef::new(access_flags, name, callee.descriptor.as_str());
    method.max_locals = param_slots(&parsed, false);
    let body = forwarding_body(&mut unit.constants, &parsed, false, invoke, callee);
    let label = method_label(unit, &method);
    store_body(&mut method, &body, &unit.constants, &label)?;
    Ok(method)
}
