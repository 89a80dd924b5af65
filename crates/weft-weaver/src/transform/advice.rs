//! Advice wrapping
//!
//! A method advised by `[a, b]` runs as
//!
//! ```text
//! a.before; a.timer = start(a.label); b.before; b.timer = start(b.label)
//! <original body, each return jumping to the exit block>
//! exit:  b.timer.stop; b.on_return; b.on_after; a.timer.stop; a.on_return; a.on_after; return
//! catch: b.timer.stop; b.on_throw; b.on_after; a.timer.stop; a.on_throw; a.on_after; rethrow
//! ```
//!
//! The catch-all handler covers the original body only and is appended
//! after any existing handler, so it is the outermost.

use super::{code_error, forwarding_body, method_label, param_slots, store_body};
use crate::catalog::Advice;
use crate::error::WeaveError;
use crate::timer::{timer_start, timer_stop, wrapped_name};
use weft_bytecode::{
    access, CodeBody, CodeUnit, ConstantPool, Insn, InsnHandler, MemberRef, MethodDescriptor, Opcode,
};

/// Wrap method `index` of `unit` with `advice`, outermost first
pub(super) fn apply(
    unit: &mut CodeUnit,
    index: usize,
    advice: &[&Advice],
    timer_wrapper: bool,
) -> Result<(), WeaveError> {
    let Some(method) = unit.methods.get(index) else {
        return Ok(());
    };
    if advice.is_empty() {
        return Ok(());
    }

    if timer_wrapper && !method.is_constructor() {
        let label = advice
            .iter()
            .map(|a| a.pointcut.timer_label())
            .find(|label| !label.is_empty());
        if let Some(label) = label {
            extract_body(unit, index, label)?;
        }
    }
    wrap(unit, index, advice)
}

/// Move the body of method `index` into a private synthetic method and
/// leave a forwarding call in its place
fn extract_body(unit: &mut CodeUnit, index: usize, label: &str) -> Result<(), WeaveError> {
    let method = &unit.methods[index];
    let mut n = 0;
    let name = loop {
        let candidate = wrapped_name(&method.name, label, n);
        if unit.find_method(&candidate, &method.descriptor).is_none() {
            break candidate;
        }
        n += 1;
    };

    let mut wrapped = method.clone();
    wrapped.name = name;
    wrapped.access = (method.access & (access::STATIC | access::SYNCHRONIZED)) | access::PRIVATE | access::SYNTHETIC;
    wrapped.markers.clear();

    let descriptor = MethodDescriptor::parse(&method.descriptor)?;
    let is_static = method.is_static();
    let invoke = if is_static {
        Opcode::InvokeStatic
    } else {
        Opcode::InvokeSpecial
    };
    let callee = MemberRef::new(&unit.name, &wrapped.name, &wrapped.descriptor);
    let label = method_label(unit, method);
    let body = forwarding_body(&mut unit.constants, &descriptor, is_static, invoke, &callee);

    let target = &mut unit.methods[index];
    target.access &= !access::SYNCHRONIZED;
    target.handlers.clear();
    target.max_locals = param_slots(&descriptor, is_static);
    store_body(target, &body, &unit.constants, &label)?;
    unit.methods.push(wrapped);
    Ok(())
}

/// Constant indexes and slots used by one advice layer
struct Layer {
    on_before: Option<u32>,
    on_return: Option<u32>,
    on_throw: Option<u32>,
    on_after: Option<u32>,
    timer: Option<Timer>,
}

struct Timer {
    label: u32,
    slot: u16,
    start: u32,
    stop: u32,
}

impl Layer {
    fn new(advice: &Advice, pool: &mut ConstantPool, next_local: &mut u16) -> Self {
        let timer = advice.is_timed().then(|| {
            let slot = *next_local;
            *next_local += 1;
            Timer {
                label: pool.intern_string(advice.pointcut.timer_label()),
                slot,
                start: pool.intern_member(&timer_start()),
                stop: pool.intern_member(&timer_stop()),
            }
        });
        let mut intern = |member: &Option<MemberRef>| member.as_ref().map(|m| pool.intern_member(m));
        Self {
            on_before: intern(&advice.on_before),
            on_return: intern(&advice.on_return),
            on_throw: intern(&advice.on_throw),
            on_after: intern(&advice.on_after),
            timer,
        }
    }

    fn enter(&self, out: &mut Vec<Insn>) {
        if let Some(before) = self.on_before {
            out.push(Insn::member(Opcode::InvokeStatic, before));
        }
        if let Some(timer) = &self.timer {
            out.push(Insn::const_str(timer.label));
            out.push(Insn::member(Opcode::InvokeStatic, timer.start));
            out.push(Insn::store(timer.slot));
        }
    }

    /// Stop the timer, then run `callback` and `on_after`
    fn exit(&self, callback: Option<u32>, out: &mut Vec<Insn>) {
        if let Some(timer) = &self.timer {
            out.push(Insn::load(timer.slot));
            out.push(Insn::member(Opcode::InvokeVirtual, timer.stop));
        }
        for member in [callback, self.on_after].into_iter().flatten() {
            out.push(Insn::member(Opcode::InvokeStatic, member));
        }
    }
}

fn wrap(unit: &mut CodeUnit, index: usize, advice: &[&Advice]) -> Result<(), WeaveError> {
    let method = &unit.methods[index];
    let label = method_label(unit, method);
    let descriptor = MethodDescriptor::parse(&method.descriptor)?;
    let body = CodeBody::decode(&method.code, &method.handlers).map_err(code_error(&label))?;
    let depths = body.stack_depths(&unit.constants).map_err(code_error(&label))?;
    // Operands left below the return value, dropped before joining the exit block
    let leftover = |index: usize, returned: u32| {
        depths
            .get(index)
            .copied()
            .flatten()
            .map_or(0, |depth| depth.saturating_sub(returned))
    };

    let mut next_local = method
        .max_locals
        .max(body.locals_used())
        .max(param_slots(&descriptor, method.is_static()));
    let layers: Vec<Layer> = advice
        .iter()
        .map(|a| Layer::new(a, &mut unit.constants, &mut next_local))
        .collect();
    let mut allocate = || {
        let slot = next_local;
        next_local += 1;
        slot
    };
    let ret_slot = descriptor.returns_value().then(&mut allocate);
    let exc_slot = advice.iter().any(|a| a.handles_throw()).then(&mut allocate);

    let mut prefix = Vec::new();
    for layer in &layers {
        layer.enter(&mut prefix);
    }
    let prefix_len = prefix.len();

    let (mut woven, exits) = body.rewrite(prefix, |index, insn, out| match (insn.opcode, ret_slot) {
        (Opcode::Return, Some(slot)) => {
            out.emit(Insn::store(slot));
            for _ in 0..leftover(index, 1) {
                out.emit(Insn::op(Opcode::Pop));
            }
            out.emit_forward(Opcode::Jmp);
        }
        (Opcode::ReturnVoid, _) => {
            for _ in 0..leftover(index, 0) {
                out.emit(Insn::op(Opcode::Pop));
            }
            out.emit_forward(Opcode::Jmp);
        }
        _ => out.emit(*insn),
    });
    let covered_end = woven.insns.len();

    let exit = woven.insns.len();
    woven.bind_jumps(&exits, exit);
    for layer in layers.iter().rev() {
        layer.exit(layer.on_return, &mut woven.insns);
    }
    match ret_slot {
        Some(slot) => {
            woven.insns.push(Insn::load(slot));
            woven.insns.push(Insn::op(Opcode::Return));
        }
        None => woven.insns.push(Insn::op(Opcode::ReturnVoid)),
    }

    if let Some(slot) = exc_slot.filter(|_| covered_end > prefix_len) {
        let target = woven.insns.len();
        woven.insns.push(Insn::store(slot));
        for layer in layers.iter().rev() {
            layer.exit(layer.on_throw, &mut woven.insns);
        }
        woven.insns.push(Insn::load(slot));
        woven.insns.push(Insn::op(Opcode::Throw));
        woven.handlers.push(InsnHandler {
            start: prefix_len,
            end: covered_end,
            target,
            catch_type: None,
        });
    }

    let target = &mut unit.methods[index];
    target.max_locals = target.max_locals.max(next_local);
    store_body(target, &woven, &unit.constants, &label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Pointcut, PointcutDecl};
    use weft_bytecode::MethodDef;

    fn advice(name: &str, timer: &str) -> Advice {
        let decl = PointcutDecl {
            class_name: "app/T".to_string(),
            method_name: "*".to_string(),
            timer: timer.to_string(),
            ..Default::default()
        };
        let hook = |method: &str| Some(MemberRef::new(name, method, "()V"));
        Advice {
            advice_type: name.to_string(),
            pointcut: Pointcut::compile(&decl, "test").unwrap(),
            on_before: hook("before"),
            on_return: hook("onReturn"),
            on_throw: hook("onThrow"),
            on_after: hook("after"),
        }
    }

    /// `int twice(int x) { return x + x; }`
    fn unit() -> CodeUnit {
        let mut unit = CodeUnit::new("app/T", Some("weft/Object".to_string()));
        let mut method = MethodDef::new(access::PUBLIC, "twice", "(I)I");
        let body = CodeBody {
            insns: vec![
                Insn::load(1),
                Insn::load(1),
                Insn::op(Opcode::Iadd),
                Insn::op(Opcode::Return),
            ],
            handlers: Vec::new(),
        };
        let (code, _) = body.encode().unwrap();
        method.code = code;
        method.max_stack = 2;
        method.max_locals = 2;
        unit.methods.push(method);
        unit
    }

    fn disassemble(unit: &CodeUnit, index: usize) -> String {
        let method = &unit.methods[index];
        CodeBody::decode(&method.code, &method.handlers)
            .unwrap()
            .disassemble(&unit.constants)
    }

    #[test]
    fn test_nesting_follows_advice_order() {
        let mut unit = unit();
        let (outer, inner) = (advice("adv/Outer", ""), advice("adv/Inner", ""));
        apply(&mut unit, 0, &[&outer, &inner], false).unwrap();

        let text = disassemble(&unit, 0);
        let position = |needle: &str| text.find(needle).unwrap();
        assert!(position("adv/Outer.before") < position("adv/Inner.before"));
        assert!(position("adv/Inner.onReturn") < position("adv/Outer.onReturn"));
        assert!(position("adv/Inner.onThrow") < position("adv/Outer.onThrow"));
        assert!(text.contains("catch * ["));
        weft_bytecode::verify_unit(&unit).unwrap();
    }

    #[test]
    fn test_timer_label_and_locals() {
        let mut unit = unit();
        let timed = advice("adv/Timing", "twice");
        apply(&mut unit, 0, &[&timed], false).unwrap();

        let text = disassemble(&unit, 0);
        assert!(text.contains("CONST_STR \"twice\""));
        assert!(text.contains("weft/TimerRuntime.start(S)Lweft/TimerHandle;"));
        assert!(text.contains("weft/TimerHandle.stop()V"));
        // timer, return value, exception
        assert_eq!(unit.methods[0].max_locals, 5);
        weft_bytecode::verify_unit(&unit).unwrap();
    }

    #[test]
    fn test_timer_wrapper_extracts_body() {
        let mut unit = unit();
        let timed = advice("adv/Timing", "twice");
        apply(&mut unit, 0, &[&timed], true).unwrap();

        assert_eq!(unit.methods.len(), 2);
        let wrapped = &unit.methods[1];
        assert_eq!(wrapped.name, "twice$weft$timer$twice$0");
        assert_eq!(wrapped.access, access::PRIVATE | access::SYNTHETIC);
        assert!(disassemble(&unit, 0).contains("INVOKE_SPECIAL app/T.twice$weft$timer$twice$0(I)I"));
        assert!(disassemble(&unit, 1).contains("IADD"));
        weft_bytecode::verify_unit(&unit).unwrap();
    }

    #[test]
    fn test_uneven_return_depths_join_exit() {
        let mut unit = CodeUnit::new("app/T", Some("weft/Object".to_string()));
        let mut method = MethodDef::new(access::PUBLIC, "pick", "(Z)I");
        let int = |value| Insn {
            opcode: Opcode::ConstI32,
            operand: weft_bytecode::Operand::I32(value),
        };
        let body = CodeBody {
            insns: vec![
                Insn::load(1),
                Insn::jump(Opcode::JmpIfFalse, 4),
                int(1),
                Insn::op(Opcode::Return),
                int(7),
                int(2),
                Insn::op(Opcode::Return),
            ],
            handlers: Vec::new(),
        };
        method.max_stack = body.compute_max_stack(&unit.constants).unwrap();
        method.code = body.encode().unwrap().0;
        method.max_locals = 2;
        unit.methods.push(method);
        weft_bytecode::verify_unit(&unit).unwrap();

        let timed = advice("adv/Timing", "pick");
        apply(&mut unit, 0, &[&timed], false).unwrap();

        let text = disassemble(&unit, 0);
        assert_eq!(text.matches("POP\n").count(), 1);
        weft_bytecode::verify_unit(&unit).unwrap();
    }

    #[test]
    fn test_untimed_advice_without_throw_hooks_adds_no_handler() {
        let mut unit = unit();
        let mut plain = advice("adv/Plain", "");
        plain.on_throw = None;
        plain.on_after = None;
        apply(&mut unit, 0, &[&plain], false).unwrap();
        assert!(unit.methods[0].handlers.is_empty());
        assert!(!unit.constants.members.iter().any(|m| m.owner == "weft/TimerRuntime"));
    }
}
