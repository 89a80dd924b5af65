//! Static initializer patching and method stubs

use super::{code_error, method_label, store_body};
use crate::catalog::StaticInitPatch;
use crate::error::WeaveError;
use tracing::debug;
use weft_bytecode::{CodeBody, CodeUnit, DescriptorError, Insn, MethodDescriptor, Opcode, Operand, TypeDesc};

/// Apply one patch: `<clinit>` call removal, then method stubs
pub(super) fn apply(unit: &mut CodeUnit, patch: &StaticInitPatch) -> Result<(), WeaveError> {
    if !patch.callee.is_empty() {
        patch_static_init(unit, patch)?;
    }
    for index in 0..unit.methods.len() {
        let method = &unit.methods[index];
        if method.is_abstract_or_native() || !patch.stub_methods.contains(&method.name) {
            continue;
        }
        stub(unit, index)?;
    }
    Ok(())
}

/// Replace calls to the patch callee in `<clinit>` with pops, plus a null
/// result for calls that return a value
fn patch_static_init(unit: &mut CodeUnit, patch: &StaticInitPatch) -> Result<(), WeaveError> {
    let Some(index) = unit.methods.iter().position(|m| m.is_static_init()) else {
        return Ok(());
    };
    let method = &unit.methods[index];
    let label = method_label(unit, method);
    let body = CodeBody::decode(&method.code, &method.handlers).map_err(code_error(&label))?;

    let pool = &unit.constants;
    let mut replaced = 0usize;
    let mut failure: Option<DescriptorError> = None;
    let (patched, _) = body.rewrite(Vec::new(), |_, insn, out| {
        let callee = Some(insn)
            .filter(|insn| insn.opcode.is_invoke())
            .and_then(|insn| insn.member_index())
            .and_then(|constant| pool.get_member(constant))
            .filter(|member| member.name == patch.callee);
        let Some(callee) = callee else {
            out.emit(*insn);
            return;
        };
        match MethodDescriptor::parse(&callee.descriptor) {
            Ok(descriptor) => {
                let receiver = usize::from(insn.opcode != Opcode::InvokeStatic);
                for _ in 0..descriptor.arg_slots() + receiver {
                    out.emit(Insn::op(Opcode::Pop));
                }
                if descriptor.returns_value() {
                    out.emit(Insn::op(Opcode::ConstNull));
                } else if descriptor.arg_slots() + receiver == 0 {
                    out.emit(Insn::op(Opcode::Nop));
                }
                replaced += 1;
            }
            Err(error) => {
                failure.get_or_insert(error);
                out.emit(*insn);
            }
        }
    });

    if let Some(error) = failure {
        return Err(error.into());
    }
    if replaced == 0 {
        return Ok(());
    }
    debug!(unit = %unit.name, callee = %patch.callee, replaced, "patched static initializer");
    store_body(&mut unit.methods[index], &patched, &unit.constants, &label)
}

/// Replace the body of method `index` with a return of the default value
fn stub(unit: &mut CodeUnit, index: usize) -> Result<(), WeaveError> {
    let method = &unit.methods[index];
    let label = method_label(unit, method);
    let descriptor = MethodDescriptor::parse(&method.descriptor)?;
    let mut insns = Vec::with_capacity(2);
    match descriptor.ret {
        TypeDesc::Void => {}
        TypeDesc::Int => insns.push(Insn {
            opcode: Opcode::ConstI32,
            operand: Operand::I32(0),
        }),
        TypeDesc::Float => insns.push(Insn {
            opcode: Opcode::ConstF64,
            operand: Operand::F64(0.0),
        }),
        TypeDesc::Bool => insns.push(Insn::op(Opcode::ConstFalse)),
        TypeDesc::Str | TypeDesc::Object(_) | TypeDesc::Array(_) => insns.push(Insn::op(Opcode::ConstNull)),
    }
    insns.push(Insn::op(if descriptor.returns_value() {
        Opcode::Return
    } else {
        Opcode::ReturnVoid
    }));
    let body = CodeBody {
        insns,
        handlers: Vec::new(),
    };

    debug!(unit = %unit.name, method = %label, "stubbed method body");
    let target = &mut unit.methods[index];
    target.handlers.clear();
    store_body(target, &body, &unit.constants, &label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::NamePattern;
    use weft_bytecode::unit::STATIC_INIT;
    use weft_bytecode::{access, MemberRef, MethodDef};

    #[test]
    fn test_call_replaced_with_null() {
        let mut unit = CodeUnit::new("org/xnio/Xnio", Some("weft/Object".to_string()));
        let call = unit.constants.intern_member(&MemberRef::new(
            "java/security/AccessController",
            "doPrivileged",
            "(Ljava/security/PrivilegedAction;)Ljava/lang/Object;",
        ));
        let store = unit
            .constants
            .intern_member(&MemberRef::new("org/xnio/Xnio", "ALLOW_BLOCKING", "Ljava/lang/Object;"));
        let mut clinit = MethodDef::new(access::STATIC, STATIC_INIT, "()V");
        let body = CodeBody {
            insns: vec![
                Insn::op(Opcode::ConstNull),
                Insn::member(Opcode::InvokeStatic, call),
                Insn::member(Opcode::PutStatic, store),
                Insn::op(Opcode::ReturnVoid),
            ],
            handlers: Vec::new(),
        };
        clinit.code = body.encode().unwrap().0;
        clinit.max_stack = 1;
        unit.methods.push(clinit);

        let patch = StaticInitPatch {
            class_name: NamePattern::parse("org/xnio/Xnio").unwrap(),
            callee: "doPrivileged".to_string(),
            stub_methods: Vec::new(),
        };
        apply(&mut unit, &patch).unwrap();

        let method = &unit.methods[0];
        let text = CodeBody::decode(&method.code, &method.handlers)
            .unwrap()
            .disassemble(&unit.constants);
        assert!(!text.contains("doPrivileged"));
        assert!(text.contains("POP\n"));
        assert_eq!(text.matches("CONST_NULL").count(), 2);
        weft_bytecode::verify_unit(&unit).unwrap();
    }

    #[test]
    fn test_stub_returns_default_value() {
        let mut unit = CodeUnit::new("org/xnio/Xnio", Some("weft/Object".to_string()));
        let helper = unit
            .constants
            .intern_member(&MemberRef::new("org/xnio/Xnio", "open", "()Lorg/xnio/Closeable;"));
        let mut register = MethodDef::new(access::PUBLIC, "register", "(I)Lorg/xnio/Closeable;");
        register.code = CodeBody {
            insns: vec![
                Insn::load(0),
                Insn::member(Opcode::InvokeVirtual, helper),
                Insn::op(Opcode::Return),
            ],
            handlers: Vec::new(),
        }
        .encode()
        .unwrap()
        .0;
        register.max_stack = 1;
        register.max_locals = 2;
        unit.methods.push(register);
        unit.methods.push(MethodDef::new(access::PUBLIC | access::ABSTRACT, "close", "()V"));

        let patch = StaticInitPatch {
            class_name: NamePattern::parse("org/xnio/*").unwrap(),
            callee: String::new(),
            stub_methods: vec!["register".to_string(), "close".to_string()],
        };
        apply(&mut unit, &patch).unwrap();

        let method = &unit.methods[0];
        let text = CodeBody::decode(&method.code, &method.handlers)
            .unwrap()
            .disassemble(&unit.constants);
        assert_eq!(text, "   0: CONST_NULL\n   1: RETURN\n");
        assert_eq!(method.max_locals, 2);
        assert!(unit.methods[1].code.is_empty());
        weft_bytecode::verify_unit(&unit).unwrap();
    }
}
