//! Mixin application
//!
//! Adds the mixin interface, copies the template's fields and methods with
//! their constants relocated into the target's pool (references to the
//! template type are renamed to the target), and calls the init method at
//! the end of every constructor that does not delegate to a sibling
//! constructor.

use super::{code_error, method_label, store_body};
use crate::catalog::MixinType;
use crate::error::WeaveError;
use tracing::trace;
use weft_bytecode::unit::CONSTRUCTOR;
use weft_bytecode::{CodeBody, CodeError, CodeUnit, ConstantPool, Insn, MemberRef, MethodDef, Opcode, Operand};

pub(super) fn apply(unit: &mut CodeUnit, mixin: &MixinType) -> Result<(), WeaveError> {
    if !unit.interfaces.contains(&mixin.interface) {
        unit.interfaces.push(mixin.interface.clone());
    }
    if unit.is_interface() {
        return Ok(());
    }

    let template = &*mixin.template;
    let rename = Rename {
        from: &template.name,
        to: unit.name.clone(),
    };

    for field in &template.fields {
        if unit.find_field(&field.name).is_none() {
            let mut copied = field.clone();
            copied.descriptor = rename.descriptor(&field.descriptor);
            unit.fields.push(copied);
        }
    }

    for method in &template.methods {
        if method.is_constructor() || method.is_static_init() || method.is_abstract_or_native() {
            continue;
        }
        let descriptor = rename.descriptor(&method.descriptor);
        if unit.find_method(&method.name, &descriptor).is_some() {
            trace!(unit = %unit.name, method = %method.name, "target already declares mixin method");
            continue;
        }
        let copied = copy_method(unit, &template.constants, method, descriptor, &rename)?;
        unit.methods.push(copied);
    }

    if let Some(init) = &mixin.init_method {
        call_init(unit, init)?;
    }
    Ok(())
}

/// Renames the template type to the target type
struct Rename<'a> {
    from: &'a str,
    to: String,
}

impl Rename<'_> {
    fn name<'s>(&'s self, name: &'s str) -> &'s str {
        if name == self.from {
            &self.to
        } else {
            name
        }
    }

    fn descriptor(&self, descriptor: &str) -> String {
        descriptor.replace(&format!("L{};", self.from), &format!("L{};", self.to))
    }

    fn member(&self, member: &MemberRef) -> MemberRef {
        MemberRef::new(self.name(&member.owner), &member.name, self.descriptor(&member.descriptor))
    }
}

fn copy_method(
    unit: &mut CodeUnit,
    template_pool: &ConstantPool,
    method: &MethodDef,
    descriptor: String,
    rename: &Rename<'_>,
) -> Result<MethodDef, WeaveError> {
    let label = format!("{}.{}{}", rename.from, method.name, method.descriptor);
    let mut body = CodeBody::decode(&method.code, &method.handlers).map_err(code_error(&label))?;

    for (index, insn) in body.insns.iter_mut().enumerate() {
        insn.operand = match insn.operand {
            Operand::Str(constant) => {
                let value = template_pool
                    .get_string(constant)
                    .ok_or(CodeError::InvalidConstantRef { index, constant })
                    .map_err(code_error(&label))?;
                // Only type operands name the template; string literals stay as written
                let value = match insn.opcode {
                    Opcode::New | Opcode::CheckCast | Opcode::InstanceOf => rename.name(value),
                    _ => value,
                };
                Operand::Str(unit.constants.intern_string(value))
            }
            Operand::Member(constant) => {
                let member = template_pool
                    .get_member(constant)
                    .ok_or(CodeError::InvalidConstantRef { index, constant })
                    .map_err(code_error(&label))?;
                Operand::Member(unit.constants.intern_member(&rename.member(member)))
            }
            other => other,
        };
    }
    for handler in &mut body.handlers {
        if let Some(catch_type) = &handler.catch_type {
            handler.catch_type = Some(rename.name(catch_type).to_string());
        }
    }

    let mut copied = MethodDef::new(method.access, method.name.as_str(), descriptor);
    copied.markers = method.markers.clone();
    copied.max_locals = method.max_locals;
    store_body(&mut copied, &body, &unit.constants, &label)?;
    Ok(copied)
}

fn call_init(unit: &mut CodeUnit, init: &str) -> Result<(), WeaveError> {
    let init_ref = unit.constants.intern_member(&MemberRef::new(&unit.name, init, "()V"));

    for index in 0..unit.methods.len() {
        let method = &unit.methods[index];
        if !method.is_constructor() || method.is_abstract_or_native() {
            continue;
        }
        let label = method_label(unit, method);
        let body = CodeBody::decode(&method.code, &method.handlers).map_err(code_error(&label))?;

        // `this(...)` constructors run init through the constructor they delegate to
        let delegates = body.insns.iter().any(|insn| {
            insn.opcode == Opcode::InvokeSpecial
                && insn
                    .member_index()
                    .and_then(|c| unit.constants.get_member(c))
                    .map_or(false, |m| m.owner == unit.name && m.name == CONSTRUCTOR)
        });
        if delegates {
            continue;
        }

        let (woven, _) = body.rewrite(Vec::new(), |_, insn, out| {
            if insn.opcode == Opcode::ReturnVoid {
                out.emit(Insn::load(0));
                out.emit(Insn::member(Opcode::InvokeVirtual, init_ref));
            }
            out.emit(*insn);
        });
        store_body(&mut unit.methods[index], &woven, &unit.constants, &label)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::NamePattern;
    use std::sync::Arc;
    use weft_bytecode::{access, FieldDef};

    fn encode(insns: Vec<Insn>) -> Vec<u8> {
        CodeBody {
            insns,
            handlers: Vec::new(),
        }
        .encode()
        .unwrap()
        .0
    }

    /// Template: `int weft$count; int weft$next() { return this.weft$count; } void weft$init() {}`
    fn mixin() -> MixinType {
        let mut template = CodeUnit::new("mix/CounterImpl", Some("weft/Object".to_string()));
        template.fields.push(FieldDef {
            access: access::PRIVATE,
            name: "weft$count".to_string(),
            descriptor: "I".to_string(),
        });
        let field = template
            .constants
            .intern_member(&MemberRef::new("mix/CounterImpl", "weft$count", "I"));
        let mut next = MethodDef::new(access::PUBLIC, "weft$next", "()I");
        next.code = encode(vec![
            Insn::load(0),
            Insn::member(Opcode::GetField, field),
            Insn::op(Opcode::Return),
        ]);
        next.max_stack = 1;
        next.max_locals = 1;
        let mut init = MethodDef::new(access::PUBLIC, "weft$init", "()V");
        init.code = encode(vec![Insn::op(Opcode::ReturnVoid)]);
        init.max_locals = 1;
        template.methods.push(next);
        template.methods.push(init);

        MixinType {
            targets: vec![NamePattern::parse("app/*").unwrap()],
            interface: "mix/Counter".to_string(),
            template: Arc::new(template),
            init_method: Some("weft$init".to_string()),
        }
    }

    fn target() -> CodeUnit {
        let mut unit = CodeUnit::new("app/Service", Some("weft/Object".to_string()));
        let super_init = unit
            .constants
            .intern_member(&MemberRef::new("weft/Object", CONSTRUCTOR, "()V"));
        let mut ctor = MethodDef::new(access::PUBLIC, CONSTRUCTOR, "()V");
        ctor.code = encode(vec![
            Insn::load(0),
            Insn::member(Opcode::InvokeSpecial, super_init),
            Insn::op(Opcode::ReturnVoid),
        ]);
        ctor.max_stack = 1;
        ctor.max_locals = 1;
        unit.methods.push(ctor);
        unit
    }

    #[test]
    fn test_members_copied_and_renamed() {
        let mut unit = target();
        apply(&mut unit, &mixin()).unwrap();

        assert_eq!(unit.interfaces, vec!["mix/Counter".to_string()]);
        assert!(unit.find_field("weft$count").is_some());
        let next = unit.find_method("weft$next", "()I").unwrap();
        let text = CodeBody::decode(&next.code, &next.handlers)
            .unwrap()
            .disassemble(&unit.constants);
        assert!(text.contains("GET_FIELD app/Service.weft$countI"));
        weft_bytecode::verify_unit(&unit).unwrap();
    }

    #[test]
    fn test_constructor_calls_init() {
        let mut unit = target();
        apply(&mut unit, &mixin()).unwrap();

        let ctor = &unit.methods[0];
        let text = CodeBody::decode(&ctor.code, &ctor.handlers)
            .unwrap()
            .disassemble(&unit.constants);
        assert!(text.contains("INVOKE_VIRTUAL app/Service.weft$init()V"));
    }

    #[test]
    fn test_interface_target_gets_interface_only() {
        let mut unit = CodeUnit::new("app/Api", Some("weft/Object".to_string()));
        unit.access |= access::INTERFACE | access::ABSTRACT;
        apply(&mut unit, &mixin()).unwrap();
        assert_eq!(unit.interfaces, vec!["mix/Counter".to_string()]);
        assert!(unit.methods.is_empty());
        assert!(unit.fields.is_empty());
    }
}
