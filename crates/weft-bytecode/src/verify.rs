//! Structural verification of code units
//!
//! Checks that every method body decodes, references existing constants and
//! locals, keeps a consistent operand stack within its declared bounds, and
//! ends in a terminator.

use crate::code::{CodeBody, CodeError, Operand};
use crate::descriptor::{parse_field, MethodDescriptor};
use crate::unit::{access, CodeUnit, MethodDef};
use thiserror::Error;

/// Verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Unit-level structure is invalid
    #[error("Unit validation error: {0}")]
    UnitValidation(String),

    /// A method body failed analysis
    #[error("Method {method}: {source}")]
    Code {
        /// `name` + descriptor of the method
        method: String,
        /// Underlying error
        #[source]
        source: CodeError,
    },

    /// Invalid constant pool reference
    #[error("Method {method}: invalid constant reference {index}")]
    InvalidConstantRef {
        /// `name` + descriptor of the method
        method: String,
        /// Constant pool index
        index: u32,
    },

    /// Local slot outside the declared frame
    #[error("Method {method}: local {index} exceeds max_locals {max}")]
    InvalidLocalRef {
        /// `name` + descriptor of the method
        method: String,
        /// Referenced slot
        index: u16,
        /// Declared frame size
        max: u16,
    },

    /// Computed stack depth exceeds the declared maximum
    #[error("Method {method}: stack depth {computed} exceeds max_stack {declared}")]
    StackOverflow {
        /// `name` + descriptor of the method
        method: String,
        /// Computed maximum depth
        computed: u16,
        /// Declared maximum depth
        declared: u16,
    },

    /// Parameters do not fit the declared frame
    #[error("Method {method}: {params} parameter slots exceed max_locals {max}")]
    FrameTooSmall {
        /// `name` + descriptor of the method
        method: String,
        /// Slots taken by receiver and parameters
        params: usize,
        /// Declared frame size
        max: u16,
    },

    /// Last instruction can fall through
    #[error("Method {method}: execution falls off end")]
    FallOffEnd {
        /// `name` + descriptor of the method
        method: String,
    },
}

/// Verify a code unit
pub fn verify_unit(unit: &CodeUnit) -> Result<(), VerifyError> {
    validate_structure(unit)?;

    for method in &unit.methods {
        verify_method(unit, method)?;
    }

    Ok(())
}

fn validate_structure(unit: &CodeUnit) -> Result<(), VerifyError> {
    if unit.name.is_empty() {
        return Err(VerifyError::UnitValidation("unit has no name".to_string()));
    }
    if unit.super_name.as_deref() == Some(unit.name.as_str()) {
        return Err(VerifyError::UnitValidation(format!(
            "{} extends itself",
            unit.name
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for interface in &unit.interfaces {
        if !seen.insert(interface.as_str()) {
            return Err(VerifyError::UnitValidation(format!(
                "{} implements {} twice",
                unit.name, interface
            )));
        }
    }

    let mut signatures = std::collections::HashSet::new();
    for method in &unit.methods {
        MethodDescriptor::parse(&method.descriptor)
            .map_err(|e| VerifyError::UnitValidation(e.to_string()))?;
        if !signatures.insert((method.name.as_str(), method.descriptor.as_str())) {
            return Err(VerifyError::UnitValidation(format!(
                "duplicate method {}{}",
                method.name, method.descriptor
            )));
        }
    }

    let mut field_names = std::collections::HashSet::new();
    for field in &unit.fields {
        parse_field(&field.descriptor).map_err(|e| VerifyError::UnitValidation(e.to_string()))?;
        if !field_names.insert(field.name.as_str()) {
            return Err(VerifyError::UnitValidation(format!(
                "duplicate field {}",
                field.name
            )));
        }
    }

    Ok(())
}

fn verify_method(unit: &CodeUnit, method: &MethodDef) -> Result<(), VerifyError> {
    let signature = format!("{}{}", method.name, method.descriptor);

    if method.is_abstract_or_native() {
        if !method.code.is_empty() {
            return Err(VerifyError::UnitValidation(format!(
                "{} is abstract or native but has code",
                signature
            )));
        }
        return Ok(());
    }
    if unit.access & access::INTERFACE != 0 && method.code.is_empty() {
        return Err(VerifyError::UnitValidation(format!(
            "interface method {} has neither code nor ABSTRACT",
            signature
        )));
    }
    if method.code.is_empty() {
        return Err(VerifyError::FallOffEnd { method: signature });
    }

    let code_error = |source: CodeError| VerifyError::Code {
        method: signature.clone(),
        source,
    };

    let body = CodeBody::decode(&method.code, &method.handlers).map_err(code_error)?;

    // Receiver and parameters occupy the first slots
    let descriptor = MethodDescriptor::parse(&method.descriptor)
        .map_err(|e| code_error(CodeError::Descriptor(e)))?;
    let params = descriptor.arg_slots() + usize::from(!method.is_static());
    if params > method.max_locals as usize {
        return Err(VerifyError::FrameTooSmall {
            method: signature,
            params,
            max: method.max_locals,
        });
    }

    for insn in &body.insns {
        match insn.operand {
            Operand::Str(index) if unit.constants.get_string(index).is_none() => {
                return Err(VerifyError::InvalidConstantRef {
                    method: signature,
                    index,
                });
            }
            Operand::Member(index) if unit.constants.get_member(index).is_none() => {
                return Err(VerifyError::InvalidConstantRef {
                    method: signature,
                    index,
                });
            }
            Operand::Local(index) if index >= method.max_locals => {
                return Err(VerifyError::InvalidLocalRef {
                    method: signature,
                    index,
                    max: method.max_locals,
                });
            }
            _ => {}
        }
    }

    if let Some(last) = body.insns.last() {
        if !last.opcode.is_terminator() {
            return Err(VerifyError::FallOffEnd { method: signature });
        }
    }

    let computed = body.compute_max_stack(&unit.constants).map_err(code_error)?;
    if computed > method.max_stack {
        return Err(VerifyError::StackOverflow {
            method: signature,
            computed,
            declared: method.max_stack,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Insn;
    use crate::constants::MemberRef;
    use crate::opcode::Opcode;

    fn unit_with(method: MethodDef) -> CodeUnit {
        let mut unit = CodeUnit::new("a/B", Some("weft/Object".to_string()));
        unit.constants
            .intern_member(&MemberRef::new("a/B", "helper", "(I)I"));
        unit.methods.push(method);
        unit
    }

    fn method_from(body: &CodeBody, max_stack: u16, max_locals: u16) -> MethodDef {
        let (code, handlers) = body.encode().unwrap();
        let mut method = MethodDef::new(access::PUBLIC, "run", "(I)I");
        method.code = code;
        method.handlers = handlers;
        method.max_stack = max_stack;
        method.max_locals = max_locals;
        method
    }

    fn valid_body() -> CodeBody {
        CodeBody {
            insns: vec![
                Insn::load(1),
                Insn::member(Opcode::InvokeStatic, 0),
                Insn::op(Opcode::Return),
            ],
            handlers: Vec::new(),
        }
    }

    #[test]
    fn test_verify_valid_unit() {
        let unit = unit_with(method_from(&valid_body(), 1, 2));
        assert!(verify_unit(&unit).is_ok());
    }

    #[test]
    fn test_verify_stack_overflow() {
        let unit = unit_with(method_from(&valid_body(), 0, 2));
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::StackOverflow { computed: 1, declared: 0, .. })
        ));
    }

    #[test]
    fn test_verify_local_out_of_frame() {
        let mut body = valid_body();
        body.insns[0] = Insn::load(5);
        let unit = unit_with(method_from(&body, 1, 2));
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::InvalidLocalRef { index: 5, .. })
        ));
    }

    #[test]
    fn test_verify_bad_constant() {
        let mut body = valid_body();
        body.insns[1] = Insn::member(Opcode::InvokeStatic, 9);
        let unit = unit_with(method_from(&body, 1, 2));
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::InvalidConstantRef { index: 9, .. })
        ));
    }

    #[test]
    fn test_verify_fall_off_end() {
        let mut body = valid_body();
        body.insns.pop();
        let unit = unit_with(method_from(&body, 1, 2));
        assert!(matches!(verify_unit(&unit), Err(VerifyError::FallOffEnd { .. })));
    }

    #[test]
    fn test_abstract_method_without_code() {
        let method = MethodDef::new(access::PUBLIC | access::ABSTRACT, "run", "()V");
        assert!(verify_unit(&unit_with(method)).is_ok());

        let mut method = MethodDef::new(access::PUBLIC | access::ABSTRACT, "run", "()V");
        method.code = vec![Opcode::ReturnVoid.to_u8()];
        assert!(matches!(
            verify_unit(&unit_with(method)),
            Err(VerifyError::UnitValidation(_))
        ));
    }

    #[test]
    fn test_duplicate_interface_rejected() {
        let mut unit = unit_with(method_from(&valid_body(), 1, 2));
        unit.interfaces = vec!["a/I".to_string(), "a/I".to_string()];
        assert!(matches!(verify_unit(&unit), Err(VerifyError::UnitValidation(_))));
    }
}
