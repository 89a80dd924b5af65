//! Shim delegation: each shim method forwards to its resolved target

use super::forwarding_method;
use crate::catalog::ShimType;
use crate::error::WeaveError;
use crate::matcher::ShimDelegate;
use weft_bytecode::{access, CodeUnit, MemberRef, Opcode};

pub(super) fn apply(unit: &mut CodeUnit, shim: &ShimType, delegates: &[ShimDelegate]) -> Result<(), WeaveError> {
    if !unit.interfaces.contains(&shim.iface) {
        unit.interfaces.push(shim.iface.clone());
    }
    for delegate in delegates {
        if unit.find_method(&delegate.name, &delegate.descriptor).is_some() {
            continue;
        }
        let callee = MemberRef::new(&unit.name, &delegate.target, &delegate.descriptor);
        let method = forwarding_method(
            unit,
            access::PUBLIC | access::SYNTHETIC,
            &delegate.name,
            Opcode::InvokeVirtual,
            &callee,
        )?;
        unit.methods.push(method);
    }
    Ok(())
}
