//! `weft dump`: print a unit's structure

use super::read_unit;
use std::fmt::Write;
use std::path::Path;
use weft_bytecode::{CodeBody, CodeUnit};

pub fn execute(path: &Path) -> anyhow::Result<()> {
    let (_, unit) = read_unit(path)?;
    print!("{}", render(&unit));
    Ok(())
}

/// Human-readable listing of a unit
pub fn render(unit: &CodeUnit) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "unit {} (access 0x{:04x})", unit.name, unit.access);
    if let Some(super_name) = &unit.super_name {
        let _ = writeln!(out, "  extends {}", super_name);
    }
    for interface in &unit.interfaces {
        let _ = writeln!(out, "  implements {}", interface);
    }
    for marker in &unit.markers {
        let _ = writeln!(out, "  @{}", marker);
    }
    if let Some(source) = &unit.source_file {
        let _ = writeln!(out, "  source {}", source);
    }

    for field in &unit.fields {
        let _ = writeln!(out, "\nfield {} {} (access 0x{:04x})", field.name, field.descriptor, field.access);
    }
    for method in &unit.methods {
        let _ = writeln!(
            out,
            "\nmethod {}{} (access 0x{:04x}, stack {}, locals {})",
            method.name, method.descriptor, method.access, method.max_stack, method.max_locals
        );
        for marker in &method.markers {
            let _ = writeln!(out, "  @{}", marker);
        }
        if method.code.is_empty() {
            continue;
        }
        match CodeBody::decode(&method.code, &method.handlers) {
            Ok(body) => out.push_str(&body.disassemble(&unit.constants)),
            Err(error) => {
                let _ = writeln!(out, "  <undecodable body: {}>", error);
            }
        }
    }
    out
}
