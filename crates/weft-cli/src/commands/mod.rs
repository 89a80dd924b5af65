//! Subcommand implementations

pub mod dump;
pub mod verify;
pub mod weave;

use anyhow::{anyhow, Context};
use std::path::Path;
use weft_bytecode::CodeUnit;

/// Read and decode a unit file
pub fn read_unit(path: &Path) -> anyhow::Result<(Vec<u8>, CodeUnit)> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let unit = CodeUnit::decode(&bytes).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
    Ok((bytes, unit))
}
