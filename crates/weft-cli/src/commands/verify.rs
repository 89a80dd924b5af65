//! `weft verify`: structural checks over unit files

use super::read_unit;
use anyhow::bail;
use std::path::PathBuf;
use weft_bytecode::verify_unit;

pub fn execute(units: &[PathBuf]) -> anyhow::Result<()> {
    let mut failed = 0;
    for path in units {
        let result = read_unit(path).and_then(|(_, unit)| {
            verify_unit(&unit)?;
            Ok(unit)
        });
        match result {
            Ok(unit) => println!("{}: ok ({})", path.display(), unit.name),
            Err(error) => {
                failed += 1;
                println!("{}: {:#}", path.display(), error);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} units failed verification", failed, units.len());
    }
    Ok(())
}
