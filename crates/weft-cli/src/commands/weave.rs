//! `weft weave`: run the weaver over one unit file

use super::read_unit;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use weft_weaver::{
    CatalogDecl, CatalogHandle, DirLoader, Loader, MemoryLoader, RuleCatalog, TypeWorld, WeaveOutcome, Weaver,
    WeaverConfig,
};

pub struct WeaveArgs {
    pub unit: PathBuf,
    pub catalog: PathBuf,
    pub unit_path: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub verify: bool,
}

pub fn execute(args: WeaveArgs) -> anyhow::Result<()> {
    let outcome = weave(&args)?;
    match &outcome {
        WeaveOutcome::Failed(error) => println!("{}: failed ({})", args.unit.display(), error),
        other => println!("{}: {}", args.unit.display(), other.kind()),
    }

    match (outcome.into_bytes(), &args.out) {
        (Some(bytes), Some(out)) => {
            std::fs::write(out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Wrote {}", out.display());
        }
        (Some(_), None) => println!("  (pass --out to write the woven unit)"),
        (None, _) => {}
    }
    Ok(())
}

/// Weave `args.unit`, loading everything it references from the unit path
pub fn weave(args: &WeaveArgs) -> anyhow::Result<WeaveOutcome> {
    let (bytes, unit) = read_unit(&args.unit)?;
    let loader = loader_chain(&args.unit_path);

    let mut config = match &args.config {
        Some(path) => WeaverConfig::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => WeaverConfig::default(),
    }
    .with_env()?;
    config.verify |= args.verify;

    let decl = CatalogDecl::from_file(&args.catalog)
        .with_context(|| format!("Failed to load {}", args.catalog.display()))?;
    let catalog = RuleCatalog::build(&decl, &loader)?;
    let weaver = Weaver::new(Arc::new(CatalogHandle::new(catalog)), Arc::new(TypeWorld::new()), config);

    let origin = args.unit.to_string_lossy();
    Ok(weaver.weave(&bytes, &unit.name, Some(origin.as_ref()), &loader))
}

/// One directory loader per path, the first being the root of the chain
fn loader_chain(paths: &[PathBuf]) -> Arc<dyn Loader> {
    if paths.is_empty() {
        return MemoryLoader::new(0, None).into_handle();
    }
    let mut parent: Option<Arc<dyn Loader>> = None;
    for (index, path) in paths.iter().enumerate() {
        parent = Some(Arc::new(DirLoader::new(index as u64 + 1, path, parent.take())));
    }
    parent.unwrap_or_else(|| MemoryLoader::new(0, None).into_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use weft_bytecode::{access, CodeBody, CodeUnit, Insn, MethodDef, Opcode};

    fn write_unit(root: &Path, unit: &CodeUnit) -> PathBuf {
        let path = root.join(format!("{}.weft", unit.name));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, unit.encode()).unwrap();
        path
    }

    fn void_method(access_flags: u32, name: &str) -> MethodDef {
        let mut method = MethodDef::new(access_flags, name, "()V");
        method.code = CodeBody {
            insns: vec![Insn::op(Opcode::ReturnVoid)],
            handlers: Vec::new(),
        }
        .encode()
        .unwrap()
        .0;
        method.max_locals = 1;
        method
    }

    #[test]
    fn test_weave_from_directories() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");

        let mut advice = CodeUnit::new("adv/Log", Some("weft/Object".to_string()));
        let mut before = void_method(access::PUBLIC | access::STATIC, "enter");
        before.markers.push(weft_weaver::markers::ON_BEFORE.to_string());
        advice.methods.push(before);
        write_unit(&lib, &advice);

        let mut target = CodeUnit::new("app/Job", Some("weft/Object".to_string()));
        target.methods.push(void_method(access::PUBLIC, "execute"));
        let unit_file = write_unit(&dir.path().join("app"), &target);

        let catalog = dir.path().join("catalog.json");
        fs::write(
            &catalog,
            r#"{ "advice": [{ "advice": "adv/Log", "pointcut": { "class_name": "app/Job", "method_name": "execute" } }] }"#,
        )
        .unwrap();
        let config = dir.path().join("weft.toml");
        fs::write(&config, "[weaving]\nverify = true\n").unwrap();

        let out = dir.path().join("Job.woven.weft");
        let args = WeaveArgs {
            unit: unit_file,
            catalog,
            unit_path: vec![lib],
            config: Some(config),
            out: Some(out.clone()),
            verify: false,
        };
        assert!(matches!(weave(&args).unwrap(), WeaveOutcome::Rewritten(_)));

        execute(args).unwrap();
        let woven = CodeUnit::decode(&fs::read(out).unwrap()).unwrap();
        weft_bytecode::verify_unit(&woven).unwrap();
    }

    #[test]
    fn test_missing_advice_unit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = CodeUnit::new("app/Job", Some("weft/Object".to_string()));
        let unit_file = write_unit(dir.path(), &target);
        let catalog = dir.path().join("catalog.json");
        fs::write(
            &catalog,
            r#"{ "advice": [{ "advice": "adv/Missing", "pointcut": { "class_name": "*", "method_name": "*" } }] }"#,
        )
        .unwrap();

        let args = WeaveArgs {
            unit: unit_file,
            catalog,
            unit_path: Vec::new(),
            config: None,
            out: None,
            verify: false,
        };
        let error = weave(&args).unwrap_err();
        assert!(error.to_string().contains("adv/Missing"));
    }
}
