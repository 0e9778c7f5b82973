use anyhow::{Context, Result, bail};
use clap::Parser;
use heron_vm_bytecode::BytecodeModule;
use heron_vm_bytecode::disasm::disassemble_module;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(name = "heron-dump", version, about = "Inspect Heron bytecode modules")]
struct Cli {
    /// Serialized module
    input: PathBuf,
    /// Print a JSON summary instead of the disassembly
    #[arg(long)]
    json: bool,
    /// Include the source map
    #[arg(long)]
    source_map: bool,
    /// Fail unless the module was compiled from this source file
    #[arg(long, value_name = "FILE")]
    source: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let module = load(&cli.input)?;
    if let Some(source) = &cli.source {
        check_source(&module, source)?;
    }
    print!("{}", render(&module, cli.json, cli.source_map)?);
    Ok(())
}

fn load(path: &Path) -> Result<BytecodeModule> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let module = BytecodeModule::from_bytes(&bytes)
        .with_context(|| format!("{} is not a heron bytecode module", path.display()))?;
    tracing::debug!(
        functions = module.functions.len(),
        bytes = bytes.len(),
        "module loaded"
    );
    Ok(module)
}

fn check_source(module: &BytecodeModule, path: &Path) -> Result<()> {
    let source = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if !module.matches_source(&source) {
        bail!("module was not compiled from {}", path.display());
    }
    Ok(())
}

fn render(module: &BytecodeModule, json: bool, source_map: bool) -> Result<String> {
    if json {
        let value = if source_map {
            serde_json::json!({
                "module": module.summary(),
                "source_map": module.populate_source_map(),
            })
        } else {
            serde_json::to_value(module.summary())?
        };
        return Ok(serde_json::to_string_pretty(&value)? + "\n");
    }

    let mut out = disassemble_module(module)?;
    if source_map {
        let map = module.populate_source_map();
        let _ = writeln!(out, "\nsource map ({} entries):", map.len());
        for entry in map.entries() {
            let _ = writeln!(
                out,
                "  {:06} f{} {}:{}",
                entry.offset, entry.function, entry.line, entry.column
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_vm_bytecode::{
        BytecodeFunction, DebugLocation, FunctionHeader, Instruction, Register, hash_source,
    };

    fn sample() -> BytecodeModule {
        let mut module = BytecodeModule::new();
        module.source_hash = hash_source(b"42");
        module.options.has_debug_info = true;
        let name = module.strings.add_string("main");
        let mut code = Vec::new();
        Instruction::LoadConstUInt8 {
            dst: Register(0),
            value: 42,
        }
        .encode(&mut code);
        Instruction::Ret { value: Register(0) }.encode(&mut code);
        let header = FunctionHeader {
            name,
            frame_size: 1,
            param_count: 1,
            ..Default::default()
        };
        let mut func = BytecodeFunction::new(header, code, &[]);
        func.debug_locations.push(DebugLocation {
            offset: 0,
            line: 1,
            column: 1,
        });
        module.functions.push(func);
        module
    }

    #[test]
    fn test_text_listing() {
        let out = render(&sample(), false, true).unwrap();
        assert!(out.contains("\"main\""));
        assert!(out.contains("source map (1 entries)"));
        assert!(out.contains("f0 1:1"));
    }

    #[test]
    fn test_json_summary() {
        let out = render(&sample(), true, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["functions"][0]["name"], "main");
        assert_eq!(value["options"]["has_debug_info"], true);

        let out = render(&sample(), true, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(value["source_map"].is_object());
    }

    #[test]
    fn test_load_and_check_source() {
        let dir = std::env::temp_dir().join(format!("heron-dump-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let module_path = dir.join("main.hbc");
        let source_path = dir.join("main.js");
        std::fs::write(&module_path, sample().to_bytes()).unwrap();
        std::fs::write(&source_path, "42").unwrap();

        let module = load(&module_path).unwrap();
        assert_eq!(module, sample());
        assert!(check_source(&module, &source_path).is_ok());
        std::fs::write(&source_path, "43").unwrap();
        assert!(check_source(&module, &source_path).is_err());

        std::fs::write(&module_path, b"not bytecode").unwrap();
        assert!(load(&module_path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
