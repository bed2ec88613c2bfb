use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use cadence_compiler::emit::{emit_rust, module_ident};

use super::load_table;

#[derive(Args, Debug)]
pub struct EmitArgs {
    /// Schedule table (`.cqs` or `.json`)
    table: PathBuf,

    /// Module name (default: the table's file stem)
    #[arg(long)]
    module: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn run(args: EmitArgs) -> anyhow::Result<()> {
    let table = load_table(&args.table)?;
    let module = args.module.unwrap_or_else(|| {
        args.table
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "schedule".to_string())
    });
    let source = emit_rust(&table, &module);

    match args.output {
        Some(path) => {
            fs::write(&path, source).with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote module {} to {}", module_ident(&module), path.display());
        }
        None => print!("{}", source),
    }
    Ok(())
}
