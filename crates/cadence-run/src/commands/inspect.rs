use std::path::PathBuf;

use clap::Args;

use super::load_table;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Schedule table (`.cqs` or `.json`)
    table: PathBuf,

    /// Print every instruction of every tape
    #[arg(long)]
    tapes: bool,
}

pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    let table = load_table(&args.table)?;

    println!(
        "{}: {} workers, {} reactions, {} channels, {} variants",
        args.table.display(),
        table.worker_count,
        table.reaction_count,
        table.channel_count,
        table.variants.len()
    );

    for (idx, variant) in table.variants.iter().enumerate() {
        let reactions: Vec<String> = variant.reactions().iter().map(ToString::to_string).collect();
        println!(
            "variant {} '{}': {} reactions [{}], tape lengths {:?}",
            idx,
            variant.name,
            reactions.len(),
            reactions.join(" "),
            variant.tape_lengths()
        );
        if !args.tapes {
            continue;
        }
        for (w, tape) in variant.tapes.iter().enumerate() {
            println!("  w{}:", w);
            for (pc, inst) in tape.instructions().iter().enumerate() {
                println!("    {:>4}  {}", pc, inst);
            }
        }
    }
    Ok(())
}
