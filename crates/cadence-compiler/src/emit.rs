//! Rust source emission
//!
//! Writes a [`ScheduleTable`] as a Rust module of static
//! [`InstructionRecord`](cadence_runtime::InstructionRecord) arrays, so a
//! program can embed its schedule and skip loading a bundle at startup.
//! The module exposes `table()`, which decodes and validates the arrays
//! through `ScheduleTable::from_static`.

use std::fmt;

use cadence_runtime::{Instruction, ScheduleTable};

/// Render `table` as `pub mod <module_name> { ... }`
pub fn emit_rust(table: &ScheduleTable, module_name: &str) -> String {
    RustModule {
        table,
        name: module_ident(module_name),
    }
    .to_string()
}

/// Turn an arbitrary label into a valid module identifier
pub fn module_ident(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "schedule_");
    }
    ident
}

struct RustModule<'a> {
    table: &'a ScheduleTable,
    name: String,
}

fn record(inst: &Instruction) -> String {
    match inst {
        Instruction::Exec(r) => format!("InstructionRecord::exec({})", r.0),
        Instruction::Wait(c) => format!("InstructionRecord::wait({})", c.0),
        Instruction::Notify(c) => format!("InstructionRecord::notify({})", c.0),
        Instruction::Stop => "InstructionRecord::stop()".to_string(),
    }
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for RustModule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table;
        let variants = table.variants.len();

        writeln!(f, "// Generated by cadence synth. Do not edit.")?;
        writeln!(f, "#[allow(dead_code)]")?;
        writeln!(f, "pub mod {} {{", self.name)?;
        writeln!(f, "    use cadence_runtime::instruction::InstructionRecord;")?;
        writeln!(f, "    use cadence_runtime::schedule::{{ScheduleTable, StaticVariant}};")?;
        writeln!(f)?;
        writeln!(f, "    pub const WORKER_COUNT: usize = {};", table.worker_count)?;
        writeln!(f, "    pub const REACTION_COUNT: usize = {};", table.reaction_count)?;
        writeln!(f, "    pub const CHANNEL_COUNT: usize = {};", table.channel_count)?;

        for (v, variant) in table.variants.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "    // variant {}: {:?}", v, variant.name)?;
            for (w, tape) in variant.tapes.iter().enumerate() {
                writeln!(f, "    static V{}_W{}: [InstructionRecord; {}] = [", v, w, tape.len())?;
                for inst in tape.instructions() {
                    writeln!(f, "        {},", record(inst))?;
                }
                writeln!(f, "    ];")?;
            }
            writeln!(
                f,
                "    static V{v}_TAPES: [&[InstructionRecord]; {}] = [{}];",
                variant.tapes.len(),
                join((0..variant.tapes.len()).map(|w| format!("&V{v}_W{w}")))
            )?;
            writeln!(
                f,
                "    static V{v}_LENGTHS: [u32; {}] = [{}];",
                variant.tapes.len(),
                join(variant.tape_lengths())
            )?;
            writeln!(
                f,
                "    static V{v}_REACTIONS: [u32; {}] = [{}];",
                variant.reactions().len(),
                join(variant.reactions().iter().map(|r| r.0))
            )?;
        }

        writeln!(f)?;
        writeln!(f, "    pub static VARIANTS: [StaticVariant<'static>; {}] = [", variants)?;
        for (v, variant) in table.variants.iter().enumerate() {
            writeln!(f, "        StaticVariant {{")?;
            writeln!(f, "            name: {:?},", variant.name)?;
            writeln!(f, "            tapes: &V{}_TAPES,", v)?;
            writeln!(f, "            lengths: &V{}_LENGTHS,", v)?;
            writeln!(f, "            reactions: &V{}_REACTIONS,", v)?;
            writeln!(f, "        }},")?;
        }
        writeln!(f, "    ];")?;
        writeln!(f)?;
        writeln!(f, "    pub fn table() -> cadence_runtime::Result<ScheduleTable> {{")?;
        writeln!(
            f,
            "        ScheduleTable::from_static(WORKER_COUNT, REACTION_COUNT, CHANNEL_COUNT, &VARIANTS)"
        )?;
        writeln!(f, "    }}")?;
        writeln!(f, "}}")
    }
}
