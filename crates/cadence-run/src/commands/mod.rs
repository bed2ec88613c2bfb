pub mod emit;
pub mod inspect;
pub mod run;
pub mod synth;

use std::path::Path;

use anyhow::Context;

use cadence_runtime::ScheduleTable;
use cadence_runtime::bundle::read_table;

/// Load a `.cqs` or `.json` schedule table
pub fn load_table(path: &Path) -> anyhow::Result<ScheduleTable> {
    read_table(path).with_context(|| format!("failed to load schedule table {}", path.display()))
}

/// Parse `"0,2,5"` into reaction ids
pub fn parse_reactions(list: &str) -> anyhow::Result<Vec<cadence_runtime::ReactionId>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_start_matches('r')
                .parse::<u32>()
                .map(cadence_runtime::ReactionId)
                .with_context(|| format!("invalid reaction id '{}'", s))
        })
        .collect()
}
