use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, ValueEnum};
use tracing::{error, info, warn};

use cadence_compiler::{ObjectiveKind, PrecedenceGraph, Severity, SynthesisConfig, TagShape, compile};
use cadence_runtime::bundle::{BUNDLE_EXTENSION, write_table};

#[derive(Args, Debug)]
pub struct SynthArgs {
    /// Precedence graph (JSON)
    graph: PathBuf,

    /// Number of workers; overrides the config file
    #[arg(short, long)]
    workers: Option<usize>,

    /// Primary objective; overrides the config file
    #[arg(long, value_enum)]
    objective: Option<Objective>,

    /// Branch-and-bound node budget; overrides the config file
    #[arg(long)]
    max_nodes: Option<u64>,

    /// Synthesis config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tag shapes (JSON list of `{ "name", "reactions" }`)
    #[arg(long)]
    shapes: Option<PathBuf>,

    /// Keep every cross-worker edge as its own channel
    #[arg(long)]
    no_prune: bool,

    /// Fail when a worker would be left without reactions
    #[arg(long)]
    require_all_workers: bool,

    /// Output table; `.json` for JSON, bincode otherwise
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Objective {
    Makespan,
    Balance,
}

impl From<Objective> for ObjectiveKind {
    fn from(objective: Objective) -> Self {
        match objective {
            Objective::Makespan => ObjectiveKind::Makespan,
            Objective::Balance => ObjectiveKind::Balance,
        }
    }
}

impl SynthArgs {
    fn config(&self) -> anyhow::Result<SynthesisConfig> {
        let mut config = match &self.config {
            Some(path) => SynthesisConfig::load(path).map_err(anyhow::Error::msg)?,
            None => SynthesisConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(objective) = self.objective {
            config.objective = objective.into();
        }
        if let Some(max_nodes) = self.max_nodes {
            config.max_search_nodes = max_nodes;
        }
        if self.no_prune {
            config.prune_redundant_sync = false;
        }
        if self.require_all_workers {
            config.require_all_workers = true;
        }
        Ok(config)
    }
}

pub fn run(args: SynthArgs) -> anyhow::Result<()> {
    let config = args.config()?;
    let graph = PrecedenceGraph::load(&args.graph).map_err(anyhow::Error::msg)?;
    let shapes = match &args.shapes {
        Some(path) => TagShape::load_all(path).map_err(anyhow::Error::msg)?,
        None => Vec::new(),
    };

    info!(
        graph = %args.graph.display(),
        reactions = graph.len(),
        edges = graph.edges().len(),
        workers = config.workers,
        shapes = shapes.len(),
        "synthesizing"
    );

    let result = compile(&graph, &shapes, &config);
    for diagnostic in &result.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!("{}", diagnostic),
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Hint => info!("{}", diagnostic),
        }
    }
    let Some(table) = result.table else {
        bail!("synthesis failed for {}", args.graph.display());
    };

    for summary in &result.variants {
        info!(
            variant = %summary.name,
            reactions = summary.reactions,
            makespan = summary.metrics.makespan,
            spread = summary.metrics.spread,
            channels = summary.channels,
            pruned = summary.pruned,
            nodes = summary.nodes,
            optimal = summary.complete,
            "variant"
        );
    }

    let output = args
        .output
        .unwrap_or_else(|| args.graph.with_extension(BUNDLE_EXTENSION));
    write_table(&output, &table).with_context(|| format!("failed to write {}", output.display()))?;
    info!("Wrote schedule table to {}", output.display());
    Ok(())
}
