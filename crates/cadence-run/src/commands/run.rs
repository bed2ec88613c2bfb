use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::info;

use cadence_runtime::{
    Periodic, Program, QsScheduler, ReactionContext, ReactionId, RunOptions, ScheduleTable,
    SchedulerConfig, TagAdvancer, TagScript, run as run_program,
};

use super::{load_table, parse_reactions};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Schedule table (`.cqs` or `.json`)
    table: PathBuf,

    /// Number of tags to run with the periodic trigger set
    #[arg(long, default_value = "10")]
    tags: u64,

    /// Reactions triggered at every tag, comma-separated (default: all)
    #[arg(long)]
    trigger: Option<String>,

    /// Per-tag trigger sets (JSON list of lists of reaction ids); overrides
    /// `--tags` and `--trigger`
    #[arg(long)]
    script: Option<PathBuf>,

    /// Simulated work per reaction, in microseconds
    #[arg(long, default_value = "0")]
    work_us: u64,

    /// Worker thread name prefix
    #[arg(long, default_value = "cadence-worker")]
    thread_name: String,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let table = load_table(&args.table)?;

    if let Some(path) = &args.script {
        let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let tags: Vec<Vec<ReactionId>> =
            serde_json::from_str(&text).with_context(|| format!("invalid tag script {}", path.display()))?;
        return execute(table, TagScript::new(tags), &args);
    }

    let reactions = match &args.trigger {
        Some(list) => parse_reactions(list)?,
        None => (0..table.reaction_count as u32).map(ReactionId).collect(),
    };
    execute(table, Periodic::new(reactions, args.tags), &args)
}

fn execute<A: TagAdvancer>(table: ScheduleTable, advancer: A, args: &RunArgs) -> anyhow::Result<()> {
    let config = SchedulerConfig {
        workers: table.worker_count,
        thread_name: args.thread_name.clone(),
        ..SchedulerConfig::default()
    };
    let program = placeholder_program(table.reaction_count, Duration::from_micros(args.work_us));

    let scheduler = QsScheduler::initialize(config, table, advancer)?;
    let report = run_program(&scheduler, &program, &RunOptions::default())?;
    let stats = scheduler.shutdown();

    info!(
        tags = report.tags,
        executed = report.total_executed(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "run complete"
    );
    info!(
        dispatched = stats.dispatched,
        skipped = stats.skipped,
        waits = stats.waits,
        notifies = stats.notifies,
        stale = stats.stale_triggers,
        "interpreter counters"
    );
    for (w, count) in report.executed.iter().enumerate() {
        info!("  w{}: {} reactions", w, count);
    }
    Ok(())
}

/// One body per reaction that sleeps for `work`
fn placeholder_program(count: usize, work: Duration) -> Program {
    if work.is_zero() {
        return Program::noop(count);
    }
    let mut program = Program::new();
    for _ in 0..count {
        program.register(Box::new(move |_: &ReactionContext| {
            thread::sleep(work);
            Ok(())
        }));
    }
    program
}
