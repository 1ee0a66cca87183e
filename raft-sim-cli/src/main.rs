//! Command-line entry point: a batch scenario runner and, by default, an
//! interactive REPL over [`raft_sim_core::model::RaftModel`].

mod repl;

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use raft_sim_core::controller::AssertionResult;
use raft_sim_core::scenario;
use raft_sim_core::SimConfig;
use tracing_subscriber::prelude::*;

/// Deterministic discrete-event Raft consensus simulator.
#[derive(Parser, Debug)]
#[command(name = "raft-sim", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a scenario file, run it to completion, and report assertion results.
    Run {
        /// Path to a scenario YAML document.
        scenario: String,
    },
}

fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::Layer::default().with_ansi(false);
    let subscriber = tracing_subscriber::Registry::default()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Command::Run { scenario }) => run_batch(&scenario),
        None => repl::run(),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load a scenario, play it to completion, print assertion results. Returns
/// `Ok(true)` iff every assertion passed.
fn run_batch(path: &str) -> anyhow::Result<bool> {
    let text = fs::read_to_string(path)?;
    let parsed = scenario::parse(&text)?;
    let (mut model, mut controller) = scenario::build(&parsed, SimConfig::default(), fallback_seed())?;

    controller.play_to_end(&mut model)?;
    let results = controller.evaluate_assertions(&mut model)?;

    let mut all_passed = true;
    for AssertionResult { kind, after, passed } in &results {
        all_passed &= *passed;
        let verdict = if *passed { "PASS" } else { "FAIL" };
        println!("{verdict} {kind:?} (after={after})");
    }
    Ok(all_passed)
}

fn fallback_seed() -> u64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
