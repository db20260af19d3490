use anyhow::Result;
use clap::Parser;
use dumbbell_core::{DumbbellSpec, ExperimentConfig, RunDir, defaults, run_experiment};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod sim;

/// Compare congestion-control algorithms competing over a shared
/// dumbbell bottleneck, writing per-connection traces and per-flow
/// statistics to a fresh run directory.
#[derive(Parser)]
#[command(version)]
struct Command {
    /// number of sending leaves on each side of the bottleneck
    #[arg(long, default_value = "2")]
    leaf_count: u32,

    /// root directory; each run gets its own timestamped subdirectory
    #[arg(long, default_value = defaults::OUTPUT_ROOT)]
    out: PathBuf,

    /// seed for the engine's loss randomness
    #[arg(long, default_value = "0")]
    seed: u64,
}

fn main() -> Result<()> {
    let cmd = Command::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ExperimentConfig {
        spec: DumbbellSpec {
            leaf_count: cmd.leaf_count,
            ..DumbbellSpec::default()
        },
        ..ExperimentConfig::default()
    };

    let run_dir = RunDir::create(&cmd.out)?;
    tracing::info!(dir = %run_dir.path().display(), "run directory created");

    let engine = sim::FluidEngine::new(cmd.seed);
    let summary = run_experiment(engine, &config, &run_dir)?;

    for flow in &summary.flows {
        match flow.goodput_mbps {
            Some(mbps) => println!("Flow: {} Goodput: {mbps} Mbps", flow.flow),
            None => println!("Flow: {} Goodput: undefined", flow.flow),
        }
    }
    println!("Results written to {}", run_dir.path().display());
    Ok(())
}
