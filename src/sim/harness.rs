//! CLI entry point for the simulation harness: runs a move plan against simulated nodes.

use canmotion::MoveGroupRunner;
use canmotion::motion::MovePlan;
use canmotion_shared::NodeId;
use canmotion_shared::config::{RunnerConfig, load_config};
use canmotion_simulator::{SimOptions, SimulatedBus};
use clap::Parser;
use std::path::PathBuf;

/// Simulation Harness CLI
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Run a move-group plan against simulated CAN nodes.")]
pub struct Cli {
    /// Path to a TOML runner config (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a TOML move plan
    #[arg(short, long, default_value = "sim/plans/demo.toml")]
    plan: PathBuf,

    /// Tell the firmware not to treat stalls as errors
    #[arg(long)]
    ignore_stalls: bool,

    /// Group id of the first group in the plan
    #[arg(long)]
    start_at: Option<u8>,

    /// Multiplier applied to simulated move durations
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,

    /// Shuffle the order nodes report in, seeded for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match cli.config {
        Some(ref path) => match load_config(&path.to_string_lossy()) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => RunnerConfig::default(),
    };
    if cli.ignore_stalls {
        config.ignore_stalls = true;
    }
    if let Some(index) = cli.start_at {
        config.start_at_index = index;
    }

    let plan = match MovePlan::load(&cli.plan) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Failed to load plan {}: {e}", cli.plan.display());
            std::process::exit(1);
        }
    };

    let mut runner = MoveGroupRunner::new(plan.groups).with_config(config.clone());
    let nodes: Vec<NodeId> = runner.all_nodes().into_iter().collect();
    tracing::info!("Running plan {} on {} simulated nodes", cli.plan.display(), nodes.len());
    let bus = SimulatedBus::with_options(
        nodes,
        SimOptions {
            time_scale: cli.time_scale,
            shuffle_seed: cli.seed,
            rates: config.rates,
        },
    );

    let started = tokio::time::Instant::now();
    let outcome = match runner.run(&bus).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Move plan failed: {}", e);
            std::process::exit(2);
        }
    };
    tracing::info!("Move plan finished in {:?}", started.elapsed());

    if cli.json {
        match serde_json::to_string_pretty(&outcome) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize outcome: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let mut positions: Vec<_> = outcome.positions.iter().collect();
    positions.sort_by_key(|(node, _)| **node);
    for (node, status) in positions {
        println!(
            "{:<14} motor {:>10.3} mm  encoder {:>10.3} mm  ok={}/{}",
            node.name(),
            status.motor_position,
            status.encoder_position,
            status.motor_ok,
            status.encoder_ok
        );
    }
    for (node, gears) in &outcome.gear_motor_positions {
        for (motor, status) in gears {
            println!("{:<14} gear {:?} {:>10.3} mm", node.name(), motor, status.motor_position);
        }
    }
}
