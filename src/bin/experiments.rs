//! Covariance detector experiments
//!
//! Fits a single or dual covariance detector and reports false positives
//! on the safe partition plus MCC and false positives on a validation split.

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use rand::rngs::StdRng;
use rand::SeedableRng;

use covdetect::experiment::{run_experiment, ExperimentConfig, DEFAULT_NEIGHBORS, DEFAULT_SEED};
use covdetect::utils::dataset::{SyntheticConfig, TrafficSplits};

#[derive(Parser)]
#[command(name = "experiments")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Covariance-based intrusion detection experiments", long_about = None)]
struct Cli {
    /// Estimators: one or two of GMM, FA, PCA
    #[arg(short, long, num_args = 1..)]
    estimator: Option<Vec<String>>,

    /// Number of components, one per estimator
    #[arg(short, long, num_args = 1..)]
    components: Option<Vec<usize>>,

    /// Neighbours consulted per prediction
    #[arg(short, long, default_value_t = DEFAULT_NEIGHBORS)]
    neighbors: usize,

    /// Seed for every random draw
    #[arg(short, long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Directory holding safe.jsonl, train.jsonl and test.jsonl
    #[arg(short, long)]
    data: Option<PathBuf>,
}

fn load_splits(cli: &Cli) -> anyhow::Result<TrafficSplits> {
    match &cli.data {
        Some(dir) => TrafficSplits::load_dir(dir).with_context(|| format!("failed to load data from {}", dir.display())),
        None => {
            log::info!("no data directory given, generating synthetic traffic");
            let mut rng = StdRng::seed_from_u64(cli.seed);
            TrafficSplits::synthetic(&SyntheticConfig::default(), &mut rng).context("failed to generate synthetic data")
        }
    }
}

fn run(cli: &Cli, config: &ExperimentConfig) -> anyhow::Result<()> {
    let splits = load_splits(cli)?;
    let report = run_experiment(config, &splits).context("experiment failed")?;
    print!("{}", report);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = match ExperimentConfig::from_args(
        cli.estimator.as_deref(),
        cli.components.as_deref(),
        cli.neighbors,
        cli.seed,
    ) {
        Ok(config) => config,
        Err(e) => {
            println!("{}", e);
            println!("{}", Cli::command().render_usage());
            std::process::exit(-1);
        }
    };

    if let Err(e) = run(&cli, &config) {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
