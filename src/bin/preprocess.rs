//! Reduces traffic partitions to per-row attack probabilities.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use covdetect::models::intrusion_detector::IntrusionConfig;
use covdetect::preprocess::preprocess_datasets;
use covdetect::utils::dataset::{SyntheticConfig, TrafficSplits};
use covdetect::utils::neighbors::WeightScheme;

#[derive(Parser)]
#[command(name = "preprocess")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Attack probability preprocessing", long_about = None)]
struct Cli {
    /// Directory holding safe.jsonl, train.jsonl and test.jsonl
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Output directory for the attack probability files
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 36)]
    gmm_components: usize,

    #[arg(long, default_value_t = 28)]
    pca_components: usize,

    /// Neighbours consulted per probability
    #[arg(short, long, default_value_t = 10)]
    neighbors: usize,

    /// Seed for every random draw
    #[arg(short, long, default_value_t = 0)]
    seed: u64,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let splits = match &cli.data {
        Some(dir) => TrafficSplits::load_dir(dir).with_context(|| format!("failed to load data from {}", dir.display()))?,
        None => TrafficSplits::synthetic(&SyntheticConfig::default(), &mut rng).context("failed to generate synthetic data")?,
    };

    let config = IntrusionConfig {
        gmm_components: cli.gmm_components,
        pca_components: cli.pca_components,
        neighbors: cli.neighbors,
        weights: WeightScheme::Uniform,
    };
    let preprocessed = preprocess_datasets(&splits, &config, &mut rng).context("preprocessing failed")?;

    match &cli.output {
        Some(dir) => {
            preprocessed
                .save_dir(&splits, dir)
                .with_context(|| format!("failed to write {}", dir.display()))?;
            log::info!("wrote attack probabilities to {}", dir.display());
        }
        None => {
            let [safe, train, test] = preprocessed.means();
            println!("Safe mean attack probability: {:.3}", safe);
            println!("Train mean attack probability: {:.3}", train);
            println!("Test mean attack probability: {:.3}", test);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(Cli::parse()) {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
