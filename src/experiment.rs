//! Experiment driver: parses the estimator selection once, runs
//! split / fit / score, and formats the report lines.

use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{ConfigError, Result};
use crate::models::base_estimator::EstimatorKind;
use crate::models::cov_detector::CovDetectorImpl;
use crate::models::dual_cov_detector::DualCovDetectorImpl;
use crate::utils::dataset::TrafficSplits;
use crate::utils::neighbors::WeightScheme;
use crate::utils::split::train_valid_split;

pub const DEFAULT_NEIGHBORS: usize = 10;
pub const DEFAULT_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorSpec {
    pub kind: EstimatorKind,
    pub components: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentMode {
    Single(EstimatorSpec),
    Dual(EstimatorSpec, EstimatorSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentConfig {
    pub mode: ExperimentMode,
    pub neighbors: usize,
    pub seed: u64,
    pub weights: WeightScheme,
}

impl ExperimentConfig {
    /// Validates raw command-line values. Checks run in the order the
    /// usage errors are reported: estimator list, component list, then
    /// each estimator name and its component count.
    pub fn from_args(
        estimators: Option<&[String]>,
        components: Option<&[usize]>,
        neighbors: usize,
        seed: u64,
    ) -> std::result::Result<Self, ConfigError> {
        let estimators = match estimators {
            Some(names) if !names.is_empty() => names,
            _ => return Err(ConfigError::MissingEstimator),
        };
        let components = match components {
            Some(counts) if !counts.is_empty() => counts,
            _ => return Err(ConfigError::MissingComponents),
        };

        let mode = match estimators {
            [name] => ExperimentMode::Single(EstimatorSpec {
                kind: name
                    .parse()
                    .map_err(|_| ConfigError::InvalidSingleEstimator(estimators.to_vec()))?,
                components: components[0],
            }),
            [first, second] => {
                let first = EstimatorSpec {
                    kind: first.parse()?,
                    components: components[0],
                };
                let second_components = *components.get(1).ok_or(ConfigError::MissingSecondComponents)?;
                let second = EstimatorSpec {
                    kind: second.parse()?,
                    components: second_components,
                };
                ExperimentMode::Dual(first, second)
            }
            more => return Err(ConfigError::TooManyEstimators(more.len())),
        };

        Ok(ExperimentConfig {
            mode,
            neighbors,
            seed,
            weights: WeightScheme::Uniform,
        })
    }
}

/// The three numbers every experiment reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentReport {
    pub safe_fp: usize,
    pub valid_mcc: f64,
    pub valid_fp: usize,
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Safe fp: {}", self.safe_fp)?;
        writeln!(f, "Valid MCC: {:.3}", self.valid_mcc)?;
        writeln!(f, "Valid fp: {}", self.valid_fp)
    }
}

/// A single or dual detector behind one fit / score surface.
pub enum Experiment {
    Single(CovDetectorImpl),
    Dual(DualCovDetectorImpl),
}

impl Experiment {
    pub fn from_config(config: &ExperimentConfig) -> Result<Self> {
        Ok(match config.mode {
            ExperimentMode::Single(spec) => Experiment::Single(CovDetectorImpl::new(
                spec.kind.build(spec.components),
                config.neighbors,
                config.weights,
            )?),
            ExperimentMode::Dual(first, second) => Experiment::Dual(DualCovDetectorImpl::new(
                first.kind.build(first.components),
                second.kind.build(second.components),
                config.neighbors,
                config.weights,
            )?),
        })
    }

    pub fn is_dual(&self) -> bool {
        matches!(self, Experiment::Dual(_))
    }

    /// The dual detector also learns a metric from the training rows.
    pub fn fit_cov(&mut self, x_safe: ArrayView2<f64>, x_train: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        match self {
            Experiment::Single(detector) => detector.fit_cov(x_safe, rng),
            Experiment::Dual(detector) => detector.fit_cov(x_safe, x_train, rng),
        }
    }

    pub fn fit(&mut self, x_train: ArrayView2<f64>, y_train: ArrayView1<usize>) -> Result<()> {
        match self {
            Experiment::Single(detector) => detector.fit(x_train, y_train),
            Experiment::Dual(detector) => detector.fit(x_train, y_train),
        }
    }

    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<f64> {
        match self {
            Experiment::Single(detector) => detector.score(x, y),
            Experiment::Dual(detector) => detector.score(x, y),
        }
    }

    pub fn false_positives(&self, x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<usize> {
        match self {
            Experiment::Single(detector) => detector.false_positives(x, y),
            Experiment::Dual(detector) => detector.false_positives(x, y),
        }
    }
}

/// Splits the training partition, fits on safe + train halves and scores
/// the safe rows and the validation half.
pub fn run_experiment(config: &ExperimentConfig, splits: &TrafficSplits) -> Result<ExperimentReport> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let split = train_valid_split(splits.train.x.view(), splits.train.y.view(), true, &mut rng)?;

    let mut experiment = Experiment::from_config(config)?;
    log::info!(
        "running {} experiment: {:?}, {} neighbors, seed {}",
        if experiment.is_dual() { "dual" } else { "single" },
        config.mode,
        config.neighbors,
        config.seed
    );

    experiment.fit_cov(splits.safe.x.view(), split.x_train.view(), &mut rng)?;
    experiment.fit(split.x_train.view(), split.y_train.view())?;

    Ok(ExperimentReport {
        safe_fp: experiment.false_positives(splits.safe.x.view(), splits.safe.y.view())?,
        valid_mcc: experiment.score(split.x_valid.view(), split.y_valid.view())?,
        valid_fp: experiment.false_positives(split.x_valid.view(), split.y_valid.view())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_mode() {
        let estimators = names(&["PCA"]);
        let config = ExperimentConfig::from_args(Some(&estimators), Some(&[5]), 10, 0).unwrap();
        assert_eq!(
            config.mode,
            ExperimentMode::Single(EstimatorSpec {
                kind: EstimatorKind::Pca,
                components: 5
            })
        );
    }

    #[test]
    fn test_dual_mode() {
        let estimators = names(&["GMM", "PCA"]);
        let config = ExperimentConfig::from_args(Some(&estimators), Some(&[3, 5]), 10, 0).unwrap();
        match config.mode {
            ExperimentMode::Dual(first, second) => {
                assert_eq!(first.kind, EstimatorKind::Gmm);
                assert_eq!(first.components, 3);
                assert_eq!(second.kind, EstimatorKind::Pca);
                assert_eq!(second.components, 5);
            }
            other => panic!("expected dual mode, got {:?}", other),
        }
    }

    #[test]
    fn test_config_errors() {
        let pca = names(&["PCA"]);
        assert_eq!(
            ExperimentConfig::from_args(None, Some(&[5]), 10, 0),
            Err(ConfigError::MissingEstimator)
        );
        assert_eq!(
            ExperimentConfig::from_args(Some(&pca), None, 10, 0),
            Err(ConfigError::MissingComponents)
        );
        assert_eq!(
            ExperimentConfig::from_args(Some(&names(&["BAD"])), Some(&[5]), 10, 0),
            Err(ConfigError::InvalidSingleEstimator(names(&["BAD"])))
        );
        assert_eq!(
            ExperimentConfig::from_args(Some(&names(&["GMM", "FA"])), Some(&[3]), 10, 0),
            Err(ConfigError::MissingSecondComponents)
        );
        assert_eq!(
            ExperimentConfig::from_args(Some(&names(&["BAD", "FA"])), Some(&[3]), 10, 0),
            Err(ConfigError::InvalidEstimator("BAD".to_string()))
        );
        assert_eq!(
            ExperimentConfig::from_args(Some(&names(&["GMM", "FA", "PCA"])), Some(&[1, 2, 3]), 10, 0),
            Err(ConfigError::TooManyEstimators(3))
        );
    }

    #[test]
    fn test_report_format() {
        let report = ExperimentReport {
            safe_fp: 3,
            valid_mcc: 0.87654,
            valid_fp: 1,
        };
        assert_eq!(report.to_string(), "Safe fp: 3\nValid MCC: 0.877\nValid fp: 1\n");
    }
}
