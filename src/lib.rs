#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod error;
pub mod experiment;
pub mod models;
pub mod preprocess;
pub mod utils;

#[cfg(feature = "python")]
mod python;

pub use error::{ConfigError, DetectorError, Result};
pub use experiment::{run_experiment, ExperimentConfig, ExperimentMode, ExperimentReport};
pub use models::base_estimator::{BaseEstimator, EstimatorKind};
pub use models::cov_detector::CovDetectorImpl;
pub use models::dual_cov_detector::DualCovDetectorImpl;
pub use models::intrusion_detector::{IntrusionConfig, IntrusionDetectorImpl};
pub use utils::dataset::{LabeledData, SyntheticConfig, TrafficSplits};
pub use utils::neighbors::WeightScheme;
pub use utils::split::{train_valid_split, TrainValidSplit};

/// A Python module implemented in Rust.
#[cfg(feature = "python")]
#[pymodule]
fn covdetect(_py: Python, m: &PyModule) -> PyResult<()> {
    // Covariance detectors:
    m.add_class::<python::CovDetector>()?;
    m.add_class::<python::DualCovDetector>()?;

    // Preprocessing:
    m.add_class::<python::IntrusionDetector>()?;

    m.add_function(wrap_pyfunction!(python::matthews_corrcoef, m)?)?;
    Ok(())
}
