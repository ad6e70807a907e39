//! Error types shared by the estimators, detectors and dataset helpers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectorError>;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Model not fitted")]
    NotFitted,

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Length mismatch: {features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Class {class} has {count} member(s); stratified split needs at least 2")]
    InsufficientClassMembers { class: usize, count: usize },

    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DetectorError {
    pub fn invalid_parameter(name: &str, value: impl ToString, reason: &str) -> Self {
        DetectorError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(feature = "python")]
impl From<DetectorError> for pyo3::PyErr {
    fn from(err: DetectorError) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}

/// `['a', 'b']`
fn quoted_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{}'", name)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Command-line configuration problems. The messages are printed verbatim
/// ahead of the usage line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Error: missing an estimator. Valid options are: 'GMM', 'FA', or 'PCA'")]
    MissingEstimator,

    #[error("Error: missing number of components.")]
    MissingComponents,

    /// Single-estimator runs echo the whole estimator list.
    #[error("Invalid estimator: {}\nSupported estimators: 'GMM', 'FA', 'PCA'", quoted_list(.0))]
    InvalidSingleEstimator(Vec<String>),

    #[error("Invalid estimator: {0}\nSupported estimators: 'GMM', 'FA', or 'PCA'")]
    InvalidEstimator(String),

    #[error("Error: missing second estimator components.")]
    MissingSecondComponents,

    #[error("Error: expected one or two estimators, got {0}")]
    TooManyEstimators(usize),
}
