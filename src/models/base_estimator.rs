use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;

use crate::error::{ConfigError, DetectorError, Result};
use crate::models::factor_analysis::FactorAnalysis;
use crate::models::gmm::GaussianMixture;
use crate::models::pca::Pca;
use crate::utils::linalg::{add_to_diagonal, cholesky, lower_triangular_inverse};

/// A common trait for the covariance estimators a detector can wrap.
pub trait BaseEstimator: Send {
    /// Fit on nominal rows. Stochastic estimators draw from `rng`.
    fn fit(&mut self, x: ArrayView2<f64>, rng: &mut StdRng) -> Result<()>;

    /// Map rows into the estimator's own representation.
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Feature-space covariance implied by the fitted model.
    fn covariance(&self) -> Result<Array2<f64>>;

    /// Feature-space mean implied by the fitted model.
    fn mean(&self) -> Result<Array1<f64>>;

    /// Maps rows into coordinates where Euclidean distance is the
    /// Mahalanobis distance under `covariance() + reg * I`.
    fn whiten(&self, x: ArrayView2<f64>, reg: f64) -> Result<Array2<f64>> {
        cholesky_whiten(self.mean()?.view(), self.covariance()?, reg, x)
    }

    fn is_fitted(&self) -> bool;

    fn n_components(&self) -> usize;

    fn kind(&self) -> EstimatorKind;
}

/// The estimator families selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimatorKind {
    /// Gaussian mixture with full covariances
    Gmm,
    /// Factor analysis
    Fa,
    /// Principal component analysis
    Pca,
}

impl EstimatorKind {
    pub fn build(self, n_components: usize) -> Box<dyn BaseEstimator> {
        match self {
            EstimatorKind::Gmm => Box::new(GaussianMixture::new(n_components)),
            EstimatorKind::Fa => Box::new(FactorAnalysis::new(n_components)),
            EstimatorKind::Pca => Box::new(Pca::new(n_components)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EstimatorKind::Gmm => "GMM",
            EstimatorKind::Fa => "FA",
            EstimatorKind::Pca => "PCA",
        }
    }
}

impl FromStr for EstimatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GMM" => Ok(EstimatorKind::Gmm),
            "FA" => Ok(EstimatorKind::Fa),
            "PCA" => Ok(EstimatorKind::Pca),
            other => Err(ConfigError::InvalidEstimator(other.to_string())),
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejects component counts outside `1..=max`.
pub(crate) fn check_components(n_components: usize, max: usize, what: &str) -> Result<()> {
    if n_components == 0 || n_components > max {
        return Err(DetectorError::invalid_parameter(
            "n_components",
            n_components,
            &format!("must be between 1 and {} ({})", max, what),
        ));
    }
    Ok(())
}

/// Rejects matrices whose width differs from the fitted width.
pub(crate) fn check_width(expected: usize, x: &ArrayView2<f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(DetectorError::ShapeMismatch {
            expected: format!("{} features", expected),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

/// `z = L^-1 (x - mean)` with `L L^T = covariance + reg * I`.
pub(crate) fn cholesky_whiten(
    mean: ArrayView1<f64>,
    mut covariance: Array2<f64>,
    reg: f64,
    x: ArrayView2<f64>,
) -> Result<Array2<f64>> {
    check_width(mean.len(), &x)?;
    add_to_diagonal(&mut covariance, reg);
    let chol = cholesky(&covariance)?;
    let factor = lower_triangular_inverse(&chol).reversed_axes();
    Ok((&x - &mean).dot(&factor))
}
