// src/models/cov_detector.rs

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;

use crate::error::{DetectorError, Result};
use crate::models::base_estimator::BaseEstimator;
use crate::utils::evaluation::{best_mcc_threshold, binarize, false_positives, matthews_corrcoef};
use crate::utils::neighbors::{NominalNeighbors, WeightScheme};

/// Added to the modelled covariance before distances are taken.
pub const REG_COVAR: f64 = 1e-6;

/// Covariance-distance detector: an estimator fitted on nominal traffic
/// defines the metric, and the nominal rows themselves are the neighbours
/// every row is measured against.
pub struct CovDetectorImpl {
    estimator: Box<dyn BaseEstimator>,
    neighbors: usize,
    weights: WeightScheme,
    reference: Option<NominalNeighbors>,
    threshold: Option<f64>,
}

impl CovDetectorImpl {
    pub fn new(estimator: Box<dyn BaseEstimator>, neighbors: usize, weights: WeightScheme) -> Result<Self> {
        if neighbors == 0 {
            return Err(DetectorError::invalid_parameter("neighbors", neighbors, "must be at least 1"));
        }
        Ok(CovDetectorImpl {
            estimator,
            neighbors,
            weights,
            reference: None,
            threshold: None,
        })
    }

    pub fn estimator(&self) -> &dyn BaseEstimator {
        self.estimator.as_ref()
    }

    pub fn neighbors(&self) -> usize {
        self.neighbors
    }

    pub fn weights(&self) -> WeightScheme {
        self.weights
    }

    /// Calibrated decision threshold, `None` until `fit`.
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn is_fitted(&self) -> bool {
        self.reference.is_some() && self.threshold.is_some()
    }

    /// Fits the wrapped estimator on nominal rows and keeps those rows, in
    /// the estimator's whitened coordinates, as the neighbour reference.
    pub fn fit_cov(&mut self, x_safe: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        self.fit_cov_with_reference(x_safe, x_safe, rng)
    }

    /// Learns the covariance from `x_cov` but measures distances to
    /// `x_reference`, which must hold nominal rows only.
    pub fn fit_cov_with_reference(
        &mut self,
        x_cov: ArrayView2<f64>,
        x_reference: ArrayView2<f64>,
        rng: &mut StdRng,
    ) -> Result<()> {
        self.estimator.fit(x_cov, rng)?;
        let whitened = self.estimator.whiten(x_reference, REG_COVAR)?;
        log::info!(
            "{} covariance fitted on {} rows, {} nominal reference rows ({} whitened dimensions)",
            self.estimator.kind(),
            x_cov.nrows(),
            whitened.nrows(),
            whitened.ncols()
        );
        self.reference = Some(NominalNeighbors::new(whitened, self.neighbors, self.weights)?);
        // a new metric invalidates any earlier calibration
        self.threshold = None;
        Ok(())
    }

    /// Picks the distance threshold that best separates the labelled
    /// training rows by MCC. The estimator and reference are left untouched.
    pub fn fit(&mut self, x_train: ArrayView2<f64>, y_train: ArrayView1<usize>) -> Result<()> {
        if self.reference.is_none() {
            return Err(DetectorError::NotFitted);
        }
        if x_train.nrows() != y_train.len() {
            return Err(DetectorError::LengthMismatch {
                features: x_train.nrows(),
                labels: y_train.len(),
            });
        }
        if x_train.nrows() == 0 {
            return Err(DetectorError::EmptyInput("calibration needs training rows".to_string()));
        }

        let scores = self.attack_scores(x_train)?;
        let labels = binarize(y_train);
        // start from flagging no training row at all
        let ceiling = scores
            .iter()
            .copied()
            .filter(|s| s.is_finite())
            .fold(0.0, f64::max);
        let (threshold, mcc) = best_mcc_threshold(scores.view(), labels.view(), ceiling);
        log::debug!(
            "calibrated distance threshold {:.4} (training MCC {:.4}) on {} rows",
            threshold,
            mcc,
            x_train.nrows()
        );

        self.threshold = Some(threshold);
        Ok(())
    }

    /// Weighted Mahalanobis distance from each row to its nearest safe rows.
    pub fn attack_scores(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let reference = self.reference.as_ref().ok_or(DetectorError::NotFitted)?;
        let whitened = self.estimator.whiten(x, REG_COVAR)?;
        Ok(reference.distance_scores(whitened.view()))
    }

    /// 1 for rows flagged as attack, 0 otherwise.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<usize>> {
        let threshold = self.threshold.ok_or(DetectorError::NotFitted)?;
        Ok(self.attack_scores(x)?.mapv(|s| usize::from(s > threshold)))
    }

    /// Matthews correlation between predictions and the binarised labels.
    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<f64> {
        let predicted = self.checked_predict(x, y)?;
        Ok(matthews_corrcoef(binarize(y).view(), predicted.view()))
    }

    /// Nominal rows flagged as attack.
    pub fn false_positives(&self, x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<usize> {
        let predicted = self.checked_predict(x, y)?;
        Ok(false_positives(y, predicted.view()))
    }

    fn checked_predict(&self, x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<Array1<usize>> {
        if x.nrows() != y.len() {
            return Err(DetectorError::LengthMismatch {
                features: x.nrows(),
                labels: y.len(),
            });
        }
        self.predict(x)
    }
}
