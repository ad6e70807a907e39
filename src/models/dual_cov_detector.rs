use ndarray::{Array1, ArrayView1, ArrayView2, Zip};
use rand::rngs::StdRng;

use crate::error::{DetectorError, Result};
use crate::models::base_estimator::BaseEstimator;
use crate::models::cov_detector::CovDetectorImpl;
use crate::utils::dataset::concat_rows;
use crate::utils::evaluation::{binarize, false_positives, matthews_corrcoef};
use crate::utils::neighbors::WeightScheme;

/// Two covariance detectors with different nominal models. The first one
/// learns its metric from safe rows only, the second from safe plus
/// training rows. Both measure distances to the safe rows. A row is flagged
/// when either detector flags it.
pub struct DualCovDetectorImpl {
    first: CovDetectorImpl,
    second: CovDetectorImpl,
}

impl DualCovDetectorImpl {
    pub fn new(
        first: Box<dyn BaseEstimator>,
        second: Box<dyn BaseEstimator>,
        neighbors: usize,
        weights: WeightScheme,
    ) -> Result<Self> {
        Ok(DualCovDetectorImpl {
            first: CovDetectorImpl::new(first, neighbors, weights)?,
            second: CovDetectorImpl::new(second, neighbors, weights)?,
        })
    }

    pub fn first(&self) -> &CovDetectorImpl {
        &self.first
    }

    pub fn second(&self) -> &CovDetectorImpl {
        &self.second
    }

    pub fn is_fitted(&self) -> bool {
        self.first.is_fitted() && self.second.is_fitted()
    }

    pub fn fit_cov(&mut self, x_safe: ArrayView2<f64>, x_train: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        self.first.fit_cov(x_safe, rng)?;
        let combined = concat_rows(x_safe, x_train)?;
        self.second.fit_cov_with_reference(combined.view(), x_safe, rng)
    }

    pub fn fit(&mut self, x_train: ArrayView2<f64>, y_train: ArrayView1<usize>) -> Result<()> {
        self.first.fit(x_train, y_train)?;
        self.second.fit(x_train, y_train)
    }

    /// Each detector's own predictions, first then second.
    pub fn sub_predictions(&self, x: ArrayView2<f64>) -> Result<(Array1<usize>, Array1<usize>)> {
        Ok((self.first.predict(x)?, self.second.predict(x)?))
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<usize>> {
        let (a, b) = self.sub_predictions(x)?;
        Ok(Zip::from(&a).and(&b).map_collect(|&p, &q| usize::from(p != 0 || q != 0)))
    }

    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<usize>) -> Result<f64> {
        let predicted = self.checked_predict(x, y)?;
        Ok(matthews_corrcoef(binarize(y).view(), predicted.view()))
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::base_estimator::EstimatorKind;
    use crate::utils::dataset::{SyntheticConfig, TrafficSplits};
    use rand::SeedableRng;

    fn splits(seed: u64) -> TrafficSplits {
        let config = SyntheticConfig {
            n_features: 8,
            ..SyntheticConfig::default()
        };
        TrafficSplits::synthetic(&config, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    fn fitted_dual(seed: u64) -> (DualCovDetectorImpl, TrafficSplits) {
        let data = splits(seed);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut dual = DualCovDetectorImpl::new(
            EstimatorKind::Gmm.build(3),
            EstimatorKind::Pca.build(5),
            10,
            WeightScheme::Uniform,
        )
        .unwrap();
        dual.fit_cov(data.safe.x.view(), data.train.x.view(), &mut rng).unwrap();
        dual.fit(data.train.x.view(), data.train.y.view()).unwrap();
        (dual, data)
    }

    #[test]
    fn test_combined_flags_cover_each_detector() {
        let (dual, data) = fitted_dual(0);
        let (a, b) = dual.sub_predictions(data.test.x.view()).unwrap();
        let combined = dual.predict(data.test.x.view()).unwrap();

        for i in 0..combined.len() {
            assert!(combined[i] >= a[i]);
            assert!(combined[i] >= b[i]);
            assert_eq!(combined[i], a[i].max(b[i]));
        }
    }

    #[test]
    fn test_second_detector_sees_safe_and_train_rows() {
        let (dual, data) = fitted_dual(1);
        assert!(dual.is_fitted());
        assert_eq!(dual.first().estimator().kind(), EstimatorKind::Gmm);
        assert_eq!(dual.second().estimator().kind(), EstimatorKind::Pca);

        // the second model's mean is taken over the stacked rows
        let stacked = concat_rows(data.safe.x.view(), data.train.x.view()).unwrap();
        let expected = stacked.mean_axis(ndarray::Axis(0)).unwrap();
        let got = dual.second().estimator().mean().unwrap();
        for (a, b) in got.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_second_detector_measures_distance_to_safe_rows_only() {
        let data = splits(4);
        let mut rng = StdRng::seed_from_u64(4);
        let mut dual = DualCovDetectorImpl::new(
            EstimatorKind::Pca.build(5),
            EstimatorKind::Pca.build(5),
            10,
            WeightScheme::Distance,
        )
        .unwrap();
        dual.fit_cov(data.safe.x.view(), data.train.x.view(), &mut rng).unwrap();
        dual.fit(data.train.x.view(), data.train.y.view()).unwrap();

        // exact matches score 0 under distance weights
        let safe = dual.second().attack_scores(data.safe.x.view()).unwrap();
        assert!(safe.iter().all(|&s| s == 0.0));
        let train = dual.second().attack_scores(data.train.x.view()).unwrap();
        assert!(train.iter().all(|&s| s > 0.0));

        let (_, b) = dual.sub_predictions(data.test.x.view()).unwrap();
        assert!(b.iter().filter(|&&p| p != 0).count() < b.len());
    }

    #[test]
    fn test_scores_are_bounded_and_fp_limited() {
        let (dual, data) = fitted_dual(2);
        let mcc = dual.score(data.test.x.view(), data.test.y.view()).unwrap();
        assert!((-1.0..=1.0).contains(&mcc));
        let fp = dual.false_positives(data.test.x.view(), data.test.y.view()).unwrap();
        assert!(fp <= data.test.nominal_count());
    }

    #[test]
    fn test_unfitted_dual_refuses_to_score() {
        let data = splits(3);
        let dual = DualCovDetectorImpl::new(
            EstimatorKind::Fa.build(2),
            EstimatorKind::Pca.build(2),
            10,
            WeightScheme::Uniform,
        )
        .unwrap();
        assert!(matches!(
            dual.score(data.test.x.view(), data.test.y.view()),
            Err(DetectorError::NotFitted)
        ));
    }
}
