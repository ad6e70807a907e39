use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;

use crate::error::{DetectorError, Result};
use crate::models::base_estimator::BaseEstimator;
use crate::models::gmm::GaussianMixture;
use crate::models::pca::Pca;
use crate::utils::evaluation::binarize;
use crate::utils::neighbors::{LabeledNeighbors, WeightScheme};

const MIN_FEATURE_SCALE: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct IntrusionConfig {
    pub gmm_components: usize,
    pub pca_components: usize,
    pub neighbors: usize,
    pub weights: WeightScheme,
}

impl Default for IntrusionConfig {
    fn default() -> Self {
        Self {
            gmm_components: 36,
            pca_components: 28,
            neighbors: 10,
            weights: WeightScheme::Uniform,
        }
    }
}

/// Standardisation of the two derived features, fixed on safe rows.
#[derive(Debug, Clone)]
struct FeatureScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

/// Turns raw traffic rows into an attack probability by locating each row's
/// (GMM surprise, PCA residual) pair among labelled training rows.
pub struct IntrusionDetectorImpl {
    config: IntrusionConfig,
    gmm: GaussianMixture,
    pca: Pca,
    scaler: Option<FeatureScaler>,
    reference: Option<LabeledNeighbors>,
}

impl IntrusionDetectorImpl {
    pub fn new(config: IntrusionConfig) -> Result<Self> {
        if config.neighbors == 0 {
            return Err(DetectorError::invalid_parameter(
                "neighbors",
                config.neighbors,
                "must be at least 1",
            ));
        }
        Ok(IntrusionDetectorImpl {
            gmm: GaussianMixture::new(config.gmm_components),
            pca: Pca::new(config.pca_components),
            config,
            scaler: None,
            reference: None,
        })
    }

    pub fn config(&self) -> &IntrusionConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.scaler.is_some() && self.reference.is_some()
    }

    /// Fits both density models on nominal rows.
    pub fn fit_safe(&mut self, x_safe: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        self.gmm.fit(x_safe, rng)?;
        self.pca.fit(x_safe, rng)?;

        let raw = self.raw_features(x_safe)?;
        let mean = raw
            .mean_axis(Axis(0))
            .ok_or_else(|| DetectorError::EmptyInput("no safe rows".to_string()))?;
        let scale = raw.std_axis(Axis(0), 0.0).mapv(|s| if s > MIN_FEATURE_SCALE { s } else { 1.0 });

        log::info!(
            "intrusion detector fitted on {} safe rows (nll mean {:.3}, residual mean {:.3})",
            x_safe.nrows(),
            mean[0],
            mean[1]
        );
        self.scaler = Some(FeatureScaler { mean, scale });
        self.reference = None;
        Ok(())
    }

    /// Builds the labelled neighbour reference from training rows.
    pub fn fit(&mut self, x_train: ArrayView2<f64>, y_train: ArrayView1<usize>) -> Result<()> {
        if x_train.nrows() != y_train.len() {
            return Err(DetectorError::LengthMismatch {
                features: x_train.nrows(),
                labels: y_train.len(),
            });
        }
        let features = self.features(x_train)?;
        self.reference = Some(LabeledNeighbors::new(
            features,
            binarize(y_train),
            self.config.neighbors,
            self.config.weights,
        )?);
        Ok(())
    }

    /// One probability-like score in [0, 1] per row.
    pub fn predict_attack_probability(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let reference = self.reference.as_ref().ok_or(DetectorError::NotFitted)?;
        let features = self.features(x)?;
        Ok(reference.attack_fractions(features.view()))
    }

    /// Standardised (negative log-likelihood, squared residual) per row.
    pub fn features(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let scaler = self.scaler.as_ref().ok_or(DetectorError::NotFitted)?;
        let raw = self.raw_features(x)?;
        Ok((raw - &scaler.mean) / &scaler.scale)
    }

    fn raw_features(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let nll = self.gmm.score_samples(x)?.mapv(|v| -v);
        let residual = self.pca.reconstruction_error(x)?;
        let mut raw = Array2::<f64>::zeros((x.nrows(), 2));
        raw.column_mut(0).assign(&nll);
        raw.column_mut(1).assign(&residual);
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::dataset::{SyntheticConfig, TrafficSplits};
    use rand::SeedableRng;

    fn small_config() -> IntrusionConfig {
        IntrusionConfig {
            gmm_components: 2,
            pca_components: 4,
            neighbors: 10,
            weights: WeightScheme::Uniform,
        }
    }

    fn data(seed: u64) -> TrafficSplits {
        let config = SyntheticConfig {
            n_features: 10,
            ..SyntheticConfig::default()
        };
        TrafficSplits::synthetic(&config, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = IntrusionConfig::default();
        assert_eq!(config.gmm_components, 36);
        assert_eq!(config.pca_components, 28);
        assert_eq!(config.neighbors, 10);
    }

    #[test]
    fn test_probabilities_are_bounded_and_rank_attacks_higher() {
        let splits = data(0);
        let mut rng = StdRng::seed_from_u64(0);
        let mut detector = IntrusionDetectorImpl::new(small_config()).unwrap();
        detector.fit_safe(splits.safe.x.view(), &mut rng).unwrap();
        detector.fit(splits.train.x.view(), splits.train.y.view()).unwrap();

        let proba = detector.predict_attack_probability(splits.test.x.view()).unwrap();
        assert_eq!(proba.len(), splits.test.n_samples());
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));

        let mean_of = |attack: bool| {
            let picked: Vec<f64> = proba
                .iter()
                .zip(splits.test.y.iter())
                .filter(|&(_, &label)| (label != 0) == attack)
                .map(|(&p, _)| p)
                .collect();
            picked.iter().sum::<f64>() / picked.len() as f64
        };
        assert!(mean_of(true) > mean_of(false) + 0.3);
    }

    #[test]
    fn test_safe_features_are_standardised() {
        let splits = data(1);
        let mut detector = IntrusionDetectorImpl::new(small_config()).unwrap();
        detector.fit_safe(splits.safe.x.view(), &mut StdRng::seed_from_u64(1)).unwrap();

        let features = detector.features(splits.safe.x.view()).unwrap();
        let mean = features.mean_axis(Axis(0)).unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-9));
    }

    #[test]
    fn test_requires_both_fitting_stages() {
        let splits = data(2);
        let mut detector = IntrusionDetectorImpl::new(small_config()).unwrap();
        assert!(matches!(
            detector.fit(splits.train.x.view(), splits.train.y.view()),
            Err(DetectorError::NotFitted)
        ));

        detector.fit_safe(splits.safe.x.view(), &mut StdRng::seed_from_u64(2)).unwrap();
        assert!(matches!(
            detector.predict_attack_probability(splits.test.x.view()),
            Err(DetectorError::NotFitted)
        ));
    }
}
