//! Reduces raw traffic partitions to one attack probability per row.

use std::path::Path;

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;

use crate::error::{DetectorError, Result};
use crate::models::intrusion_detector::{IntrusionConfig, IntrusionDetectorImpl};
use crate::utils::dataset::{write_jsonl, AttackProbabilityRecord, TrafficSplits};

/// Attack probabilities for each partition, row-aligned with the input.
#[derive(Debug, Clone)]
pub struct PreprocessedSplits {
    pub safe: Array1<f64>,
    pub train: Array1<f64>,
    pub test: Array1<f64>,
}

/// Fits an intrusion detector on the safe rows and the labelled training
/// rows, then scores all three partitions.
pub fn preprocess_datasets(
    splits: &TrafficSplits,
    config: &IntrusionConfig,
    rng: &mut StdRng,
) -> Result<PreprocessedSplits> {
    let mut detector = IntrusionDetectorImpl::new(config.clone())?;
    detector.fit_safe(splits.safe.x.view(), rng)?;
    detector.fit(splits.train.x.view(), splits.train.y.view())?;

    let preprocessed = PreprocessedSplits {
        safe: detector.predict_attack_probability(splits.safe.x.view())?,
        train: detector.predict_attack_probability(splits.train.x.view())?,
        test: detector.predict_attack_probability(splits.test.x.view())?,
    };
    log::info!(
        "preprocessed {} safe, {} train, {} test rows",
        preprocessed.safe.len(),
        preprocessed.train.len(),
        preprocessed.test.len()
    );
    Ok(preprocessed)
}

pub fn probability_records(
    probabilities: ArrayView1<f64>,
    labels: ArrayView1<usize>,
) -> Result<Vec<AttackProbabilityRecord>> {
    if probabilities.len() != labels.len() {
        return Err(DetectorError::LengthMismatch {
            features: probabilities.len(),
            labels: labels.len(),
        });
    }
    Ok(probabilities
        .iter()
        .zip(labels.iter())
        .map(|(&attack_probability, &label)| AttackProbabilityRecord {
            attack_probability,
            label,
        })
        .collect())
}

impl PreprocessedSplits {
    /// Writes `safe.jsonl`, `train.jsonl` and `test.jsonl` under `dir`,
    /// labelled from the partitions they were computed on.
    pub fn save_dir(&self, splits: &TrafficSplits, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let parts = [
            ("safe.jsonl", &self.safe, &splits.safe.y),
            ("train.jsonl", &self.train, &splits.train.y),
            ("test.jsonl", &self.test, &splits.test.y),
        ];
        for (name, probabilities, labels) in parts {
            let records = probability_records(probabilities.view(), labels.view())?;
            write_jsonl(&dir.join(name), &records)?;
        }
        Ok(())
    }

    /// Mean attack probability per partition, safe then train then test.
    pub fn means(&self) -> [f64; 3] {
        let mean = |a: &Array1<f64>| a.mean().unwrap_or(0.0);
        [mean(&self.safe), mean(&self.train), mean(&self.test)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::dataset::{read_jsonl, SyntheticConfig};
    use crate::utils::neighbors::WeightScheme;
    use rand::SeedableRng;

    fn small_config() -> IntrusionConfig {
        IntrusionConfig {
            gmm_components: 2,
            pca_components: 3,
            neighbors: 5,
            weights: WeightScheme::Uniform,
        }
    }

    fn splits() -> TrafficSplits {
        let config = SyntheticConfig {
            n_features: 8,
            ..SyntheticConfig::default()
        };
        TrafficSplits::synthetic(&config, &mut StdRng::seed_from_u64(4)).unwrap()
    }

    #[test]
    fn test_probabilities_cover_every_partition() {
        let data = splits();
        let out = preprocess_datasets(&data, &small_config(), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(out.safe.len(), data.safe.n_samples());
        assert_eq!(out.train.len(), data.train.n_samples());
        assert_eq!(out.test.len(), data.test.n_samples());

        let [safe, _, test] = out.means();
        assert!(safe < test);
    }

    #[test]
    fn test_save_dir_writes_labelled_records() {
        let data = splits();
        let out = preprocess_datasets(&data, &small_config(), &mut StdRng::seed_from_u64(0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        out.save_dir(&data, dir.path()).unwrap();

        let test: Vec<AttackProbabilityRecord> = read_jsonl(&dir.path().join("test.jsonl")).unwrap();
        assert_eq!(test.len(), data.test.n_samples());
        assert_eq!(test[0].label, data.test.y[0]);
        assert!((test[0].attack_probability - out.test[0]).abs() < 1e-12);
    }

    #[test]
    fn test_records_reject_misaligned_labels() {
        let probabilities = Array1::from(vec![0.1, 0.9]);
        let labels = Array1::from(vec![0usize]);
        assert!(matches!(
            probability_records(probabilities.view(), labels.view()),
            Err(DetectorError::LengthMismatch { .. })
        ));
    }
}
