//! Labelled traffic records: JSON-lines I/O, the (safe, train, test)
//! partition triple and a seeded synthetic generator.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};
use crate::utils::evaluation::NORMAL_CLASS;

/// One labelled sample as stored on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LabeledRecord {
    pub features: Vec<f64>,
    pub label: usize,
}

/// One preprocessed sample: the derived attack probability and its label.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttackProbabilityRecord {
    pub attack_probability: f64,
    pub label: usize,
}

/// Feature matrix with row-aligned class labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledData {
    pub x: Array2<f64>,
    pub y: Array1<usize>,
}

impl LabeledData {
    pub fn new(x: Array2<f64>, y: Array1<usize>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(DetectorError::LengthMismatch {
                features: x.nrows(),
                labels: y.len(),
            });
        }
        Ok(LabeledData { x, y })
    }

    pub fn from_records(records: &[LabeledRecord]) -> Result<Self> {
        let first = records
            .first()
            .ok_or_else(|| DetectorError::EmptyInput("no records".to_string()))?;
        let width = first.features.len();

        let mut flat = Vec::with_capacity(records.len() * width);
        let mut labels = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            if record.features.len() != width {
                return Err(DetectorError::ShapeMismatch {
                    expected: format!("{} features", width),
                    actual: format!("{} features in record {}", record.features.len(), row),
                });
            }
            flat.extend_from_slice(&record.features);
            labels.push(record.label);
        }

        let x = Array2::from_shape_vec((records.len(), width), flat)
            .map_err(|e| DetectorError::DataError(e.to_string()))?;
        LabeledData::new(x, Array1::from_vec(labels))
    }

    pub fn to_records(&self) -> Vec<LabeledRecord> {
        self.x
            .outer_iter()
            .zip(self.y.iter())
            .map(|(row, &label)| LabeledRecord {
                features: row.to_vec(),
                label,
            })
            .collect()
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn nominal_count(&self) -> usize {
        self.y.iter().filter(|&&l| l == NORMAL_CLASS).count()
    }
}

/// Reads one JSON object per non-blank line.
pub fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            DetectorError::DataError(format!("{}:{}: {}", path.display(), lineno + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_labeled(path: &Path) -> Result<LabeledData> {
    let records: Vec<LabeledRecord> = read_jsonl(path)?;
    LabeledData::from_records(&records)
        .map_err(|e| DetectorError::DataError(format!("{}: {}", path.display(), e)))
}

/// Stacks the rows of `a` on top of the rows of `b`.
pub fn concat_rows(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<Array2<f64>> {
    concatenate(Axis(0), &[a.view(), b.view()]).map_err(|_| DetectorError::ShapeMismatch {
        expected: format!("{} columns", a.ncols()),
        actual: format!("{} columns", b.ncols()),
    })
}

/// Parameters for [`TrafficSplits::synthetic`].
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub n_features: usize,
    /// Rank of the nominal traffic manifold
    pub latent_dim: usize,
    pub n_safe: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub attack_fraction: f64,
    pub attack_types: usize,
    pub noise: f64,
    pub attack_shift: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_features: 41,
            latent_dim: 4,
            n_safe: 100,
            n_train: 200,
            n_test: 200,
            attack_fraction: 0.2,
            attack_types: 2,
            noise: 0.3,
            attack_shift: 4.0,
        }
    }
}

/// The three partitions every experiment works from. `safe` is nominal-only.
#[derive(Debug, Clone)]
pub struct TrafficSplits {
    pub safe: LabeledData,
    pub train: LabeledData,
    pub test: LabeledData,
}

impl TrafficSplits {
    pub fn new(safe: LabeledData, train: LabeledData, test: LabeledData) -> Result<Self> {
        let splits = TrafficSplits { safe, train, test };
        splits.validate()?;
        Ok(splits)
    }

    /// Loads `safe.jsonl`, `train.jsonl` and `test.jsonl` from `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let safe = load_labeled(&dir.join("safe.jsonl"))?;
        let train = load_labeled(&dir.join("train.jsonl"))?;
        let test = load_labeled(&dir.join("test.jsonl"))?;
        log::info!(
            "loaded {} safe, {} train, {} test rows from {}",
            safe.n_samples(),
            train.n_samples(),
            test.n_samples(),
            dir.display()
        );
        TrafficSplits::new(safe, train, test)
    }

    pub fn save_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        write_jsonl(&dir.join("safe.jsonl"), &self.safe.to_records())?;
        write_jsonl(&dir.join("train.jsonl"), &self.train.to_records())?;
        write_jsonl(&dir.join("test.jsonl"), &self.test.to_records())?;
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.safe.n_features()
    }

    fn validate(&self) -> Result<()> {
        let width = self.safe.n_features();
        for (name, part) in [("train", &self.train), ("test", &self.test)] {
            if part.n_features() != width {
                return Err(DetectorError::ShapeMismatch {
                    expected: format!("{} features", width),
                    actual: format!("{} features in {} partition", part.n_features(), name),
                });
            }
        }
        if self.safe.nominal_count() != self.safe.n_samples() {
            return Err(DetectorError::DataError(format!(
                "safe partition holds {} non-nominal rows",
                self.safe.n_samples() - self.safe.nominal_count()
            )));
        }
        Ok(())
    }

    /// Low-rank Gaussian nominal traffic plus attacks shifted off the
    /// nominal manifold, one shift direction per attack type.
    pub fn synthetic(config: &SyntheticConfig, rng: &mut StdRng) -> Result<Self> {
        if config.n_features == 0 || config.latent_dim == 0 || config.attack_types == 0 {
            return Err(DetectorError::invalid_parameter(
                "synthetic",
                format!("{:?}", config),
                "features, latent_dim and attack_types must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&config.attack_fraction) {
            return Err(DetectorError::invalid_parameter(
                "attack_fraction",
                config.attack_fraction,
                "must lie in [0, 1]",
            ));
        }

        let basis = Array2::from_shape_fn((config.n_features, config.latent_dim), |_| rng.gen_range(-1.0..1.0));
        let shifts: Vec<Array1<f64>> = (0..config.attack_types)
            .map(|_| {
                let direction = Array1::from_shape_fn(config.n_features, |_| standard_normal(rng));
                let norm = direction.dot(&direction).sqrt().max(f64::EPSILON);
                direction * (config.attack_shift / norm)
            })
            .collect();

        let mut partition = |n: usize, with_attacks: bool| -> Result<LabeledData> {
            let n_attacks = if with_attacks {
                (n as f64 * config.attack_fraction).round() as usize
            } else {
                0
            };
            let mut labels: Vec<usize> = (0..n_attacks).map(|i| 1 + i % config.attack_types).collect();
            labels.resize(n, NORMAL_CLASS);
            labels.shuffle(rng);

            let mut x = Array2::<f64>::zeros((n, config.n_features));
            for (mut row, &label) in x.outer_iter_mut().zip(labels.iter()) {
                let z = Array1::from_shape_fn(config.latent_dim, |_| standard_normal(rng));
                row.assign(&basis.dot(&z));
                row.mapv_inplace(|v| v + config.noise * standard_normal(rng));
                if label != NORMAL_CLASS {
                    row += &shifts[label - 1];
                }
            }
            LabeledData::new(x, Array1::from_vec(labels))
        };

        let safe = partition(config.n_safe, false)?;
        let train = partition(config.n_train, true)?;
        let test = partition(config.n_test, true)?;
        TrafficSplits::new(safe, train, test)
    }
}

/// Box-Muller draw from N(0, 1).
pub fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use tempfile::tempdir;

    #[test]
    fn test_records_round_trip_through_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        let data = LabeledData::new(array![[1.0, 2.5], [-3.0, 0.0]], array![0, 4]).unwrap();

        write_jsonl(&path, &data.to_records()).unwrap();
        let loaded = load_labeled(&path).unwrap();

        assert_eq!(loaded, data);
    }

    #[test]
    fn test_read_jsonl_skips_blank_lines_and_reports_bad_ones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("safe.jsonl");
        std::fs::write(&path, "{\"features\":[1.0],\"label\":0}\n\n{\"features\":[2.0],\"label\":0}\n").unwrap();
        assert_eq!(load_labeled(&path).unwrap().n_samples(), 2);

        std::fs::write(&path, "{\"features\":[1.0],\"label\":0}\nnot json\n").unwrap();
        let err = load_labeled(&path).unwrap_err().to_string();
        assert!(err.contains(":2:"), "{}", err);
    }

    #[test]
    fn test_ragged_records_are_rejected() {
        let records = vec![
            LabeledRecord { features: vec![1.0, 2.0], label: 0 },
            LabeledRecord { features: vec![1.0], label: 1 },
        ];
        assert!(matches!(
            LabeledData::from_records(&records),
            Err(DetectorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_splits_reject_width_mismatch_and_attacks_in_safe() {
        let safe = LabeledData::new(array![[0.0, 0.0]], array![0]).unwrap();
        let narrow = LabeledData::new(array![[0.0]], array![1]).unwrap();
        assert!(TrafficSplits::new(safe.clone(), narrow, safe.clone()).is_err());

        let dirty = LabeledData::new(array![[0.0, 0.0]], array![2]).unwrap();
        assert!(matches!(
            TrafficSplits::new(dirty, safe.clone(), safe),
            Err(DetectorError::DataError(_))
        ));
    }

    #[test]
    fn test_synthetic_layout() {
        let mut rng = StdRng::seed_from_u64(0);
        let splits = TrafficSplits::synthetic(&SyntheticConfig::default(), &mut rng).unwrap();

        assert_eq!(splits.safe.n_samples(), 100);
        assert_eq!(splits.safe.nominal_count(), 100);
        assert_eq!(splits.train.n_samples(), 200);
        assert_eq!(splits.train.n_samples() - splits.train.nominal_count(), 40);
        assert_eq!(splits.test.n_features(), 41);
    }

    #[test]
    fn test_synthetic_is_seeded() {
        let config = SyntheticConfig::default();
        let a = TrafficSplits::synthetic(&config, &mut StdRng::seed_from_u64(5)).unwrap();
        let b = TrafficSplits::synthetic(&config, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn test_save_and_load_dir() {
        let dir = tempdir().unwrap();
        let config = SyntheticConfig {
            n_features: 3,
            n_safe: 4,
            n_train: 10,
            n_test: 5,
            ..SyntheticConfig::default()
        };
        let splits = TrafficSplits::synthetic(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        splits.save_dir(dir.path()).unwrap();

        let loaded = TrafficSplits::load_dir(dir.path()).unwrap();
        assert_eq!(loaded.train.y, splits.train.y);
        assert_eq!(loaded.n_features(), 3);
    }

    #[test]
    fn test_concat_rows() {
        let a = array![[1.0, 2.0]];
        let b = array![[3.0, 4.0], [5.0, 6.0]];
        let stacked = concat_rows(a.view(), b.view()).unwrap();
        assert_eq!(stacked, array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        assert!(concat_rows(a.view(), array![[1.0]].view()).is_err());
    }
}
