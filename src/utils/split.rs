use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{DetectorError, Result};

/// Output of [`train_valid_split`].
#[derive(Debug, Clone)]
pub struct TrainValidSplit {
    pub x_train: Array2<f64>,
    pub y_train: Array1<usize>,
    pub x_valid: Array2<f64>,
    pub y_valid: Array1<usize>,
}

/// Stratified two-fold split.
///
/// Each class sends half of its rows to each side; an odd row goes to the
/// side that is currently smaller. Rows keep their original order within a
/// side. Every class needs at least two members.
pub fn train_valid_split(
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    shuffle: bool,
    rng: &mut StdRng,
) -> Result<TrainValidSplit> {
    if x.nrows() != y.len() {
        return Err(DetectorError::LengthMismatch {
            features: x.nrows(),
            labels: y.len(),
        });
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in y.iter().enumerate() {
        by_class.entry(label).or_default().push(idx);
    }

    if let Some((&class, members)) = by_class.iter().find(|(_, members)| members.len() < 2) {
        return Err(DetectorError::InsufficientClassMembers {
            class,
            count: members.len(),
        });
    }

    let mut train_idx = Vec::with_capacity(y.len() / 2 + by_class.len());
    let mut valid_idx = Vec::with_capacity(y.len() / 2 + by_class.len());

    for members in by_class.values_mut() {
        if shuffle {
            members.shuffle(rng);
        }
        let half = members.len() / 2;
        let odd = members.len() % 2 == 1;
        let train_take = if odd && train_idx.len() <= valid_idx.len() {
            half + 1
        } else {
            half
        };
        train_idx.extend_from_slice(&members[..train_take]);
        valid_idx.extend_from_slice(&members[train_take..]);
    }

    train_idx.sort_unstable();
    valid_idx.sort_unstable();

    log::debug!(
        "stratified split: {} train rows, {} valid rows over {} classes",
        train_idx.len(),
        valid_idx.len(),
        by_class.len()
    );

    Ok(TrainValidSplit {
        x_train: x.select(Axis(0), &train_idx),
        y_train: y.select(Axis(0), &train_idx),
        x_valid: x.select(Axis(0), &valid_idx),
        y_valid: y.select(Axis(0), &valid_idx),
    })
}
