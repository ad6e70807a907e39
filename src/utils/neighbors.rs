//! Exact k-nearest-neighbour search over nominal or labelled reference sets.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{DetectorError, Result};

/// How neighbours are weighted when their distances or labels are pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightScheme {
    /// All neighbours count equally
    #[default]
    Uniform,
    /// Neighbours count by inverse distance
    Distance,
}

impl FromStr for WeightScheme {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" => Ok(WeightScheme::Uniform),
            "distance" => Ok(WeightScheme::Distance),
            other => Err(DetectorError::invalid_parameter(
                "weights",
                other,
                "expected 'uniform' or 'distance'",
            )),
        }
    }
}

impl fmt::Display for WeightScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightScheme::Uniform => write!(f, "uniform"),
            WeightScheme::Distance => write!(f, "distance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// Max-heap entry keyed on (distance, index) so ties resolve by row order.
#[derive(Debug, Clone, Copy)]
struct HeapEntry(f64, usize);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

fn squared_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// The `k` rows of `reference` closest to `query`, nearest first.
pub fn k_nearest(reference: ArrayView2<f64>, query: ArrayView1<f64>, k: usize) -> Vec<Neighbor> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k + 1);

    for (idx, row) in reference.outer_iter().enumerate() {
        let entry = HeapEntry(squared_euclidean(row, query), idx);
        if heap.len() < k {
            heap.push(entry);
        } else if let Some(worst) = heap.peek() {
            if entry < *worst {
                heap.pop();
                heap.push(entry);
            }
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|HeapEntry(d2, index)| Neighbor {
            index,
            distance: d2.sqrt(),
        })
        .collect()
}

/// Weighted mean distance of `neighbors`. Under inverse-distance weights
/// this is the harmonic mean, and an exact match scores 0.
pub fn weighted_distance(neighbors: &[Neighbor], weights: WeightScheme) -> f64 {
    if neighbors.is_empty() {
        return 0.0;
    }
    match weights {
        WeightScheme::Uniform => neighbors.iter().map(|n| n.distance).sum::<f64>() / neighbors.len() as f64,
        WeightScheme::Distance => {
            if neighbors.iter().any(|n| n.distance <= f64::EPSILON) {
                return 0.0;
            }
            neighbors.len() as f64 / neighbors.iter().map(|n| 1.0 / n.distance).sum::<f64>()
        }
    }
}

/// Weighted share of attack labels (1) among `neighbors`.
pub fn weighted_vote(neighbors: &[Neighbor], labels: ArrayView1<usize>, weights: WeightScheme) -> f64 {
    if neighbors.is_empty() {
        return 0.0;
    }
    let attack = |n: &Neighbor| if labels[n.index] != 0 { 1.0 } else { 0.0 };

    match weights {
        WeightScheme::Uniform => neighbors.iter().map(attack).sum::<f64>() / neighbors.len() as f64,
        WeightScheme::Distance => {
            // exact matches take all of the weight
            let exact: Vec<&Neighbor> = neighbors.iter().filter(|n| n.distance <= f64::EPSILON).collect();
            if !exact.is_empty() {
                return exact.iter().map(|&n| attack(n)).sum::<f64>() / exact.len() as f64;
            }
            let total: f64 = neighbors.iter().map(|n| 1.0 / n.distance).sum();
            neighbors.iter().map(|n| attack(n) / n.distance).sum::<f64>() / total
        }
    }
}

/// Labelled reference points answering "how attack-like is my neighbourhood".
#[derive(Debug, Clone)]
pub struct LabeledNeighbors {
    points: Array2<f64>,
    labels: Array1<usize>,
    k: usize,
    weights: WeightScheme,
}

impl LabeledNeighbors {
    /// `labels` must already be binary (0 nominal, 1 attack).
    pub fn new(points: Array2<f64>, labels: Array1<usize>, k: usize, weights: WeightScheme) -> Result<Self> {
        if points.nrows() != labels.len() {
            return Err(DetectorError::LengthMismatch {
                features: points.nrows(),
                labels: labels.len(),
            });
        }
        if points.nrows() == 0 {
            return Err(DetectorError::EmptyInput("neighbour reference set".to_string()));
        }
        if k == 0 {
            return Err(DetectorError::invalid_parameter("neighbors", k, "must be at least 1"));
        }
        Ok(LabeledNeighbors {
            points,
            labels,
            k,
            weights,
        })
    }

    pub fn attack_fraction(&self, query: ArrayView1<f64>) -> f64 {
        let neighbors = k_nearest(self.points.view(), query, self.k);
        weighted_vote(&neighbors, self.labels.view(), self.weights)
    }

    pub fn attack_fractions(&self, queries: ArrayView2<f64>) -> Array1<f64> {
        Array1::from_iter(queries.outer_iter().map(|q| self.attack_fraction(q)))
    }
}

/// Unlabelled reference rows answering "how far am I from normal traffic".
#[derive(Debug, Clone)]
pub struct NominalNeighbors {
    points: Array2<f64>,
    k: usize,
    weights: WeightScheme,
}

impl NominalNeighbors {
    pub fn new(points: Array2<f64>, k: usize, weights: WeightScheme) -> Result<Self> {
        if points.nrows() == 0 {
            return Err(DetectorError::EmptyInput("nominal reference set".to_string()));
        }
        if k == 0 {
            return Err(DetectorError::invalid_parameter("neighbors", k, "must be at least 1"));
        }
        Ok(NominalNeighbors { points, k, weights })
    }

    pub fn distance_score(&self, query: ArrayView1<f64>) -> f64 {
        let neighbors = k_nearest(self.points.view(), query, self.k);
        weighted_distance(&neighbors, self.weights)
    }

    pub fn distance_scores(&self, queries: ArrayView2<f64>) -> Array1<f64> {
        Array1::from_iter(queries.outer_iter().map(|q| self.distance_score(q)))
    }
}
