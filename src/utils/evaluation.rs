use ndarray::{Array1, ArrayView1};

/// Class id of nominal traffic. Every other class is an attack type.
pub const NORMAL_CLASS: usize = 0;

/// Maps class ids onto {0 = nominal, 1 = attack}.
pub fn binarize(y: ArrayView1<usize>) -> Array1<usize> {
    y.mapv(|label| usize::from(label != NORMAL_CLASS))
}

/// Binary confusion counts, attack (1) being the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_count: usize,
}

impl ConfusionCounts {
    pub fn from_predictions(y_true: ArrayView1<usize>, y_pred: ArrayView1<usize>) -> Self {
        let mut counts = ConfusionCounts::default();
        for (&label, &predicted) in y_true.iter().zip(y_pred.iter()) {
            match (label != NORMAL_CLASS, predicted != NORMAL_CLASS) {
                (true, true) => counts.tp += 1,
                (false, false) => counts.tn += 1,
                (false, true) => counts.fp += 1,
                (true, false) => counts.fn_count += 1,
            }
        }
        counts
    }

    /// Matthews correlation coefficient, 0.0 when any marginal is empty.
    pub fn mcc(&self) -> f64 {
        let tp = self.tp as f64;
        let tn = self.tn as f64;
        let fp = self.fp as f64;
        let fn_count = self.fn_count as f64;

        let denominator = ((tp + fp) * (tp + fn_count) * (tn + fp) * (tn + fn_count)).sqrt();
        if denominator == 0.0 {
            return 0.0;
        }
        ((tp * tn - fp * fn_count) / denominator).clamp(-1.0, 1.0)
    }
}

pub fn matthews_corrcoef(y_true: ArrayView1<usize>, y_pred: ArrayView1<usize>) -> f64 {
    ConfusionCounts::from_predictions(y_true, y_pred).mcc()
}

/// Nominal rows predicted as attack.
pub fn false_positives(y_true: ArrayView1<usize>, y_pred: ArrayView1<usize>) -> usize {
    ConfusionCounts::from_predictions(y_true, y_pred).fp
}

/// Threshold on `scores` (flag when `score > threshold`) that maximises MCC.
///
/// Starts from `default_threshold` and only moves to a midpoint between two
/// consecutive distinct scores when it is strictly better.
pub fn best_mcc_threshold(scores: ArrayView1<f64>, y_true: ArrayView1<usize>, default_threshold: f64) -> (f64, f64) {
    let evaluate = |threshold: f64| {
        let predicted = scores.mapv(|s| usize::from(s > threshold));
        matthews_corrcoef(y_true, predicted.view())
    };

    let mut best = (default_threshold, evaluate(default_threshold));

    let mut distinct: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    distinct.sort_by(|a, b| a.total_cmp(b));
    distinct.dedup();

    for pair in distinct.windows(2) {
        let candidate = 0.5 * (pair[0] + pair[1]);
        let mcc = evaluate(candidate);
        if mcc > best.1 {
            best = (candidate, mcc);
        }
    }
    best
}
