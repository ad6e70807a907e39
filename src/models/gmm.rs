use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;

use crate::error::{DetectorError, Result};
use crate::models::base_estimator::{check_components, check_width, BaseEstimator, EstimatorKind};
use crate::utils::linalg::{add_to_diagonal, cholesky, forward_substitute, log_det_from_cholesky, symmetrize};

const KMEANS_ITERATIONS: usize = 10;

/// One mixture component with its cached Cholesky factor.
#[derive(Debug, Clone)]
struct Component {
    weight: f64,
    mean: Array1<f64>,
    covariance: Array2<f64>,
    chol: Array2<f64>,
    log_det: f64,
}

impl Component {
    fn new(weight: f64, mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let chol = cholesky(&covariance)?;
        let log_det = log_det_from_cholesky(&chol);
        Ok(Component {
            weight,
            mean,
            covariance,
            chol,
            log_det,
        })
    }

    fn log_density(&self, x: ArrayView1<f64>) -> f64 {
        let d = self.mean.len() as f64;
        let diff = &x - &self.mean;
        let y = forward_substitute(&self.chol, diff.view());
        -0.5 * (d * (2.0 * std::f64::consts::PI).ln() + self.log_det + y.dot(&y))
    }
}

#[derive(Debug, Clone)]
struct GmmState {
    components: Vec<Component>,
    n_features: usize,
    converged: bool,
    n_iter: usize,
    lower_bound: f64,
}

impl GmmState {
    /// Weighted log densities, n_samples x n_components.
    fn weighted_log_prob(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((x.nrows(), self.components.len()));
        for (c, component) in self.components.iter().enumerate() {
            let log_weight = component.weight.ln();
            for (i, row) in x.outer_iter().enumerate() {
                out[[i, c]] = component.log_density(row) + log_weight;
            }
        }
        out
    }
}

fn log_sum_exp(row: ArrayView1<f64>) -> f64 {
    let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if !max.is_finite() {
        return max;
    }
    max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Per-row log-likelihood and normalised responsibilities.
fn e_step(state: &GmmState, x: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let mut log_prob = state.weighted_log_prob(x);
    let log_norm = Array1::from_iter(log_prob.outer_iter().map(log_sum_exp));
    for (mut row, norm) in log_prob.outer_iter_mut().zip(log_norm.iter()) {
        row.mapv_inplace(|v| (v - norm).exp());
    }
    (log_norm, log_prob)
}

/// Gaussian mixture with full covariance matrices, fitted by EM from a
/// k-means partition.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    n_components: usize,
    max_iter: usize,
    tol: f64,
    reg_covar: f64,
    state: Option<GmmState>,
}

impl GaussianMixture {
    pub fn new(n_components: usize) -> Self {
        GaussianMixture {
            n_components,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            state: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn state(&self) -> Result<&GmmState> {
        self.state.as_ref().ok_or(DetectorError::NotFitted)
    }

    pub fn converged(&self) -> Result<bool> {
        Ok(self.state()?.converged)
    }

    pub fn n_iter(&self) -> Result<usize> {
        Ok(self.state()?.n_iter)
    }

    /// Mean per-row log-likelihood reached on the training data.
    pub fn lower_bound(&self) -> Result<f64> {
        Ok(self.state()?.lower_bound)
    }

    pub fn weights(&self) -> Result<Array1<f64>> {
        Ok(Array1::from_iter(self.state()?.components.iter().map(|c| c.weight)))
    }

    pub fn means(&self) -> Result<Array2<f64>> {
        let state = self.state()?;
        let mut means = Array2::<f64>::zeros((state.components.len(), state.n_features));
        for (mut row, component) in means.outer_iter_mut().zip(state.components.iter()) {
            row.assign(&component.mean);
        }
        Ok(means)
    }

    /// Log-likelihood of each row under the mixture.
    pub fn score_samples(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let state = self.state()?;
        check_width(state.n_features, &x)?;
        let log_prob = state.weighted_log_prob(x);
        Ok(Array1::from_iter(log_prob.outer_iter().map(log_sum_exp)))
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        check_width(state.n_features, &x)?;
        Ok(e_step(state, x).1)
    }

    /// Hard k-means assignment used to seed the first M-step.
    fn initial_responsibilities(&self, x: ArrayView2<f64>, rng: &mut StdRng) -> Array2<f64> {
        let n = x.nrows();
        let k = self.n_components;
        let seeds = rand::seq::index::sample(rng, n, k).into_vec();
        let mut centers = x.select(Axis(0), &seeds);
        let mut assignment = vec![0usize; n];

        for _ in 0..KMEANS_ITERATIONS {
            let mut changed = false;
            for (i, row) in x.outer_iter().enumerate() {
                let nearest = centers
                    .outer_iter()
                    .enumerate()
                    .map(|(c, center)| {
                        let d: f64 = row.iter().zip(center.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                        (c, d)
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(c, _)| c)
                    .unwrap_or(0);
                if assignment[i] != nearest {
                    assignment[i] = nearest;
                    changed = true;
                }
            }

            for c in 0..k {
                let members: Vec<usize> = (0..n).filter(|&i| assignment[i] == c).collect();
                // empty clusters keep their previous centre
                if let Some(center) = x.select(Axis(0), &members).mean_axis(Axis(0)) {
                    centers.row_mut(c).assign(&center);
                }
            }
            if !changed {
                break;
            }
        }

        let mut resp = Array2::<f64>::zeros((n, k));
        for (i, &c) in assignment.iter().enumerate() {
            resp[[i, c]] = 1.0;
        }
        resp
    }

    fn m_step(&self, x: ArrayView2<f64>, resp: &Array2<f64>) -> Result<Vec<Component>> {
        let n = x.nrows() as f64;
        let nk = resp.sum_axis(Axis(0)) + 10.0 * f64::EPSILON;
        let means = resp.t().dot(&x) / &nk.view().insert_axis(Axis(1));

        let mut components = Vec::with_capacity(self.n_components);
        for c in 0..self.n_components {
            let mean = means.row(c).to_owned();
            let diff = x.to_owned() - &mean;
            let weighted = &diff * &resp.column(c).insert_axis(Axis(1));
            let mut covariance = weighted.t().dot(&diff) / nk[c];
            symmetrize(&mut covariance);
            add_to_diagonal(&mut covariance, self.reg_covar);
            components.push(Component::new(nk[c] / n, mean, covariance)?);
        }
        Ok(components)
    }
}

impl BaseEstimator for GaussianMixture {
    fn fit(&mut self, x: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        let (n, d) = x.dim();
        if n == 0 || d == 0 {
            return Err(DetectorError::EmptyInput("GMM needs a non-empty matrix".to_string()));
        }
        check_components(self.n_components, n, "GMM is bounded by rows")?;

        let mut resp = self.initial_responsibilities(x, rng);
        let mut lower_bound = f64::NEG_INFINITY;
        let mut state = None;
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 1..=self.max_iter {
            n_iter = iter;
            let current = GmmState {
                components: self.m_step(x, &resp)?,
                n_features: d,
                converged: false,
                n_iter,
                lower_bound,
            };
            let (log_norm, next_resp) = e_step(&current, x);
            let prev = lower_bound;
            lower_bound = log_norm.mean().unwrap_or(f64::NEG_INFINITY);
            resp = next_resp;
            state = Some(current);

            if (lower_bound - prev).abs() < self.tol {
                converged = true;
                break;
            }
        }

        let mut state = state.ok_or_else(|| DetectorError::invalid_parameter("max_iter", 0, "must be at least 1"))?;
        state.converged = converged;
        state.n_iter = n_iter;
        state.lower_bound = lower_bound;

        if converged {
            log::debug!("GMM converged after {} iterations", n_iter);
        } else {
            log::warn!(
                "GMM did not converge in {} iterations (lower bound {:.4})",
                self.max_iter,
                lower_bound
            );
        }
        log::info!(
            "GMM fitted: {} components over {} features, mean log-likelihood {:.4}",
            self.n_components,
            d,
            lower_bound
        );

        self.state = Some(state);
        Ok(())
    }

    /// Component responsibilities of each row.
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.predict_proba(x)
    }

    /// Total covariance of the mixture: within-component plus between-means spread.
    fn covariance(&self) -> Result<Array2<f64>> {
        let state = self.state()?;
        let overall = self.mean()?;
        let d = state.n_features;
        let mut cov = Array2::<f64>::zeros((d, d));
        for component in &state.components {
            let shift = (&component.mean - &overall).insert_axis(Axis(1));
            cov = cov + (&component.covariance + &shift.dot(&shift.t())) * component.weight;
        }
        symmetrize(&mut cov);
        Ok(cov)
    }

    fn mean(&self) -> Result<Array1<f64>> {
        let state = self.state()?;
        let mut mean = Array1::<f64>::zeros(state.n_features);
        for component in &state.components {
            mean.scaled_add(component.weight, &component.mean);
        }
        Ok(mean)
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn n_components(&self) -> usize {
        self.n_components
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Gmm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::dataset::standard_normal;
    use crate::utils::linalg::mean_and_covariance;
    use ndarray::array;
    use rand::SeedableRng;

    fn two_blobs(rng: &mut StdRng) -> Array2<f64> {
        let mut x = Array2::<f64>::zeros((200, 2));
        for (i, mut row) in x.outer_iter_mut().enumerate() {
            let center = if i < 100 { [-5.0, 0.0] } else { [5.0, 1.0] };
            row[0] = center[0] + 0.5 * standard_normal(rng);
            row[1] = center[1] + 0.5 * standard_normal(rng);
        }
        x
    }

    #[test]
    fn test_separates_two_blobs() {
        let mut rng = StdRng::seed_from_u64(4);
        let x = two_blobs(&mut rng);
        let mut gmm = GaussianMixture::new(2);
        gmm.fit(x.view(), &mut rng).unwrap();

        assert!(gmm.converged().unwrap());
        let weights = gmm.weights().unwrap();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.iter().all(|&w| (w - 0.5).abs() < 0.05));

        let mut centers: Vec<f64> = gmm.means().unwrap().column(0).to_vec();
        centers.sort_by(|a, b| a.total_cmp(b));
        assert!((centers[0] + 5.0).abs() < 0.3);
        assert!((centers[1] - 5.0).abs() < 0.3);

        let proba = gmm.predict_proba(array![[-5.0, 0.0], [5.0, 1.0]].view()).unwrap();
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            assert!(row.iter().any(|&p| p > 0.99));
        }
    }

    #[test]
    fn test_score_samples_prefers_dense_regions() {
        let mut rng = StdRng::seed_from_u64(9);
        let x = two_blobs(&mut rng);
        let mut gmm = GaussianMixture::new(2);
        gmm.fit(x.view(), &mut rng).unwrap();

        let ll = gmm.score_samples(array![[-5.0, 0.0], [0.0, 20.0]].view()).unwrap();
        assert!(ll[0] > ll[1] + 10.0);
    }

    #[test]
    fn test_single_component_matches_sample_moments() {
        let mut rng = StdRng::seed_from_u64(1);
        let x = two_blobs(&mut rng);
        let mut gmm = GaussianMixture::new(1);
        gmm.fit(x.view(), &mut rng).unwrap();

        let (mean, cov) = mean_and_covariance(x.view(), 0.0).unwrap();
        let fitted_mean = gmm.mean().unwrap();
        let fitted_cov = gmm.covariance().unwrap();
        for (a, b) in fitted_mean.iter().zip(mean.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        for (a, b) in fitted_cov.iter().zip(cov.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_fit_is_reproducible_for_a_seed() {
        let x = two_blobs(&mut StdRng::seed_from_u64(0));
        let mut a = GaussianMixture::new(3);
        let mut b = GaussianMixture::new(3);
        a.fit(x.view(), &mut StdRng::seed_from_u64(42)).unwrap();
        b.fit(x.view(), &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a.means().unwrap(), b.means().unwrap());
    }

    #[test]
    fn test_iteration_cap_is_honoured() {
        let mut rng = StdRng::seed_from_u64(5);
        let x = two_blobs(&mut rng);

        let mut capped = GaussianMixture::new(2).with_max_iter(1);
        capped.fit(x.view(), &mut rng).unwrap();
        assert!(!capped.converged().unwrap());

        let mut none = GaussianMixture::new(2).with_max_iter(0);
        assert!(matches!(
            none.fit(x.view(), &mut rng),
            Err(DetectorError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_rejects_more_components_than_rows() {
        let mut gmm = GaussianMixture::new(5);
        let x = array![[0.0], [1.0]];
        assert!(gmm.fit(x.view(), &mut StdRng::seed_from_u64(0)).is_err());
        assert!(matches!(gmm.score_samples(x.view()), Err(DetectorError::NotFitted)));
    }
}
