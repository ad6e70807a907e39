use ndarray::{s, Array1, Array2, ArrayView2};
use rand::rngs::StdRng;

use crate::error::{DetectorError, Result};
use crate::models::base_estimator::{check_components, check_width, BaseEstimator, EstimatorKind};
use crate::utils::linalg::{
    add_to_diagonal, cholesky, inverse_from_cholesky, inverse_spd, log_det_from_cholesky, mean_and_covariance,
    symmetric_eigen,
};

const MIN_NOISE_VARIANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
struct FaState {
    mean: Array1<f64>,
    /// n_features x n_components
    loadings: Array2<f64>,
    noise_variance: Array1<f64>,
    log_likelihood: f64,
    n_iter: usize,
}

impl FaState {
    fn covariance(&self) -> Array2<f64> {
        let mut cov = self.loadings.dot(&self.loadings.t());
        for (i, psi) in self.noise_variance.iter().enumerate() {
            cov[[i, i]] += psi;
        }
        cov
    }
}

/// Linear Gaussian latent factor model `x = W z + mu + e`, `e ~ N(0, diag(psi))`,
/// fitted by expectation maximisation from a PCA starting point.
#[derive(Debug, Clone)]
pub struct FactorAnalysis {
    n_components: usize,
    max_iter: usize,
    tol: f64,
    state: Option<FaState>,
}

impl FactorAnalysis {
    pub fn new(n_components: usize) -> Self {
        FactorAnalysis {
            n_components,
            max_iter: 1000,
            tol: 1e-2,
            state: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn state(&self) -> Result<&FaState> {
        self.state.as_ref().ok_or(DetectorError::NotFitted)
    }

    pub fn loadings(&self) -> Result<&Array2<f64>> {
        Ok(&self.state()?.loadings)
    }

    pub fn noise_variance(&self) -> Result<&Array1<f64>> {
        Ok(&self.state()?.noise_variance)
    }

    pub fn log_likelihood(&self) -> Result<f64> {
        Ok(self.state()?.log_likelihood)
    }

    pub fn n_iter(&self) -> Result<usize> {
        Ok(self.state()?.n_iter)
    }
}

impl BaseEstimator for FactorAnalysis {
    fn fit(&mut self, x: ArrayView2<f64>, _rng: &mut StdRng) -> Result<()> {
        let (n, d) = x.dim();
        if n < 2 {
            return Err(DetectorError::EmptyInput(format!(
                "factor analysis needs at least 2 rows, got {}",
                n
            )));
        }
        check_components(self.n_components, d, "factor analysis is bounded by features")?;
        let k = self.n_components;

        let (mean, sample_cov) = mean_and_covariance(x, 0.0)?;

        let (values, vectors) = symmetric_eigen(&sample_cov)?;
        let mut loadings = vectors.slice(s![.., ..k]).to_owned();
        for (mut col, value) in loadings.columns_mut().into_iter().zip(values.iter()) {
            col *= value.max(0.0).sqrt();
        }
        let mut psi = Array1::from_iter((0..d).map(|i| {
            let explained: f64 = loadings.row(i).iter().map(|w| w * w).sum();
            (sample_cov[[i, i]] - explained).max(MIN_NOISE_VARIANCE)
        }));

        let log_2pi = (2.0 * std::f64::consts::PI).ln();
        let mut prev_ll = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut n_iter = 0;
        let mut converged = false;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            let mut sigma = loadings.dot(&loadings.t());
            for i in 0..d {
                sigma[[i, i]] += psi[i];
            }
            let chol = cholesky(&sigma)?;
            let sigma_inv = inverse_from_cholesky(&chol);

            let trace: f64 = (&sigma_inv * &sample_cov).sum();
            log_likelihood = -0.5 * n as f64 * (d as f64 * log_2pi + log_det_from_cholesky(&chol) + trace);
            if (log_likelihood - prev_ll).abs() < self.tol {
                converged = true;
                break;
            }
            prev_ll = log_likelihood;

            // E-step: posterior projection and second moment of the factors
            let beta = loadings.t().dot(&sigma_inv);
            let s_beta_t = sample_cov.dot(&beta.t());
            let mut moment = beta.dot(&s_beta_t) - beta.dot(&loadings);
            add_to_diagonal(&mut moment, 1.0);

            // M-step
            let new_loadings = s_beta_t.dot(&inverse_spd(&moment)?);
            psi = Array1::from_iter((0..d).map(|i| {
                let explained: f64 = new_loadings.row(i).dot(&s_beta_t.row(i));
                (sample_cov[[i, i]] - explained).max(MIN_NOISE_VARIANCE)
            }));
            loadings = new_loadings;
        }

        if converged {
            log::debug!("factor analysis converged after {} iterations", n_iter);
        } else {
            log::warn!(
                "factor analysis did not converge in {} iterations (log-likelihood {:.4})",
                self.max_iter,
                log_likelihood
            );
        }
        log::info!(
            "FA fitted: {} factors over {} features, log-likelihood {:.4}",
            k,
            d,
            log_likelihood
        );

        self.state = Some(FaState {
            mean,
            loadings,
            noise_variance: psi,
            log_likelihood,
            n_iter,
        });
        Ok(())
    }

    /// Posterior mean of the latent factors for each row.
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        check_width(state.mean.len(), &x)?;
        let sigma_inv = inverse_spd(&state.covariance())?;
        let beta = state.loadings.t().dot(&sigma_inv);
        Ok((x.to_owned() - &state.mean).dot(&beta.t()))
    }

    fn covariance(&self) -> Result<Array2<f64>> {
        Ok(self.state()?.covariance())
    }

    fn mean(&self) -> Result<Array1<f64>> {
        Ok(self.state()?.mean.clone())
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn n_components(&self) -> usize {
        self.n_components
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Fa
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::dataset::standard_normal;
    use rand::SeedableRng;

    /// 400 rows of x = w * z + noise with a single factor.
    fn one_factor_data(rng: &mut StdRng) -> (Array2<f64>, Array1<f64>, Array1<f64>) {
        let w = Array1::from_vec(vec![2.0, -1.0, 0.5, 1.5]);
        let noise_sd = Array1::from_vec(vec![0.3, 0.2, 0.4, 0.1]);
        let mut x = Array2::<f64>::zeros((400, 4));
        for mut row in x.outer_iter_mut() {
            let z = standard_normal(rng);
            for j in 0..4 {
                row[j] = w[j] * z + noise_sd[j] * standard_normal(rng);
            }
        }
        (x, w, noise_sd.mapv(|v| v * v))
    }

    #[test]
    fn test_recovers_single_factor() {
        let mut rng = StdRng::seed_from_u64(11);
        let (x, w, psi) = one_factor_data(&mut rng);
        let mut fa = FactorAnalysis::new(1);
        fa.fit(x.view(), &mut rng).unwrap();

        let loadings = fa.loadings().unwrap().column(0).to_owned();
        let cosine = loadings.dot(&w) / (loadings.dot(&loadings).sqrt() * w.dot(&w).sqrt());
        assert!(cosine.abs() > 0.99, "cosine {}", cosine);

        let fitted_psi = fa.noise_variance().unwrap();
        for (a, b) in fitted_psi.iter().zip(psi.iter()) {
            assert!((a - b).abs() < 0.1, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_likelihood_improves_over_pca_start() {
        let mut rng = StdRng::seed_from_u64(2);
        let (x, _, _) = one_factor_data(&mut rng);

        let mut start = FactorAnalysis::new(1).with_max_iter(1);
        start.fit(x.view(), &mut rng).unwrap();
        let mut full = FactorAnalysis::new(1);
        full.fit(x.view(), &mut rng).unwrap();

        assert!(full.log_likelihood().unwrap() >= start.log_likelihood().unwrap());
        assert!(full.n_iter().unwrap() >= 1);
    }

    #[test]
    fn test_transform_and_covariance_shapes() {
        let mut rng = StdRng::seed_from_u64(3);
        let (x, _, _) = one_factor_data(&mut rng);
        let mut fa = FactorAnalysis::new(2);
        fa.fit(x.view(), &mut rng).unwrap();

        assert_eq!(fa.transform(x.view()).unwrap().dim(), (400, 2));
        let cov = fa.covariance().unwrap();
        assert_eq!(cov.dim(), (4, 4));
        assert!(cholesky(&cov).is_ok());
    }

    #[test]
    fn test_rejects_too_many_factors() {
        let mut rng = StdRng::seed_from_u64(0);
        let (x, _, _) = one_factor_data(&mut rng);
        let mut fa = FactorAnalysis::new(5);
        assert!(fa.fit(x.view(), &mut rng).is_err());
    }
}
