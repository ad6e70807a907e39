use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;

use crate::error::{DetectorError, Result};
use crate::models::base_estimator::{check_components, check_width, BaseEstimator, EstimatorKind};
use crate::utils::linalg::{add_to_diagonal, mean_and_covariance, symmetric_eigen};

#[derive(Debug, Clone)]
struct PcaState {
    mean: Array1<f64>,
    /// n_components x n_features, rows are unit principal axes
    components: Array2<f64>,
    explained_variance: Array1<f64>,
    /// Mean variance of the discarded axes
    noise_variance: f64,
}

/// Principal component analysis via eigendecomposition of the sample
/// covariance.
#[derive(Debug, Clone)]
pub struct Pca {
    n_components: usize,
    state: Option<PcaState>,
}

impl Pca {
    pub fn new(n_components: usize) -> Self {
        Pca {
            n_components,
            state: None,
        }
    }

    fn state(&self) -> Result<&PcaState> {
        self.state.as_ref().ok_or(DetectorError::NotFitted)
    }

    /// Part of each centred row orthogonal to the principal subspace.
    fn residual(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        let scores = self.transform(x)?;
        Ok((&x - &state.mean) - scores.dot(&state.components))
    }

    /// Squared distance from each row to its projection on the principal subspace.
    pub fn reconstruction_error(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        Ok(self.residual(x)?.mapv(|v| v * v).sum_axis(Axis(1)))
    }
}

impl BaseEstimator for Pca {
    fn fit(&mut self, x: ArrayView2<f64>, _rng: &mut StdRng) -> Result<()> {
        let (n, d) = x.dim();
        if n < 2 {
            return Err(DetectorError::EmptyInput(format!("PCA needs at least 2 rows, got {}", n)));
        }
        check_components(self.n_components, n.min(d), "PCA is bounded by rows and features")?;

        let (mean, cov) = mean_and_covariance(x, 1.0)?;
        let (values, vectors) = symmetric_eigen(&cov)?;
        let k = self.n_components;

        let components = vectors.slice(s![.., ..k]).t().to_owned();
        let explained_variance = values.slice(s![..k]).mapv(|v| v.max(0.0));
        let rank = n.min(d);
        let noise_variance = if k < rank {
            values.slice(s![k..rank]).mapv(|v| v.max(0.0)).mean().unwrap_or(0.0)
        } else {
            0.0
        };

        log::info!(
            "PCA fitted: {} components over {} features, retained variance {:.4}, noise variance {:.3e}",
            k,
            d,
            explained_variance.sum(),
            noise_variance
        );

        self.state = Some(PcaState {
            mean,
            components,
            explained_variance,
            noise_variance,
        });
        Ok(())
    }

    /// Principal component scores of the centred rows.
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let state = self.state()?;
        check_width(state.mean.len(), &x)?;
        Ok((&x - &state.mean).dot(&state.components.t()))
    }

    /// Whitened component scores next to the residual scaled by the noise
    /// variance. The modelled covariance has eigenvalue `var_i` along each
    /// axis and `noise` elsewhere, so no factorisation is needed.
    fn whiten(&self, x: ArrayView2<f64>, reg: f64) -> Result<Array2<f64>> {
        let state = self.state()?;
        let scale = state.explained_variance.mapv(|v| (v + reg).sqrt());
        let scores = self.transform(x)? / &scale;
        let residual = self.residual(x)? / (state.noise_variance + reg).sqrt();
        concatenate(Axis(1), &[scores.view(), residual.view()]).map_err(|e| DetectorError::ShapeMismatch {
            expected: format!("{} rows", x.nrows()),
            actual: e.to_string(),
        })
    }

    /// `W^T diag(var - noise) W + noise * I`, the probabilistic PCA covariance.
    fn covariance(&self) -> Result<Array2<f64>> {
        let state = self.state()?;
        let excess = state
            .explained_variance
            .mapv(|v| (v - state.noise_variance).max(0.0));
        let scaled = &state.components.t() * &excess;
        let mut cov = scaled.dot(&state.components);
        add_to_diagonal(&mut cov, state.noise_variance);
        Ok(cov)
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
        EstimatorKind::Pca
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::base_estimator::cholesky_whiten;
    use ndarray::array;
    use rand::SeedableRng;

    fn line_data() -> Array2<f64> {
        // points on y = 2x with a small orthogonal wobble
        Array2::from_shape_fn((20, 2), |(i, j)| {
            let t = i as f64 - 10.0;
            let wobble = if i % 2 == 0 { 0.05 } else { -0.05 };
            if j == 0 {
                t - 2.0 * wobble
            } else {
                2.0 * t + wobble
            }
        })
    }

    #[test]
    fn test_first_axis_follows_the_line() {
        let mut pca = Pca::new(1);
        pca.fit(line_data().view(), &mut StdRng::seed_from_u64(0)).unwrap();

        let axis = pca.state().unwrap().components.row(0).to_owned();
        let expected = array![1.0, 2.0] / 5.0_f64.sqrt();
        assert!((axis.dot(&expected).abs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_whitened_component_scores_have_unit_variance() {
        let mut pca = Pca::new(2);
        let x = line_data();
        pca.fit(x.view(), &mut StdRng::seed_from_u64(0)).unwrap();

        let z = pca.whiten(x.view(), 0.0).unwrap();
        for col in z.slice(s![.., ..2]).columns() {
            let var = col.mapv(|v| v * v).sum() / (col.len() as f64 - 1.0);
            assert!((var - 1.0).abs() < 1e-6, "variance {}", var);
        }
    }

    #[test]
    fn test_whiten_matches_cholesky_of_modelled_covariance() {
        let x = Array2::from_shape_fn((30, 4), |(i, j)| {
            let t = (i as f64 * 0.37).sin() * 3.0;
            let u = (i as f64 * 1.3).cos();
            match j {
                0 => t + 0.1 * u,
                1 => 2.0 * t - 0.2 * u,
                2 => u,
                _ => 0.05 * ((i * 7 % 5) as f64 - 2.0),
            }
        });
        let mut pca = Pca::new(2);
        pca.fit(x.view(), &mut StdRng::seed_from_u64(0)).unwrap();

        let queries = array![[1.0, 2.0, 0.0, 0.0], [0.0, 0.0, 5.0, -3.0], [-4.0, 1.0, 0.5, 0.2]];
        let reg = 1e-6;
        let direct = pca.whiten(queries.view(), reg).unwrap();
        let reference = cholesky_whiten(
            pca.mean().unwrap().view(),
            pca.covariance().unwrap(),
            reg,
            queries.view(),
        )
        .unwrap();

        for (a, b) in direct.outer_iter().zip(reference.outer_iter()) {
            let da = a.dot(&a).sqrt();
            let db = b.dot(&b).sqrt();
            assert!((da - db).abs() < 1e-6 * db.max(1.0), "{} vs {}", da, db);
        }
    }

    #[test]
    fn test_full_rank_covariance_matches_sample_covariance() {
        let mut pca = Pca::new(2);
        let x = line_data();
        pca.fit(x.view(), &mut StdRng::seed_from_u64(0)).unwrap();

        let (_, sample) = mean_and_covariance(x.view(), 1.0).unwrap();
        let modelled = pca.covariance().unwrap();
        for (a, b) in modelled.iter().zip(sample.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn test_reconstruction_error_small_on_line_large_off_line() {
        let mut pca = Pca::new(1);
        pca.fit(line_data().view(), &mut StdRng::seed_from_u64(0)).unwrap();

        let errors = pca.reconstruction_error(array![[1.0, 2.0], [2.0, -1.0]].view()).unwrap();
        assert!(errors[0] < 0.01);
        assert!(errors[1] > 1.0);
    }

    #[test]
    fn test_invalid_components_and_unfitted() {
        let mut pca = Pca::new(3);
        assert!(pca.transform(line_data().view()).is_err());
        assert!(matches!(
            pca.fit(line_data().view(), &mut StdRng::seed_from_u64(0)),
            Err(DetectorError::InvalidParameter { .. })
        ));
    }
}
