use ndarray::Array1;
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::models::base_estimator::{BaseEstimator, EstimatorKind};
use crate::models::cov_detector::CovDetectorImpl;
use crate::models::dual_cov_detector::DualCovDetectorImpl;
use crate::models::intrusion_detector::{IntrusionConfig, IntrusionDetectorImpl};
use crate::utils::evaluation;
use crate::utils::neighbors::WeightScheme;

fn seeded(random_state: Option<u64>) -> StdRng {
    StdRng::seed_from_u64(random_state.unwrap_or_else(rand::random::<u64>))
}

fn build_estimator(name: &str, n_components: usize) -> PyResult<Box<dyn BaseEstimator>> {
    let kind: EstimatorKind = name.parse().map_err(|e| PyValueError::new_err(format!("{}", e)))?;
    Ok(kind.build(n_components))
}

fn parse_weights(weights: &str) -> PyResult<WeightScheme> {
    Ok(weights.parse::<WeightScheme>()?)
}

/// Negative class labels are rejected rather than wrapped.
fn to_labels(y: PyReadonlyArray1<i64>) -> PyResult<Array1<usize>> {
    y.as_array()
        .iter()
        .map(|&label| {
            usize::try_from(label).map_err(|_| PyValueError::new_err(format!("invalid class label: {}", label)))
        })
        .collect::<PyResult<Vec<usize>>>()
        .map(Array1::from)
}

fn to_py_labels(py: Python<'_>, labels: Array1<usize>) -> &PyArray1<i64> {
    labels.mapv(|l| l as i64).into_pyarray(py)
}

#[pyclass]
pub struct CovDetector {
    inner: CovDetectorImpl,
    rng: StdRng,
}

#[pymethods]
impl CovDetector {
    #[new]
    #[pyo3(signature = (estimator, n_components, n_neighbors=10, weights="uniform", random_state=None))]
    fn new(
        estimator: &str,
        n_components: usize,
        n_neighbors: usize,
        weights: &str,
        random_state: Option<u64>,
    ) -> PyResult<Self> {
        let inner = CovDetectorImpl::new(build_estimator(estimator, n_components)?, n_neighbors, parse_weights(weights)?)?;
        Ok(CovDetector {
            inner,
            rng: seeded(random_state),
        })
    }

    fn fit_cov(&mut self, x_safe: PyReadonlyArray2<f64>) -> PyResult<()> {
        Ok(self.inner.fit_cov(x_safe.as_array(), &mut self.rng)?)
    }

    fn fit(&mut self, x: PyReadonlyArray2<f64>, y: PyReadonlyArray1<i64>) -> PyResult<()> {
        let labels = to_labels(y)?;
        Ok(self.inner.fit(x.as_array(), labels.view())?)
    }

    fn predict<'py>(&self, py: Python<'py>, x: PyReadonlyArray2<f64>) -> PyResult<&'py PyArray1<i64>> {
        let predicted = self.inner.predict(x.as_array())?;
        Ok(to_py_labels(py, predicted))
    }

    fn attack_scores<'py>(&self, py: Python<'py>, x: PyReadonlyArray2<f64>) -> PyResult<&'py PyArray1<f64>> {
        Ok(self.inner.attack_scores(x.as_array())?.into_pyarray(py))
    }

    fn score(&self, x: PyReadonlyArray2<f64>, y: PyReadonlyArray1<i64>) -> PyResult<f64> {
        let labels = to_labels(y)?;
        Ok(self.inner.score(x.as_array(), labels.view())?)
    }

    fn false_positives(&self, x: PyReadonlyArray2<f64>, y: PyReadonlyArray1<i64>) -> PyResult<usize> {
        let labels = to_labels(y)?;
        Ok(self.inner.false_positives(x.as_array(), labels.view())?)
    }

    /// Rows in the fitted estimator's own representation.
    fn transform<'py>(&self, py: Python<'py>, x: PyReadonlyArray2<f64>) -> PyResult<&'py PyArray2<f64>> {
        Ok(self.inner.estimator().transform(x.as_array())?.into_pyarray(py))
    }

    #[getter]
    fn threshold(&self) -> Option<f64> {
        self.inner.threshold()
    }
}

#[pyclass]
pub struct DualCovDetector {
    inner: DualCovDetectorImpl,
    rng: StdRng,
}

#[pymethods]
impl DualCovDetector {
    #[new]
    #[pyo3(signature = (first, first_components, second, second_components, n_neighbors=10, weights="uniform", random_state=None))]
    fn new(
        first: &str,
        first_components: usize,
        second: &str,
        second_components: usize,
        n_neighbors: usize,
        weights: &str,
        random_state: Option<u64>,
    ) -> PyResult<Self> {
        let inner = DualCovDetectorImpl::new(
            build_estimator(first, first_components)?,
            build_estimator(second, second_components)?,
            n_neighbors,
            parse_weights(weights)?,
        )?;
        Ok(DualCovDetector {
            inner,
            rng: seeded(random_state),
        })
    }

    fn fit_cov(&mut self, x_safe: PyReadonlyArray2<f64>, x_train: PyReadonlyArray2<f64>) -> PyResult<()> {
        Ok(self.inner.fit_cov(x_safe.as_array(), x_train.as_array(), &mut self.rng)?)
    }

    fn fit(&mut self, x: PyReadonlyArray2<f64>, y: PyReadonlyArray1<i64>) -> PyResult<()> {
        let labels = to_labels(y)?;
        Ok(self.inner.fit(x.as_array(), labels.view())?)
    }

    fn predict<'py>(&self, py: Python<'py>, x: PyReadonlyArray2<f64>) -> PyResult<&'py PyArray1<i64>> {
        let predicted = self.inner.predict(x.as_array())?;
        Ok(to_py_labels(py, predicted))
    }

    fn score(&self, x: PyReadonlyArray2<f64>, y: PyReadonlyArray1<i64>) -> PyResult<f64> {
        let labels = to_labels(y)?;
        Ok(self.inner.score(x.as_array(), labels.view())?)
    }

    fn false_positives(&self, x: PyReadonlyArray2<f64>, y: PyReadonlyArray1<i64>) -> PyResult<usize> {
        let labels = to_labels(y)?;
        Ok(self.inner.false_positives(x.as_array(), labels.view())?)
    }
}

#[pyclass]
pub struct IntrusionDetector {
    inner: IntrusionDetectorImpl,
    rng: StdRng,
}

#[pymethods]
impl IntrusionDetector {
    #[new]
    #[pyo3(signature = (gmm_components=36, pca_components=28, n_neighbors=10, random_state=None))]
    fn new(
        gmm_components: usize,
        pca_components: usize,
        n_neighbors: usize,
        random_state: Option<u64>,
    ) -> PyResult<Self> {
        let config = IntrusionConfig {
            gmm_components,
            pca_components,
            neighbors: n_neighbors,
            weights: WeightScheme::Uniform,
        };
        Ok(IntrusionDetector {
            inner: IntrusionDetectorImpl::new(config)?,
            rng: seeded(random_state),
        })
    }

    fn fit_safe(&mut self, x_safe: PyReadonlyArray2<f64>) -> PyResult<()> {
        Ok(self.inner.fit_safe(x_safe.as_array(), &mut self.rng)?)
    }

    fn fit(&mut self, x: PyReadonlyArray2<f64>, y: PyReadonlyArray1<i64>) -> PyResult<()> {
        let labels = to_labels(y)?;
        Ok(self.inner.fit(x.as_array(), labels.view())?)
    }

    fn predict_attack_probability<'py>(
        &self,
        py: Python<'py>,
        x: PyReadonlyArray2<f64>,
    ) -> PyResult<&'py PyArray1<f64>> {
        Ok(self.inner.predict_attack_probability(x.as_array())?.into_pyarray(py))
    }
}

/// MCC of binarized labels, for scoring predictions made in Python.
#[pyfunction]
pub fn matthews_corrcoef(y_true: PyReadonlyArray1<i64>, y_pred: PyReadonlyArray1<i64>) -> PyResult<f64> {
    let y_true = to_labels(y_true)?;
    let y_pred = to_labels(y_pred)?;
    if y_true.len() != y_pred.len() {
        return Err(PyValueError::new_err("y_true and y_pred differ in length"));
    }
    Ok(evaluation::matthews_corrcoef(
        evaluation::binarize(y_true.view()).view(),
        evaluation::binarize(y_pred.view()).view(),
    ))
}
