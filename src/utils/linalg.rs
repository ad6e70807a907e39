//! Dense linear algebra used by the estimators.
//!
//! Matrices here are small (features x features), so plain loops over
//! `ndarray` storage are fast enough and keep the crate free of LAPACK.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{DetectorError, Result};

const JACOBI_MAX_SWEEPS: usize = 100;
const JACOBI_TOL: f64 = 1e-12;

fn ensure_square(a: &Array2<f64>) -> Result<usize> {
    if a.nrows() != a.ncols() {
        return Err(DetectorError::ShapeMismatch {
            expected: "square matrix".to_string(),
            actual: format!("{}x{}", a.nrows(), a.ncols()),
        });
    }
    Ok(a.nrows())
}

/// Eigendecomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns the eigenvalues in descending order and the matching unit
/// eigenvectors as the columns of the second matrix.
pub fn symmetric_eigen(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = ensure_square(a)?;
    let mut m = a.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt().max(1.0);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += m[[p, q]] * m[[p, q]];
            }
        }
        if off.sqrt() <= JACOBI_TOL * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| m[[j, j]].total_cmp(&m[[i, i]]));

    let values = Array1::from_iter(order.iter().map(|&i| m[[i, i]]));
    let mut vectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        vectors.column_mut(dst).assign(&v.column(src));
    }
    Ok((values, vectors))
}

/// Lower-triangular Cholesky factor `L` with `L * L^T = a`.
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = ensure_square(a)?;
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return Err(DetectorError::NotPositiveDefinite);
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// Solves `L * y = b` for lower-triangular `L`.
pub fn forward_substitute(l: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    y
}

/// Solves `L^T * x = y` for lower-triangular `L`.
pub fn backward_substitute_transposed(l: &Array2<f64>, y: ArrayView1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

pub fn lower_triangular_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[j] = 1.0;
        inv.column_mut(j).assign(&forward_substitute(l, e.view()));
    }
    inv
}

/// Inverse of `L * L^T` given its Cholesky factor.
pub fn inverse_from_cholesky(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[j] = 1.0;
        let y = forward_substitute(l, e.view());
        inv.column_mut(j).assign(&backward_substitute_transposed(l, y.view()));
    }
    symmetrize(&mut inv);
    inv
}

pub fn inverse_spd(a: &Array2<f64>) -> Result<Array2<f64>> {
    let l = cholesky(a)?;
    Ok(inverse_from_cholesky(&l))
}

pub fn log_det_from_cholesky(l: &Array2<f64>) -> f64 {
    2.0 * l.diag().iter().map(|v| v.ln()).sum::<f64>()
}

pub fn symmetrize(a: &mut Array2<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (a[[i, j]] + a[[j, i]]);
            a[[i, j]] = avg;
            a[[j, i]] = avg;
        }
    }
}

pub fn add_to_diagonal(a: &mut Array2<f64>, value: f64) {
    for v in a.diag_mut().iter_mut() {
        *v += value;
    }
}

/// Column means and covariance of `x`, normalised by `n - ddof`.
pub fn mean_and_covariance(x: ArrayView2<f64>, ddof: f64) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = x.nrows() as f64;
    if n - ddof <= 0.0 {
        return Err(DetectorError::EmptyInput(format!(
            "covariance needs more than {} rows, got {}",
            ddof,
            x.nrows()
        )));
    }
    let mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| DetectorError::EmptyInput("no rows".to_string()))?;
    let centered = x.to_owned() - &mean;
    let mut cov = centered.t().dot(&centered) / (n - ddof);
    symmetrize(&mut cov);
    Ok((mean, cov))
}
