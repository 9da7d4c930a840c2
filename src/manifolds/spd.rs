use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};

use crate::core::{Error, Result};

/// Allowed asymmetry, relative to the largest entry of the matrix
pub const SYMMETRY_TOLERANCE: f64 = 1e-6;

/// Eigenvalues at or below this fraction of the largest one count as zero
///
/// A rank-deficient descriptor comes back from the eigensolver with tiny
/// positive round-off eigenvalues; they must not be fed to ln or 1/sqrt.
pub const RANK_TOLERANCE: f64 = 1e-12;

/// Check that a matrix is square, finite and symmetric within tolerance
pub fn check_symmetric(m: &Array2<f64>) -> Result<()> {
    let (rows, cols) = m.dim();
    if rows != cols {
        return Err(Error::DimensionMismatch {
            expected: rows,
            got: cols,
        });
    }

    if m.iter().any(|v| !v.is_finite()) {
        return Err(Error::Decomposition(
            "matrix contains non-finite values".to_string(),
        ));
    }

    let scale = m.fold(1.0_f64, |acc, v| acc.max(v.abs()));
    for i in 0..rows {
        for j in i + 1..cols {
            if (m[[i, j]] - m[[j, i]]).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(Error::Decomposition(format!(
                    "matrix is not symmetric at ({}, {})",
                    i, j
                )));
            }
        }
    }

    Ok(())
}

/// Symmetric eigendecomposition M = V Λ V^T
///
/// The input is validated and symmetrized first so that round-off asymmetry
/// never reaches the solver.
fn decompose(m: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    check_symmetric(m)?;
    let symmetric: Array2<f64> = 0.5 * (m + &m.t());
    symmetric
        .eigh(UPLO::Lower)
        .map_err(|err| Error::Decomposition(format!("eigensolver failed: {:?}", err)))
}

/// V diag(f(Λ)) V^T, failing if any mapped eigenvalue is non-finite
fn reconstruct<F>(eigenvalues: &Array1<f64>, eigenvectors: &Array2<f64>, f: F) -> Result<Array2<f64>>
where
    F: Fn(f64) -> f64,
{
    let mapped = eigenvalues.mapv(|lambda| f(lambda));
    if let Some((lambda, _)) = eigenvalues
        .iter()
        .zip(mapped.iter())
        .find(|(_, value)| !value.is_finite())
    {
        return Err(Error::Decomposition(format!(
            "eigenvalue {:e} maps to a non-finite value",
            lambda
        )));
    }

    Ok(eigenvectors
        .dot(&Array2::from_diag(&mapped))
        .dot(&eigenvectors.t()))
}

/// Fail unless every eigenvalue is clearly positive
fn require_positive(eigenvalues: &Array1<f64>) -> Result<()> {
    let largest = eigenvalues.fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    let floor = RANK_TOLERANCE * largest;
    match eigenvalues.iter().find(|&&lambda| lambda <= floor) {
        Some(lambda) => Err(Error::Decomposition(format!(
            "matrix is not positive definite (eigenvalue {:e}, largest {:e})",
            lambda, largest
        ))),
        None => Ok(()),
    }
}

/// Apply a scalar function to the eigenvalues of a symmetric matrix
///
/// f(M) = V diag(f(λ_1), ..., f(λ_n)) V^T where M = V Λ V^T
pub fn eig_fn<F>(m: &Array2<f64>, f: F) -> Result<Array2<f64>>
where
    F: Fn(f64) -> f64,
{
    let (eigenvalues, eigenvectors) = decompose(m)?;
    reconstruct(&eigenvalues, &eigenvectors, f)
}

/// Principal matrix logarithm of an SPD matrix
pub fn logm(m: &Array2<f64>) -> Result<Array2<f64>> {
    let (eigenvalues, eigenvectors) = decompose(m)?;
    require_positive(&eigenvalues)?;
    reconstruct(&eigenvalues, &eigenvectors, f64::ln)
}

/// Inverse square root M^{-1/2} of an SPD matrix
pub fn inv_sqrtm(m: &Array2<f64>) -> Result<Array2<f64>> {
    let (eigenvalues, eigenvectors) = decompose(m)?;
    require_positive(&eigenvalues)?;
    reconstruct(&eigenvalues, &eigenvectors, |lambda| 1.0 / lambda.sqrt())
}
