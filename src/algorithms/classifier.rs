use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{FactorizeInto, Solve};
use serde::{Deserialize, Serialize};

use crate::core::{softmax, Error, KernelClassifier, Result};

/// Scale applied to decision values before the softmax
pub const DEFAULT_SHARPNESS: f64 = 4.0;

/// One-vs-rest least-squares SVM on a precomputed kernel
///
/// For every class k the dual problem reduces to the linear system
///
/// ```text
/// [ 0   1^T       ] [ b_k ]   [ 0   ]
/// [ 1   K + I / C ] [ α_k ] = [ y_k ]
/// ```
///
/// with y_k = ±1. All classes share the same matrix, which is factorized once.
/// Decision value for class k on kernel row r: f_k(r) = α_k · r + b_k.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeastSquaresSvm {
    classes: Vec<usize>,
    /// N × L dual coefficients, one column per class
    alphas: Array2<f64>,
    biases: Array1<f64>,
    sharpness: f64,
}

impl Default for LeastSquaresSvm {
    fn default() -> Self {
        LeastSquaresSvm {
            classes: Vec::new(),
            alphas: Array2::zeros((0, 0)),
            biases: Array1::zeros(0),
            sharpness: DEFAULT_SHARPNESS,
        }
    }
}

impl KernelClassifier for LeastSquaresSvm {
    fn fit(&mut self, gram: ArrayView2<f64>, labels: &[usize], c: f64) -> Result<()> {
        let n = labels.len();
        if n == 0 {
            return Err(Error::NotEnoughSamples { needed: 1, got: 0 });
        }
        if gram.dim() != (n, n) {
            return Err(Error::DimensionMismatch {
                expected: n * n,
                got: gram.len(),
            });
        }
        if !(c.is_finite() && c > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "regularization C must be positive, got {}",
                c
            )));
        }

        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();

        if classes.len() == 1 {
            self.alphas = Array2::zeros((n, 1));
            self.biases = Array1::zeros(1);
            self.classes = classes;
            return Ok(());
        }

        let mut system = Array2::<f64>::zeros((n + 1, n + 1));
        system.slice_mut(s![0, 1..]).fill(1.0);
        system.slice_mut(s![1.., 0]).fill(1.0);
        system.slice_mut(s![1.., 1..]).assign(&gram);
        for i in 0..n {
            system[[i + 1, i + 1]] += 1.0 / c;
        }
        let lu = system.factorize_into()?;

        let mut alphas = Array2::zeros((n, classes.len()));
        let mut biases = Array1::zeros(classes.len());
        for (k, &class) in classes.iter().enumerate() {
            let mut rhs = Array1::zeros(n + 1);
            for (i, &label) in labels.iter().enumerate() {
                rhs[i + 1] = if label == class { 1.0 } else { -1.0 };
            }
            let solution = lu.solve_into(rhs)?;
            biases[k] = solution[0];
            alphas.column_mut(k).assign(&solution.slice(s![1..]));
        }

        self.classes = classes;
        self.alphas = alphas;
        self.biases = biases;
        Ok(())
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }

    fn decision_function(&self, kernel_row: ArrayView1<f64>) -> Result<Array1<f64>> {
        if self.classes.is_empty() {
            return Err(Error::UntrainedModel);
        }
        if kernel_row.len() != self.alphas.nrows() {
            return Err(Error::DimensionMismatch {
                expected: self.alphas.nrows(),
                got: kernel_row.len(),
            });
        }
        Ok(self.alphas.t().dot(&kernel_row) + &self.biases)
    }

    fn predict_probas(&self, kernel_row: ArrayView1<f64>) -> Result<Array1<f64>> {
        let scores = self.decision_function(kernel_row)?;
        Ok(softmax(&(scores * self.sharpness)))
    }
}
