use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::core::error::{Error, Result};

/// A multiclass classifier that only ever sees kernel values
///
/// Training consumes a square Gram matrix over the training pool; inference
/// consumes one kernel row (the query against every training sample, in
/// training order). The classifier never sees the samples themselves.
pub trait KernelClassifier: Default + Clone + Send + Sync {
    /// Fit on a precomputed Gram matrix with regularization `c`
    fn fit(&mut self, gram: ArrayView2<f64>, labels: &[usize], c: f64) -> Result<()>;

    /// Labels known to the classifier, in the order used by probability vectors
    fn classes(&self) -> &[usize];

    /// Raw per-class decision values, in `classes()` order
    fn decision_function(&self, kernel_row: ArrayView1<f64>) -> Result<Array1<f64>>;

    /// Probability vector in `classes()` order
    ///
    /// Default implementation is a softmax over the decision values.
    fn predict_probas(&self, kernel_row: ArrayView1<f64>) -> Result<Array1<f64>> {
        let scores = self.decision_function(kernel_row)?;
        Ok(softmax(&scores))
    }

    /// Best label for a kernel row
    ///
    /// Always the argmax of `predict_probas`, first index on ties.
    fn predict(&self, kernel_row: ArrayView1<f64>) -> Result<usize> {
        let probas = self.predict_probas(kernel_row)?;
        argmax(probas.iter().copied())
            .and_then(|idx| self.classes().get(idx).copied())
            .ok_or_else(|| Error::InvalidParameter("classifier has no classes".to_string()))
    }
}

/// Index of the largest value; the first one wins on ties
pub fn argmax<I: IntoIterator<Item = f64>>(values: I) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, value) in values.into_iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Numerically stable softmax
pub fn softmax(scores: &Array1<f64>) -> Array1<f64> {
    let max = scores.fold(f64::NEG_INFINITY, |acc, &s| acc.max(s));
    let exps = scores.mapv(|s| (s - max).exp());
    let total = exps.sum();
    exps / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(vec![0.2, 0.5, 0.5, 0.1]), Some(1));
        assert_eq!(argmax(Vec::<f64>::new()), None);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&arr1(&[1000.0, 999.0, -3.0]));
        assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-12);
        assert!(p.iter().all(|&v| v >= 0.0));
        assert!(p[0] > p[1] && p[1] > p[2]);
    }
}
