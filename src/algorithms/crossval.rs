use log::debug;
use ndarray::{ArrayView2, Axis};

use crate::core::{Error, KernelClassifier, Result};

/// Fold index of every sample: sample `i` is held out in fold `i mod folds`
pub fn fold_assignment(n: usize, folds: usize) -> Vec<usize> {
    (0..n).map(|i| i % folds.max(1)).collect()
}

/// k-fold accuracy of a kernel classifier at regularization `c`
///
/// Every sample is held out exactly once; the result is the fraction of
/// held-out predictions that match their label. `progress` fires after each
/// fold.
pub fn cross_val_accuracy<K, F>(
    gram: ArrayView2<f64>,
    labels: &[usize],
    c: f64,
    folds: usize,
    progress: &F,
) -> Result<f64>
where
    K: KernelClassifier,
    F: Fn() + ?Sized,
{
    let n = labels.len();
    if n < 2 {
        return Err(Error::NotEnoughSamples { needed: 2, got: n });
    }
    if folds < 2 {
        return Err(Error::InvalidParameter(format!(
            "cross-validation needs at least 2 folds, got {}",
            folds
        )));
    }

    let k = folds.min(n);
    let assignment = fold_assignment(n, k);
    let mut correct = 0usize;

    for fold in 0..k {
        let (held_out, kept): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| assignment[i] == fold);

        let sub_gram = gram.select(Axis(0), &kept).select(Axis(1), &kept);
        let sub_labels: Vec<usize> = kept.iter().map(|&i| labels[i]).collect();

        let mut classifier = K::default();
        classifier.fit(sub_gram.view(), &sub_labels, c)?;

        for &i in &held_out {
            let row = gram.row(i).select(Axis(0), &kept);
            if classifier.predict(row.view())? == labels[i] {
                correct += 1;
            }
        }

        progress();
    }

    Ok(correct as f64 / n as f64)
}

/// Pick the candidate C with the best cross-validation accuracy
///
/// Returns `(best_c, best_accuracy)`; the first candidate wins on ties.
pub fn select_regularization<K, F>(
    gram: ArrayView2<f64>,
    labels: &[usize],
    candidates: &[f64],
    folds: usize,
    progress: &F,
) -> Result<(f64, f64)>
where
    K: KernelClassifier,
    F: Fn() + ?Sized,
{
    if candidates.is_empty() {
        return Err(Error::InvalidParameter(
            "no regularization candidates given".to_string(),
        ));
    }

    let mut best: Option<(f64, f64)> = None;
    for &c in candidates {
        let accuracy = cross_val_accuracy::<K, F>(gram, labels, c, folds, progress)?;
        debug!("C = {}: cross-validation accuracy {:.4}", c, accuracy);
        match best {
            Some((_, best_accuracy)) if accuracy <= best_accuracy => {}
            _ => best = Some((c, accuracy)),
        }
    }

    best.ok_or_else(|| Error::InvalidParameter("no regularization candidates given".to_string()))
}
