use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::debug;
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::algorithms::classifier::LeastSquaresSvm;
use crate::algorithms::crossval::select_regularization;
use crate::core::{Error, KernelClassifier, Result};
use crate::manifolds::Distance;

/// Default number of cross-validation folds
pub const DEFAULT_FOLDS: usize = 5;

/// Per-patch classifier over region descriptors
///
/// Descriptors are compared with `distance`; distances become kernel values
/// through k(a, b) = exp(−d(a, b) / μ), where μ is the mean pairwise training
/// distance. The sample pool is kept after training because every prediction
/// needs the query's distance to each training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: DeserializeOwned"))]
pub struct PatchModel<C = LeastSquaresSvm> {
    distance: Distance,
    folds: usize,
    samples: Vec<Array2<f64>>,
    labels: Vec<usize>,
    kernel_scale: f64,
    regularization: Option<f64>,
    classifier: Option<C>,
    /// Sample-side precomputation for `distance`; rebuilt at train and load
    #[serde(skip)]
    anchors: Vec<Array2<f64>>,
}

impl<C: KernelClassifier> PatchModel<C> {
    pub fn new(distance: Distance) -> Self {
        PatchModel {
            distance,
            folds: DEFAULT_FOLDS,
            samples: Vec::new(),
            labels: Vec::new(),
            kernel_scale: 1.0,
            regularization: None,
            classifier: None,
            anchors: Vec::new(),
        }
    }

    /// Set the number of cross-validation folds (at least 2)
    pub fn with_folds(mut self, folds: usize) -> Self {
        self.set_folds(folds);
        self
    }

    pub(crate) fn set_folds(&mut self, folds: usize) {
        self.folds = folds.max(2);
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_trained(&self) -> bool {
        self.classifier.is_some()
    }

    /// Regularization value picked by cross-validation
    pub fn regularization(&self) -> Option<f64> {
        self.regularization
    }

    /// Labels in probability-vector order
    pub fn classes(&self) -> Result<&[usize]> {
        self.trained().map(|c| c.classes())
    }

    pub fn add_sample(&mut self, descriptor: Array2<f64>, label: usize) -> Result<()> {
        if self.is_trained() {
            return Err(Error::AlreadyTrained);
        }
        if let Some(first) = self.samples.first() {
            if first.dim() != descriptor.dim() {
                return Err(Error::DimensionMismatch {
                    expected: first.len(),
                    got: descriptor.len(),
                });
            }
        }
        self.samples.push(descriptor);
        self.labels.push(label);
        Ok(())
    }

    /// Cross-validate every candidate C, then retrain on the whole pool with
    /// the best one
    ///
    /// `progress` is called once per fold fit and once for the final fit.
    /// Returns the best cross-validation accuracy.
    pub fn train<F>(&mut self, candidates: &[f64], progress: F) -> Result<f64>
    where
        F: Fn(),
    {
        if self.is_trained() {
            return Err(Error::AlreadyTrained);
        }
        if self.samples.len() < 2 {
            return Err(Error::NotEnoughSamples {
                needed: 2,
                got: self.samples.len(),
            });
        }
        if let Some(bad) = candidates.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
            return Err(Error::InvalidParameter(format!(
                "regularization candidates must be positive, got {}",
                bad
            )));
        }

        let anchors = self.distance.anchors(&self.samples)?;
        let distances = self.distance.pairwise_anchored(&self.samples, &anchors)?;
        let scale = mean_off_diagonal(&distances);
        let gram = distances.mapv(|d| (-d / scale).exp());

        let (best_c, accuracy) = select_regularization::<C, F>(
            gram.view(),
            &self.labels,
            candidates,
            self.folds,
            &progress,
        )?;

        let mut classifier = C::default();
        classifier.fit(gram.view(), &self.labels, best_c)?;
        progress();

        debug!(
            "patch model: {} samples, {} distance, kernel scale {:.4}, C = {}, cv accuracy {:.4}",
            self.samples.len(),
            self.distance,
            scale,
            best_c,
            accuracy
        );

        self.kernel_scale = scale;
        self.regularization = Some(best_c);
        self.classifier = Some(classifier);
        self.anchors = anchors;
        Ok(accuracy)
    }

    pub fn predict(&self, descriptor: &Array2<f64>) -> Result<usize> {
        let classifier = self.trained()?;
        let row = self.kernel_row(descriptor)?;
        classifier.predict(row.view())
    }

    pub fn predict_probas(&self, descriptor: &Array2<f64>) -> Result<Array1<f64>> {
        let classifier = self.trained()?;
        let row = self.kernel_row(descriptor)?;
        classifier.predict_probas(row.view())
    }

    /// Write samples, distance, kernel scale and classifier state as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()>
    where
        C: Serialize,
    {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self>
    where
        C: DeserializeOwned,
    {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut model: PatchModel<C> = serde_json::from_reader(reader)?;
        model.restore()?;
        Ok(model)
    }

    /// Validate deserialized state and rebuild the cached anchors
    pub(crate) fn restore(&mut self) -> Result<()> {
        self.check_consistency()?;
        if self.is_trained() {
            self.anchors = self.distance.anchors(&self.samples)?;
        }
        Ok(())
    }

    fn check_consistency(&self) -> Result<()> {
        if self.samples.len() != self.labels.len() {
            return Err(Error::Serialization(format!(
                "{} samples but {} labels",
                self.samples.len(),
                self.labels.len()
            )));
        }
        if !(self.kernel_scale.is_finite() && self.kernel_scale > 0.0) {
            return Err(Error::Serialization(format!(
                "invalid kernel scale {}",
                self.kernel_scale
            )));
        }
        Ok(())
    }

    fn trained(&self) -> Result<&C> {
        self.classifier.as_ref().ok_or(Error::UntrainedModel)
    }

    fn kernel_row(&self, descriptor: &Array2<f64>) -> Result<Array1<f64>> {
        let scale = self.kernel_scale;
        let distances = self.distance.row_anchored(&self.anchors, descriptor)?;
        Ok(distances.mapv(|d| (-d / scale).exp()))
    }
}

/// Mean of the strict upper triangle; 1 when that is not positive
fn mean_off_diagonal(distances: &Array2<f64>) -> f64 {
    let n = distances.nrows();
    let mut sum = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            sum += distances[[i, j]];
        }
    }
    let pairs = n * n.saturating_sub(1) / 2;
    let mean = if pairs > 0 { sum / pairs as f64 } else { 0.0 };
    if mean.is_finite() && mean > 0.0 {
        mean
    } else {
        1.0
    }
}
