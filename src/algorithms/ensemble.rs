use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{debug, info};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::algorithms::classifier::LeastSquaresSvm;
use crate::algorithms::patch_model::PatchModel;
use crate::core::{argmax, Error, KernelClassifier, Result};
use crate::features::patch::check_on_canvas;
use crate::features::{FeatureStack, FilterBank, Image, Patch, RegionDescriptor};
use crate::manifolds::Distance;

/// Version tag written into saved bundles
pub const FORMAT_VERSION: u32 = 1;

/// Canvas every image is resized to before feature extraction
pub const DEFAULT_CANVAS: (usize, usize) = (50, 50);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: DeserializeOwned"))]
struct WeightedPatch<C> {
    patch: Patch,
    weight: f64,
    model: PatchModel<C>,
}

/// Weighted array of per-patch covariance classifiers
///
/// Every image is resized to the canvas, turned into a feature stack once,
/// and summarized by one region descriptor per patch. Each patch trains its
/// own `PatchModel`; its cross-validation accuracy becomes its weight in the
/// final vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: DeserializeOwned"))]
pub struct Warco<C = LeastSquaresSvm> {
    format_version: u32,
    bank: FilterBank,
    canvas: (usize, usize),
    descriptor: RegionDescriptor,
    distance: Distance,
    patches: Vec<WeightedPatch<C>>,
}

impl<C: KernelClassifier> Warco<C> {
    /// Create an untrained ensemble over `patches`, all sharing `distance`
    pub fn new(bank: FilterBank, patches: Vec<Patch>, distance: Distance) -> Result<Self> {
        if patches.is_empty() {
            return Err(Error::InvalidParameter(
                "the patch grid must not be empty".to_string(),
            ));
        }
        for patch in &patches {
            patch.validate()?;
        }
        check_on_canvas(&patches, DEFAULT_CANVAS.0, DEFAULT_CANVAS.1)?;

        let patches = patches
            .into_iter()
            .map(|patch| WeightedPatch {
                patch,
                weight: 0.0,
                model: PatchModel::new(distance),
            })
            .collect();

        Ok(Warco {
            format_version: FORMAT_VERSION,
            bank,
            canvas: DEFAULT_CANVAS,
            descriptor: RegionDescriptor::default(),
            distance,
            patches,
        })
    }

    /// Set the canvas size (width, height) images are resized to
    ///
    /// Fails if any patch would cover no pixels on the new canvas.
    pub fn with_canvas(mut self, width: usize, height: usize) -> Result<Self> {
        check_on_canvas(&self.patches(), width, height)?;
        self.canvas = (width, height);
        Ok(self)
    }

    pub fn with_descriptor(mut self, descriptor: RegionDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Set the number of cross-validation folds of every patch model
    pub fn with_folds(mut self, folds: usize) -> Self {
        for wp in &mut self.patches {
            wp.model.set_folds(folds);
        }
        self
    }

    pub fn filter_bank(&self) -> &FilterBank {
        &self.bank
    }

    pub fn canvas(&self) -> (usize, usize) {
        self.canvas
    }

    pub fn descriptor(&self) -> RegionDescriptor {
        self.descriptor
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patches(&self) -> Vec<Patch> {
        self.patches.iter().map(|wp| wp.patch).collect()
    }

    /// Per-patch weights in grid order (all zero before training)
    pub fn weights(&self) -> Vec<f64> {
        self.patches.iter().map(|wp| wp.weight).collect()
    }

    pub fn is_trained(&self) -> bool {
        self.patches.iter().all(|wp| wp.model.is_trained())
    }

    /// Number of training images added so far
    pub fn n_samples(&self) -> usize {
        self.patches.first().map_or(0, |wp| wp.model.len())
    }

    /// One descriptor per patch, in grid order
    pub fn descriptors(&self, image: &Image) -> Result<Vec<Array2<f64>>> {
        let (width, height) = self.canvas;
        let resized;
        let image = if image.width() != width || image.height() != height {
            resized = image.resized(width, height)?;
            &resized
        } else {
            image
        };

        let stack = FeatureStack::from_image(image, &self.bank)?;
        self.patches
            .iter()
            .map(|wp| {
                let rect = wp.patch.to_pixels(width, height);
                self.descriptor.extract(&stack, &rect)
            })
            .collect()
    }

    /// Add one training image; every patch model receives one sample
    ///
    /// All descriptors are computed before any model is touched, so a failing
    /// image leaves the ensemble unchanged.
    pub fn add_sample(&mut self, image: &Image, label: usize) -> Result<()> {
        if self.patches.iter().any(|wp| wp.model.is_trained()) {
            return Err(Error::AlreadyTrained);
        }
        let descriptors = self.descriptors(image)?;
        for (wp, descriptor) in self.patches.iter_mut().zip(descriptors) {
            wp.model.add_sample(descriptor, label)?;
        }
        Ok(())
    }

    /// Train every patch model, then weight patches by their accuracy
    ///
    /// `progress` is called once per trained patch. Returns the mean per-patch
    /// cross-validation accuracy. Patches are trained on copies and committed
    /// only if every one succeeds; on error the ensemble is left untouched.
    pub fn train<F>(&mut self, candidates: &[f64], progress: F) -> Result<f64>
    where
        F: Fn() + Sync,
    {
        if self.patches.iter().any(|wp| wp.model.is_trained()) {
            return Err(Error::AlreadyTrained);
        }

        let train_one = |wp: &WeightedPatch<C>| -> Result<(PatchModel<C>, f64)> {
            let mut model = wp.model.clone();
            let score = model.train(candidates, || {})?;
            progress();
            Ok((model, score))
        };

        #[cfg(feature = "parallel")]
        let trained: Vec<(PatchModel<C>, f64)> = {
            use rayon::prelude::*;
            self.patches
                .par_iter()
                .map(train_one)
                .collect::<Result<Vec<_>>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let trained: Vec<(PatchModel<C>, f64)> = self
            .patches
            .iter()
            .map(train_one)
            .collect::<Result<Vec<_>>>()?;

        let scores: Vec<f64> = trained.iter().map(|(_, score)| *score).collect();
        let weights = normalize_weights(&scores);
        for ((wp, (model, _)), weight) in self.patches.iter_mut().zip(trained).zip(weights) {
            wp.model = model;
            wp.weight = weight;
        }

        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        info!(
            "trained {} patch models on {} images, mean cv accuracy {:.4}",
            self.patches.len(),
            self.n_samples(),
            mean
        );
        debug!("patch weights: {:?}", self.weights());
        Ok(mean)
    }

    /// Weighted vote of every patch's predicted label
    pub fn predict(&self, image: &Image) -> Result<usize> {
        let votes = self.votes(image)?;
        best_label(&votes)
    }

    /// Label maximizing the weighted sum of per-patch probability vectors
    pub fn predict_proba(&self, image: &Image) -> Result<usize> {
        let scores = self.class_scores(image)?;
        best_label(&scores)
    }

    /// Weighted vote totals per label, labels in first-seen grid order
    pub fn votes(&self, image: &Image) -> Result<Vec<(usize, f64)>> {
        let descriptors = self.descriptors(image)?;
        let labels = self.per_patch(&descriptors, |wp, d| wp.model.predict(d))?;

        let mut votes = Vec::new();
        for (wp, label) in self.patches.iter().zip(labels) {
            accumulate(&mut votes, label, wp.weight);
        }
        debug!("votes: {:?}", votes);
        Ok(votes)
    }

    /// Weighted probability mass per label, labels in first-seen grid order
    pub fn class_scores(&self, image: &Image) -> Result<Vec<(usize, f64)>> {
        let descriptors = self.descriptors(image)?;
        let probas = self.per_patch(&descriptors, |wp, d| {
            let p = wp.model.predict_probas(d)?;
            let classes = wp.model.classes()?;
            Ok(classes.iter().copied().zip(p.iter().copied()).collect::<Vec<_>>())
        })?;

        let mut scores = Vec::new();
        for (wp, patch_probas) in self.patches.iter().zip(probas) {
            for (label, p) in patch_probas {
                accumulate(&mut scores, label, p * wp.weight);
            }
        }
        debug!("class scores: {:?}", scores);
        Ok(scores)
    }

    /// Labels known to the ensemble, in probability-vector order of the first patch
    pub fn classes(&self) -> Result<Vec<usize>> {
        let first = self.patches.first().ok_or(Error::UntrainedModel)?;
        Ok(first.model.classes()?.to_vec())
    }

    /// Write the whole ensemble (bank, geometry, weights, models) as one JSON bundle
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()>
    where
        C: Serialize,
    {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        info!("saved {} patch models to {}", self.patches.len(), path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self>
    where
        C: DeserializeOwned,
    {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut warco: Warco<C> = serde_json::from_reader(reader)?;

        if warco.format_version != FORMAT_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported bundle version {} (expected {})",
                warco.format_version, FORMAT_VERSION
            )));
        }
        if warco.patches.is_empty() {
            return Err(Error::Serialization("bundle has no patches".to_string()));
        }
        let (width, height) = warco.canvas;
        check_on_canvas(&warco.patches(), width, height)?;
        for wp in &mut warco.patches {
            wp.patch.validate()?;
            wp.model.restore()?;
            if wp.model.distance() != warco.distance {
                return Err(Error::Serialization(format!(
                    "patch model uses {} but the ensemble uses {}",
                    wp.model.distance(),
                    warco.distance
                )));
            }
        }
        Ok(warco)
    }

    /// Apply `f` to every (patch, descriptor) pair; results stay in grid order
    fn per_patch<T, F>(&self, descriptors: &[Array2<f64>], f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&WeightedPatch<C>, &Array2<f64>) -> Result<T> + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.patches
                .par_iter()
                .zip(descriptors.par_iter())
                .map(|(wp, d)| f(wp, d))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            self.patches
                .iter()
                .zip(descriptors)
                .map(|(wp, d)| f(wp, d))
                .collect()
        }
    }
}

/// Patch weights proportional to their scores; uniform when no patch scored
fn normalize_weights(scores: &[f64]) -> Vec<f64> {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        scores.iter().map(|s| s / total).collect()
    } else {
        vec![1.0 / scores.len() as f64; scores.len()]
    }
}

/// Add `amount` to `label`'s running total, appending unseen labels
fn accumulate(totals: &mut Vec<(usize, f64)>, label: usize, amount: f64) {
    match totals.iter_mut().find(|(l, _)| *l == label) {
        Some((_, total)) => *total += amount,
        None => totals.push((label, amount)),
    }
}

/// Label with the largest total; the first-seen label wins ties
fn best_label(totals: &[(usize, f64)]) -> Result<usize> {
    argmax(totals.iter().map(|(_, total)| *total))
        .map(|idx| totals[idx].0)
        .ok_or_else(|| Error::InvalidParameter("no patch produced a prediction".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ties_go_to_first_seen_label() {
        let mut totals = Vec::new();
        accumulate(&mut totals, 2, 0.25);
        accumulate(&mut totals, 0, 0.25);
        accumulate(&mut totals, 1, 0.5);
        accumulate(&mut totals, 2, 0.25);
        assert_eq!(totals, vec![(2, 0.5), (0, 0.25), (1, 0.5)]);
        assert_eq!(best_label(&totals).unwrap(), 2);
    }

    #[test]
    fn test_weights_follow_scores() {
        assert_eq!(normalize_weights(&[1.0, 3.0]), vec![0.25, 0.75]);
        assert_eq!(normalize_weights(&[0.0, 0.5]), vec![0.0, 1.0]);
    }

    #[test]
    fn test_weights_are_uniform_when_every_patch_scores_zero() {
        assert_eq!(normalize_weights(&[0.0, 0.0, 0.0, 0.0]), vec![0.25; 4]);
    }

    #[test]
    fn test_best_label_of_nothing_is_an_error() {
        assert!(best_label(&[]).is_err());
    }

    #[test]
    fn test_construction_validates_grid() {
        let bank = FilterBank::doog();
        assert!(Warco::<LeastSquaresSvm>::new(bank.clone(), vec![], Distance::Cbh).is_err());
        assert!(Warco::<LeastSquaresSvm>::new(
            bank.clone(),
            vec![Patch::new(0.9, 0.0, 0.5, 0.5)],
            Distance::Cbh
        )
        .is_err());

        assert!(matches!(
            Warco::<LeastSquaresSvm>::new(
                bank.clone(),
                vec![Patch::new(0.5, 0.5, 0.001, 0.001)],
                Distance::Cbh
            ),
            Err(Error::InvalidParameter(_))
        ));

        let warco: Warco = Warco::new(bank, Patch::default_grid(), Distance::Cbh).unwrap();
        assert_eq!(warco.len(), 25);
        assert_eq!(warco.canvas(), DEFAULT_CANVAS);
        assert!(!warco.is_trained());
        assert!(warco.weights().iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_canvas_must_fit_every_patch() {
        let warco: Warco = Warco::new(
            FilterBank::doog(),
            vec![Patch::new(0.0, 0.0, 1.0, 1.0), Patch::new(0.9, 0.9, 0.02, 0.02)],
            Distance::Cbh,
        )
        .unwrap();
        assert!(matches!(
            warco.clone().with_canvas(8, 8),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(warco.with_canvas(40, 40).unwrap().canvas(), (40, 40));
    }
}
