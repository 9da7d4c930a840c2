//! Dataset description files
//!
//! A dataset file is JSON:
//!
//! ```json
//! {
//!   "classes": ["back", "front"],
//!   "train": { "back": ["img/b0.png"], "front": ["img/f0.png"] },
//!   "test":  { "back": ["img/b9.png"], "front": ["img/f9.png"] },
//!   "filterbank": "doog.json",
//!   "distance": "cbh",
//!   "crossval_C": [0.1, 1.0, 10.0],
//!   "patches": [[0.02, 0.02, 0.32, 0.32]],
//!   "descriptor": "correlation",
//!   "ridge": 1e-6
//! }
//! ```
//!
//! Labels are indices into `classes`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::algorithms::ensemble::{Warco, DEFAULT_CANVAS};
use crate::core::{Error, KernelClassifier, Result};
use crate::features::{DescriptorKind, FilterBank, Image, Patch, RegionDescriptor};
use crate::manifolds::Distance;

fn default_distance() -> String {
    Distance::Cbh.name().to_string()
}

fn default_crossval_c() -> Vec<f64> {
    vec![0.1, 1.0, 10.0]
}

/// Diagonal ridge used unless a dataset file says otherwise; keeps flat or
/// channel-redundant regions positive definite
pub const DEFAULT_RIDGE: f64 = 1e-6;

fn default_ridge() -> f64 {
    DEFAULT_RIDGE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub classes: Vec<String>,
    #[serde(default)]
    pub train: BTreeMap<String, Vec<PathBuf>>,
    #[serde(default)]
    pub test: BTreeMap<String, Vec<PathBuf>>,
    /// Filter bank file; the stock DooG bank when absent
    #[serde(default)]
    pub filterbank: Option<PathBuf>,
    #[serde(default = "default_distance")]
    pub distance: String,
    #[serde(rename = "crossval_C", default = "default_crossval_c")]
    pub crossval_c: Vec<f64>,
    #[serde(default)]
    pub patches: Option<Vec<Vec<f64>>>,
    /// Canvas as [width, height]
    #[serde(default)]
    pub canvas: Option<[usize; 2]>,
    #[serde(default)]
    pub descriptor: DescriptorKind,
    #[serde(default = "default_ridge")]
    pub ridge: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl DatasetConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn distance(&self) -> Result<Distance> {
        self.distance.parse()
    }

    /// Configured patch rectangles, or the default 5×5 grid
    pub fn patches(&self) -> Result<Vec<Patch>> {
        match &self.patches {
            Some(list) => list.iter().map(|p| Patch::from_slice(p)).collect(),
            None => Ok(Patch::default_grid()),
        }
    }

    pub fn canvas(&self) -> (usize, usize) {
        self.canvas.map_or(DEFAULT_CANVAS, |[w, h]| (w, h))
    }

    pub fn filter_bank(&self) -> Result<FilterBank> {
        match &self.filterbank {
            Some(path) => FilterBank::load(path),
            None => Ok(FilterBank::doog()),
        }
    }

    pub fn region_descriptor(&self) -> Result<RegionDescriptor> {
        if !(self.ridge.is_finite() && self.ridge >= 0.0) {
            return Err(Error::InvalidParameter(format!(
                "ridge must be a non-negative number, got {}",
                self.ridge
            )));
        }
        Ok(RegionDescriptor {
            kind: self.descriptor,
            ridge: self.ridge,
        })
    }

    /// Untrained ensemble matching this configuration
    pub fn build_model<C: KernelClassifier>(&self) -> Result<Warco<C>> {
        let (width, height) = self.canvas();
        let descriptor = self.region_descriptor()?;
        Ok(Warco::new(self.filter_bank()?, self.patches()?, self.distance()?)?
            .with_canvas(width, height)?
            .with_descriptor(descriptor))
    }

    /// (label, path) of every image in a split, in class order
    pub fn images(&self, split: Split) -> Vec<(usize, &Path)> {
        let lists = match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        };
        self.classes
            .iter()
            .enumerate()
            .flat_map(|(label, name)| {
                lists
                    .get(name)
                    .into_iter()
                    .flatten()
                    .map(move |path| (label, path.as_path()))
            })
            .collect()
    }

    /// Load every image of a split and hand it to `f`
    ///
    /// Unreadable images are logged and skipped; errors returned by `f` abort
    /// the walk. Returns the number of skipped images.
    pub fn for_each_image<F>(&self, split: Split, mut f: F) -> Result<usize>
    where
        F: FnMut(usize, Image, &Path) -> Result<()>,
    {
        let mut skipped = 0;
        for (label, path) in self.images(split) {
            match Image::from_file(path) {
                Ok(image) => f(label, image, path)?,
                Err(err) => {
                    warn!("skipping unreadable image {}: {}", path.display(), err);
                    skipped += 1;
                }
            }
        }
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatasetConfig::from_json_str(r#"{ "classes": ["a", "b"] }"#).unwrap();
        assert_eq!(config.distance().unwrap(), Distance::Cbh);
        assert_eq!(config.crossval_c, vec![0.1, 1.0, 10.0]);
        assert_eq!(config.patches().unwrap(), Patch::default_grid());
        assert_eq!(config.canvas(), (50, 50));
        assert_eq!(config.filter_bank().unwrap(), FilterBank::doog());
        assert_eq!(
            config.region_descriptor().unwrap(),
            RegionDescriptor::correlation().with_ridge(DEFAULT_RIDGE)
        );
        assert!(config.images(Split::Train).is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = DatasetConfig::from_json_str(
            r#"{
                "classes": ["a", "b"],
                "train": { "b": ["b0.png", "b1.png"], "a": ["a0.png"] },
                "distance": "my euclid",
                "crossval_C": [2.0],
                "patches": [[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 0.5, 0.5]],
                "canvas": [20, 30],
                "descriptor": "covariance",
                "ridge": 0.0
            }"#,
        )
        .unwrap();

        assert_eq!(config.distance().unwrap(), Distance::RawEuclidean);
        assert_eq!(config.crossval_c, vec![2.0]);
        assert_eq!(config.patches().unwrap().len(), 2);
        assert_eq!(config.canvas(), (20, 30));
        assert_eq!(config.region_descriptor().unwrap(), RegionDescriptor::covariance());
        let warco: crate::Warco = config.build_model().unwrap();
        assert_eq!(warco.descriptor(), RegionDescriptor::covariance());
        assert_eq!(warco.canvas(), (20, 30));

        let images = config.images(Split::Train);
        assert_eq!(
            images,
            vec![
                (0, Path::new("a0.png")),
                (1, Path::new("b0.png")),
                (1, Path::new("b1.png")),
            ]
        );
    }

    #[test]
    fn test_bad_patch_and_distance() {
        let config = DatasetConfig::from_json_str(
            r#"{ "classes": ["a"], "patches": [[0.0, 0.0, 0.5]], "distance": "CBH" }"#,
        )
        .unwrap();
        assert!(matches!(config.patches(), Err(Error::InvalidParameter(_))));
        assert_eq!(config.distance(), Err(Error::UnknownDistance("CBH".to_string())));
        assert!(config.build_model::<crate::LeastSquaresSvm>().is_err());

        let config =
            DatasetConfig::from_json_str(r#"{ "classes": ["a"], "ridge": -1.0 }"#).unwrap();
        assert!(matches!(config.region_descriptor(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_unreadable_images_are_skipped() {
        let config = DatasetConfig::from_json_str(
            r#"{ "classes": ["a"], "train": { "a": ["/no/such/image.png"] } }"#,
        )
        .unwrap();
        let mut seen = 0;
        let skipped = config
            .for_each_image(Split::Train, |_, _, _| {
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(seen, 0);
    }
}
