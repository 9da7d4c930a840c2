use ndarray::{s, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::features::patch::PixelRect;
use crate::features::stack::FeatureStack;

/// Which second-moment matrix summarizes a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    /// Uncentered second moment (1/N) Σ F(p) F(p)^T; positive semidefinite
    /// even on near-constant regions
    #[default]
    Correlation,
    /// Mean-centered covariance
    Covariance,
}

/// Region descriptor extractor
///
/// `ridge` is added to the diagonal of every descriptor. It is zero by
/// default; a small positive value keeps rank-deficient regions usable with
/// the log-based distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub kind: DescriptorKind,
    pub ridge: f64,
}

impl Default for RegionDescriptor {
    fn default() -> Self {
        RegionDescriptor {
            kind: DescriptorKind::Correlation,
            ridge: 0.0,
        }
    }
}

impl RegionDescriptor {
    pub fn correlation() -> Self {
        RegionDescriptor::default()
    }

    pub fn covariance() -> Self {
        RegionDescriptor {
            kind: DescriptorKind::Covariance,
            ..Default::default()
        }
    }

    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }

    /// n×n descriptor of `rect` over all n channels of `stack`
    pub fn extract(&self, stack: &FeatureStack, rect: &PixelRect) -> Result<Array2<f64>> {
        if rect.area() == 0 {
            return Err(Error::DegenerateRegion(format!(
                "zero-area rectangle {:?}",
                rect
            )));
        }
        if rect.x + rect.width > stack.width() || rect.y + rect.height > stack.height() {
            return Err(Error::DegenerateRegion(format!(
                "rectangle {:?} exceeds {}x{} feature map",
                rect,
                stack.width(),
                stack.height()
            )));
        }

        let n = stack.channels();
        let count = rect.area();
        let region = stack.data().slice(s![
            ..,
            rect.y..rect.y + rect.height,
            rect.x..rect.x + rect.width
        ]);
        let mut flat = Array2::from_shape_fn((n, count), |(c, p)| {
            region[[c, p / rect.width, p % rect.width]]
        });

        if self.kind == DescriptorKind::Covariance {
            if let Some(mean) = flat.mean_axis(Axis(1)) {
                flat -= &mean.insert_axis(Axis(1));
            }
        }

        let mut m = flat.dot(&flat.t()) / count as f64;

        // Exact symmetry regardless of how the product was blocked.
        for i in 0..n {
            for j in i + 1..n {
                m[[j, i]] = m[[i, j]];
            }
        }

        if self.ridge != 0.0 {
            m.diag_mut().mapv_inplace(|v| v + self.ridge);
        }

        Ok(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifolds::Distance;
    use approx::assert_relative_eq;
    use ndarray::{arr1, Array3};

    fn constant_stack(v: &[f64], height: usize, width: usize) -> FeatureStack {
        FeatureStack::new(Array3::from_shape_fn((v.len(), height, width), |(c, _, _)| v[c]))
            .unwrap()
    }

    #[test]
    fn test_constant_patch_gives_outer_product() {
        let v = arr1(&[0.5, 2.0, -1.5, 0.25]);
        let stack = constant_stack(v.as_slice().unwrap(), 8, 8);
        let rect = PixelRect { x: 2, y: 1, width: 4, height: 4 };
        let m = RegionDescriptor::correlation().extract(&stack, &rect).unwrap();

        let expected = Array2::from_shape_fn((4, 4), |(i, j)| v[i] * v[j]);
        assert_eq!(m, expected);

        // Rank one: log-based distances must refuse it
        let other = Array2::<f64>::eye(4);
        assert!(matches!(
            Distance::LogEuclidean.evaluate(&m, &other),
            Err(Error::Decomposition(_))
        ));
    }

    #[test]
    fn test_covariance_of_constant_patch_is_zero() {
        let stack = constant_stack(&[0.5, 2.0, -1.5], 6, 6);
        let rect = PixelRect { x: 0, y: 0, width: 6, height: 6 };
        let m = RegionDescriptor::covariance().extract(&stack, &rect).unwrap();
        assert!(m.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_ridge_is_added_to_diagonal() {
        let stack = constant_stack(&[1.0, 1.0], 4, 4);
        let rect = PixelRect { x: 0, y: 0, width: 2, height: 2 };
        let m = RegionDescriptor::correlation()
            .with_ridge(0.5)
            .extract(&stack, &rect)
            .unwrap();
        assert_eq!(m, ndarray::arr2(&[[1.5, 1.0], [1.0, 1.5]]));
    }

    #[test]
    fn test_correlation_matches_definition() {
        let data = Array3::from_shape_fn((3, 5, 7), |(c, y, x)| {
            ((c + 1) as f64 * 0.3 + y as f64 * 0.11 - x as f64 * 0.07).sin()
        });
        let stack = FeatureStack::new(data.clone()).unwrap();
        let rect = PixelRect { x: 1, y: 2, width: 5, height: 3 };
        let m = RegionDescriptor::correlation().extract(&stack, &rect).unwrap();

        for i in 0..3 {
            for j in 0..3 {
                let mut sum = 0.0;
                for y in 2..5 {
                    for x in 1..6 {
                        sum += data[[i, y, x]] * data[[j, y, x]];
                    }
                }
                assert_relative_eq!(m[[i, j]], sum / 15.0, epsilon = 1e-12);
            }
        }
        assert_eq!(m, m.t());
    }

    #[test]
    fn test_degenerate_regions_are_rejected() {
        let stack = constant_stack(&[1.0, 2.0], 10, 10);
        let desc = RegionDescriptor::default();

        let empty = PixelRect { x: 0, y: 0, width: 0, height: 3 };
        assert!(matches!(desc.extract(&stack, &empty), Err(Error::DegenerateRegion(_))));

        let outside = PixelRect { x: 5, y: 5, width: 6, height: 2 };
        assert!(matches!(desc.extract(&stack, &outside), Err(Error::DegenerateRegion(_))));
    }
}
