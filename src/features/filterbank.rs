use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Ordered set of 2D correlation kernels
///
/// Every kernel has odd height and width and is anchored at its center.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterBank {
    kernels: Vec<Array2<f64>>,
}

impl FilterBank {
    pub fn new(kernels: Vec<Array2<f64>>) -> Result<Self> {
        let mut bank = FilterBank::default();
        for kernel in kernels {
            bank.add_filter(kernel)?;
        }
        Ok(bank)
    }

    /// Difference-of-offset-Gaussians bank (8 kernels)
    ///
    /// For each of σ = 0.5 and σ = 1.0 on a 3×3 Gaussian: vertical second
    /// difference at offset 2, vertical first difference at offset 1, then the
    /// same two horizontally.
    pub fn doog() -> Self {
        let mut kernels = Vec::with_capacity(8);
        for sigma in [0.5, 1.0] {
            let g = gaussian3(sigma);
            let second: [(isize, f64); 3] = [(2, 1.0), (0, -2.0), (-2, 1.0)];
            let first: [(isize, f64); 2] = [(-1, 1.0), (1, -1.0)];
            kernels.push(offset_sum(&g, &second, true));
            kernels.push(offset_sum(&g, &first, true));
            kernels.push(offset_sum(&g, &second, false));
            kernels.push(offset_sum(&g, &first, false));
        }
        FilterBank { kernels }
    }

    pub fn add_filter(&mut self, kernel: Array2<f64>) -> Result<()> {
        let (rows, cols) = kernel.dim();
        if rows % 2 == 0 || cols % 2 == 0 {
            return Err(Error::InvalidParameter(format!(
                "filter kernels must have odd dimensions, got {}x{}",
                rows, cols
            )));
        }
        if kernel.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter(
                "filter kernel contains non-finite values".to_string(),
            ));
        }
        self.kernels.push(kernel);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn kernels(&self) -> &[Array2<f64>] {
        &self.kernels
    }

    /// One same-size response per kernel, in bank order
    pub fn filter(&self, map: ArrayView2<f64>) -> Vec<Array2<f64>> {
        self.kernels.iter().map(|k| correlate(map, k)).collect()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let bank: FilterBank = serde_json::from_reader(reader)?;
        // Re-validate what came from disk.
        FilterBank::new(bank.kernels)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }
}

/// Reflect-101 border index (`dcb|abcd|cba`)
pub(crate) fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Same-size correlation with reflect-101 borders
fn correlate(map: ArrayView2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    let (height, width) = map.dim();
    let (kh, kw) = kernel.dim();
    let (ry, rx) = ((kh / 2) as isize, (kw / 2) as isize);

    Array2::from_shape_fn((height, width), |(y, x)| {
        let mut acc = 0.0;
        for ((u, v), &k) in kernel.indexed_iter() {
            if k == 0.0 {
                continue;
            }
            let sy = reflect101(y as isize + u as isize - ry, height);
            let sx = reflect101(x as isize + v as isize - rx, width);
            acc += k * map[[sy, sx]];
        }
        acc
    })
}

/// Normalised 3×3 Gaussian
fn gaussian3(sigma: f64) -> Array2<f64> {
    let weights = Array1::from(
        [-1.0_f64, 0.0, 1.0]
            .iter()
            .map(|x| (-x * x / (2.0 * sigma * sigma)).exp())
            .collect::<Vec<_>>(),
    );
    let weights = &weights / weights.sum();
    Array2::from_shape_fn((3, 3), |(i, j)| weights[i] * weights[j])
}

/// Σ_s w_s · (g shifted by o_s), along rows if `vertical`, else along columns
fn offset_sum(g: &Array2<f64>, stencil: &[(isize, f64)], vertical: bool) -> Array2<f64> {
    let reach = stencil.iter().map(|(o, _)| o.unsigned_abs()).max().unwrap_or(0);
    let (gh, gw) = g.dim();
    let (kh, kw) = if vertical {
        (gh + 2 * reach, gw)
    } else {
        (gh, gw + 2 * reach)
    };

    let mut kernel = Array2::zeros((kh, kw));
    for &(offset, weight) in stencil {
        for ((u, v), &gv) in g.indexed_iter() {
            let (ku, kv) = if vertical {
                ((u as isize + reach as isize + offset) as usize, v)
            } else {
                (u, (v as isize + reach as isize + offset) as usize)
            };
            kernel[[ku, kv]] += weight * gv;
        }
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;
    use tempfile::tempdir;

    #[test]
    fn test_reflect101() {
        let idx: Vec<usize> = (-3..7).map(|i| reflect101(i, 4)).collect();
        assert_eq!(idx, vec![3, 2, 1, 0, 1, 2, 3, 2, 1, 0]);
        assert_eq!(reflect101(-5, 1), 0);
    }

    #[test]
    fn test_identity_kernel_returns_input() {
        let bank = FilterBank::new(vec![arr2(&[[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]])])
            .unwrap();
        let map = Array2::from_shape_fn((5, 6), |(y, x)| (y * 6 + x) as f64);
        let out = bank.filter(map.view());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], map);
    }

    #[test]
    fn test_rejects_even_kernels() {
        assert!(FilterBank::new(vec![Array2::zeros((2, 3))]).is_err());
    }

    #[test]
    fn test_doog_shape_and_zero_response_on_flat_input() {
        let bank = FilterBank::doog();
        assert_eq!(bank.len(), 8);
        for k in bank.kernels() {
            // Every kernel is a derivative: weights sum to zero
            assert_relative_eq!(k.sum(), 0.0, epsilon = 1e-12);
        }

        let flat = Array2::from_elem((10, 10), 0.7);
        for response in bank.filter(flat.view()) {
            for v in response.iter() {
                assert_relative_eq!(*v, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_vertical_first_difference_sees_horizontal_edges_only() {
        let bank = FilterBank::doog();
        let rows = Array2::from_shape_fn((9, 9), |(y, _)| y as f64);
        let responses = bank.filter(rows.view());
        // kernel 1 is the vertical first difference, kernel 3 its horizontal twin
        assert!(responses[1][[4, 4]].abs() > 0.5);
        assert_relative_eq!(responses[3][[4, 4]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bank.json");
        let bank = FilterBank::doog();
        bank.save(&path).unwrap();
        let restored = FilterBank::load(&path).unwrap();
        assert_eq!(restored, bank);
    }
}
