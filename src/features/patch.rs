use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Slack allowed on the right/bottom edge of a normalized rectangle
const EDGE_TOLERANCE: f64 = 1e-9;

/// Rectangle in normalized [0, 1] × [0, 1] image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Patch {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Patch { x, y, w, h }
    }

    /// The 5×5 grid of 16-pixel patches with an 8-pixel stride on a 50×50 canvas,
    /// row-major
    pub fn default_grid() -> Vec<Patch> {
        let mut patches = Vec::with_capacity(25);
        for y in 0..5 {
            for x in 0..5 {
                patches.push(Patch::new(
                    (1 + 8 * x) as f64 / 50.0,
                    (1 + 8 * y) as f64 / 50.0,
                    16.0 / 50.0,
                    16.0 / 50.0,
                ));
            }
        }
        patches
    }

    /// Patch from a `[x, y, w, h]` list
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [x, y, w, h] => {
                let patch = Patch::new(*x, *y, *w, *h);
                patch.validate()?;
                Ok(patch)
            }
            _ => Err(Error::InvalidParameter(format!(
                "a patch needs four entries, got {}",
                values.len()
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let values = [self.x, self.y, self.w, self.h];
        let valid = values.iter().all(|v| v.is_finite())
            && self.x >= 0.0
            && self.y >= 0.0
            && self.w > 0.0
            && self.h > 0.0
            && self.x + self.w <= 1.0 + EDGE_TOLERANCE
            && self.y + self.h <= 1.0 + EDGE_TOLERANCE;

        if valid {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "patch {:?} is not a non-empty rectangle inside the unit square",
                self
            )))
        }
    }

    /// Pixel rectangle on a `width × height` canvas
    ///
    /// Both edges are rounded independently and clamped to the canvas, so the
    /// rectangle never leaves it; it may come out empty on a small canvas.
    pub fn to_pixels(&self, width: usize, height: usize) -> PixelRect {
        let span = |start: f64, len: f64, n: usize| {
            let edge = |v: f64| ((v * n as f64).round().max(0.0) as usize).min(n);
            let lo = edge(start);
            (lo, edge(start + len).saturating_sub(lo))
        };
        let (x, width) = span(self.x, self.w, width);
        let (y, height) = span(self.y, self.h, height);
        PixelRect { x, y, width, height }
    }
}

/// Check that every patch covers at least one pixel of the canvas
pub fn check_on_canvas(patches: &[Patch], width: usize, height: usize) -> Result<()> {
    for patch in patches {
        if patch.to_pixels(width, height).area() == 0 {
            return Err(Error::InvalidParameter(format!(
                "patch {:?} covers no pixels on a {}x{} canvas",
                patch, width, height
            )));
        }
    }
    Ok(())
}

impl PixelRect {
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid_geometry() {
        let grid = Patch::default_grid();
        assert_eq!(grid.len(), 25);

        let first = grid[0].to_pixels(50, 50);
        assert_eq!(first, PixelRect { x: 1, y: 1, width: 16, height: 16 });

        // Row-major: index 1 moves along x, index 5 along y
        assert_eq!(grid[1].to_pixels(50, 50).x, 9);
        assert_eq!(grid[5].to_pixels(50, 50).y, 9);

        let last = grid[24].to_pixels(50, 50);
        assert_eq!(last, PixelRect { x: 33, y: 33, width: 16, height: 16 });
        assert!(last.x + last.width <= 50);

        assert!(grid.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_from_slice() {
        assert!(Patch::from_slice(&[0.0, 0.0, 0.5, 0.5]).is_ok());
        assert!(Patch::from_slice(&[0.0, 0.0, 0.5]).is_err());
        assert!(Patch::from_slice(&[0.8, 0.0, 0.5, 0.5]).is_err());
        assert!(Patch::from_slice(&[0.0, 0.0, 0.0, 0.5]).is_err());
    }

    #[test]
    fn test_pixels_stay_inside_the_canvas() {
        let rect = Patch::new(0.45, 0.0, 0.55, 1.0).to_pixels(10, 10);
        assert_eq!(rect, PixelRect { x: 5, y: 0, width: 5, height: 10 });
        assert!(rect.x + rect.width <= 10);

        let rect = Patch::new(0.0, 0.0, 1.0 + 1e-10, 1.0).to_pixels(7, 3);
        assert_eq!(rect, PixelRect { x: 0, y: 0, width: 7, height: 3 });
    }

    #[test]
    fn test_tiny_patches_are_rejected_on_small_canvases() {
        let tiny = [Patch::new(0.5, 0.5, 0.01, 0.01)];
        assert!(matches!(
            check_on_canvas(&tiny, 10, 10),
            Err(Error::InvalidParameter(_))
        ));
        assert!(check_on_canvas(&tiny, 1000, 1000).is_ok());
        assert!(check_on_canvas(&Patch::default_grid(), 50, 50).is_ok());
        assert!(check_on_canvas(&Patch::default_grid(), 0, 50).is_err());
    }
}
