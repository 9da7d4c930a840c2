use std::path::Path;

use image::DynamicImage;
use ndarray::{Array2, Array3, ArrayView2, Axis};

use crate::core::{Error, Result};

/// Multi-channel float image, stored as (channels, height, width)
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array3<f64>,
}

impl Image {
    pub fn new(data: Array3<f64>) -> Result<Self> {
        let (channels, height, width) = data.dim();
        if channels == 0 || height == 0 || width == 0 {
            return Err(Error::InvalidParameter(format!(
                "image must be non-empty, got {}x{}x{}",
                channels, height, width
            )));
        }
        Ok(Image { data })
    }

    /// Single-channel image from a 2D map
    pub fn from_gray(map: Array2<f64>) -> Result<Self> {
        Image::new(map.insert_axis(Axis(0)))
    }

    /// Load an image from disk; grayscale files give one channel, everything
    /// else three RGB channels, all in [0, 1]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let img = image::open(path)?;
        Image::from_dynamic_image(&img)
    }

    /// Convert a decoded image to normalised channels
    pub fn from_dynamic_image(img: &DynamicImage) -> Result<Self> {
        if !img.color().has_color() {
            let luma = img.to_luma8();
            let (width, height) = luma.dimensions();
            let map = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                luma.get_pixel(x as u32, y as u32)[0] as f64 / 255.0
            });
            return Image::from_gray(map);
        }

        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let data = Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f64 / 255.0
        });
        Image::new(data)
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn channel(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    /// Bilinear resize with half-pixel centers
    pub fn resized(&self, width: usize, height: usize) -> Result<Image> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter(format!(
                "cannot resize to {}x{}",
                width, height
            )));
        }
        if width == self.width() && height == self.height() {
            return Ok(self.clone());
        }

        let xs = sample_positions(self.width(), width);
        let ys = sample_positions(self.height(), height);

        let data = Array3::from_shape_fn((self.channels(), height, width), |(c, y, x)| {
            let (y0, y1, fy) = ys[y];
            let (x0, x1, fx) = xs[x];
            let top = self.data[[c, y0, x0]] * (1.0 - fx) + self.data[[c, y0, x1]] * fx;
            let bottom = self.data[[c, y1, x0]] * (1.0 - fx) + self.data[[c, y1, x1]] * fx;
            top * (1.0 - fy) + bottom * fy
        });

        Image::new(data)
    }
}

/// Source neighbours and blend factor for every destination index
fn sample_positions(src: usize, dst: usize) -> Vec<(usize, usize, f64)> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|i| {
            let pos = ((i as f64 + 0.5) * scale - 0.5).clamp(0.0, (src - 1) as f64);
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(src - 1);
            (lo, hi, pos - lo as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_empty_image() {
        assert!(Image::new(Array3::zeros((3, 0, 4))).is_err());
    }

    #[test]
    fn test_resize_to_same_size_is_identity() {
        let img = Image::new(Array3::from_shape_fn((2, 4, 5), |(c, y, x)| (c + y * x) as f64)).unwrap();
        assert_eq!(img.resized(5, 4).unwrap(), img);
    }

    #[test]
    fn test_resize_keeps_constant_images_constant() {
        let img = Image::new(Array3::from_elem((3, 7, 9), 0.25)).unwrap();
        let resized = img.resized(50, 50).unwrap();
        assert_eq!(resized.width(), 50);
        assert_eq!(resized.height(), 50);
        for v in resized.data().iter() {
            assert_relative_eq!(*v, 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_downscale_by_two_averages_pairs() {
        let map = Array2::from_shape_fn((2, 4), |(_, x)| x as f64);
        let img = Image::from_gray(map).unwrap();
        let half = img.resized(2, 1).unwrap();
        assert_relative_eq!(half.data()[[0, 0, 0]], 0.5, epsilon = 1e-12);
        assert_relative_eq!(half.data()[[0, 0, 1]], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_grayscale_decodes_to_one_channel() {
        let gray = image::GrayImage::from_fn(3, 2, |x, _| image::Luma([(x * 51) as u8]));
        let img = Image::from_dynamic_image(&DynamicImage::ImageLuma8(gray)).unwrap();
        assert_eq!(img.channels(), 1);
        assert_eq!((img.height(), img.width()), (2, 3));
        assert_relative_eq!(img.data()[[0, 1, 2]], 0.4, epsilon = 1e-12);

        let rgb = image::RgbImage::from_pixel(3, 2, image::Rgb([255, 0, 51]));
        let img = Image::from_dynamic_image(&DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!(img.channels(), 3);
        assert_relative_eq!(img.data()[[2, 0, 0]], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_file_is_an_image_error() {
        let result = Image::from_file("/definitely/not/here.png");
        assert!(matches!(result, Err(Error::Image(_))));
    }
}
