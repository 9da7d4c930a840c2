use ndarray::{s, Array2, Array3, ArrayView2, Axis};

use crate::core::{Error, Result};
use crate::features::filterbank::{reflect101, FilterBank};
use crate::features::image::Image;

/// Per-pixel feature channels of one image, shape (channels, height, width)
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStack {
    data: Array3<f64>,
}

impl FeatureStack {
    pub fn new(data: Array3<f64>) -> Result<Self> {
        let (channels, height, width) = data.dim();
        if channels == 0 || height == 0 || width == 0 {
            return Err(Error::InvalidParameter(format!(
                "feature stack must be non-empty, got {}x{}x{}",
                channels, height, width
            )));
        }
        Ok(FeatureStack { data })
    }

    /// Build the stack for an image
    ///
    /// Channel order: the image's own channels, the bank's responses on
    /// channel 0, then gradient magnitude and orientation of channel 0.
    pub fn from_image(image: &Image, bank: &FilterBank) -> Result<Self> {
        let base = image.channel(0);
        let responses = bank.filter(base);
        let (magnitude, orientation) = gradient(base);

        let n = image.channels() + responses.len() + 2;
        let mut data = Array3::zeros((n, image.height(), image.width()));
        data.slice_mut(s![..image.channels(), .., ..])
            .assign(image.data());

        let derived = responses.iter().chain([&magnitude, &orientation]);
        for (offset, map) in derived.enumerate() {
            data.index_axis_mut(Axis(0), image.channels() + offset)
                .assign(map);
        }

        FeatureStack::new(data)
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
}

/// Central-difference gradient magnitude and orientation (atan2(dy, dx))
fn gradient(map: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (height, width) = map.dim();
    let at = |y: isize, x: isize| map[[reflect101(y, height), reflect101(x, width)]];

    let mut magnitude = Array2::zeros((height, width));
    let mut orientation = Array2::zeros((height, width));
    for y in 0..height as isize {
        for x in 0..width as isize {
            let dx = 0.5 * (at(y, x + 1) - at(y, x - 1));
            let dy = 0.5 * (at(y + 1, x) - at(y - 1, x));
            magnitude[[y as usize, x as usize]] = dx.hypot(dy);
            orientation[[y as usize, x as usize]] = dy.atan2(dx);
        }
    }
    (magnitude, orientation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_channel_count_and_layout() {
        let img = Image::new(Array3::from_shape_fn((3, 12, 10), |(c, y, x)| {
            (c as f64 + 1.0) * 0.1 + (x as f64) * 0.01 + (y as f64) * 0.02
        }))
        .unwrap();
        let bank = FilterBank::doog();
        let stack = FeatureStack::from_image(&img, &bank).unwrap();

        assert_eq!(stack.channels(), 3 + 8 + 2);
        assert_eq!((stack.height(), stack.width()), (12, 10));
        assert_eq!(
            stack.data().slice(s![..3, .., ..]),
            img.data().view()
        );
    }

    #[test]
    fn test_gradient_of_a_ramp() {
        let ramp = Array2::from_shape_fn((5, 5), |(_, x)| 2.0 * x as f64);
        let (magnitude, orientation) = gradient(ramp.view());
        assert_relative_eq!(magnitude[[2, 2]], 2.0, epsilon = 1e-12);
        assert_relative_eq!(orientation[[2, 2]], 0.0, epsilon = 1e-12);
    }
}
