pub mod descriptor;
pub mod filterbank;
pub mod image;
pub mod patch;
pub mod stack;

pub use descriptor::{DescriptorKind, RegionDescriptor};
pub use filterbank::FilterBank;
pub use image::Image;
pub use patch::{Patch, PixelRect};
pub use stack::FeatureStack;
