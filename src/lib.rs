pub mod algorithms;
pub mod config;
pub mod core;
pub mod features;
pub mod manifolds;

// Flat re-exports for convenience
pub use core::{Error, KernelClassifier, Result};

// Re-export geometry
pub use manifolds::{Distance, eig_fn, inv_sqrtm, logm};

// Re-export feature extraction
pub use features::{DescriptorKind, FeatureStack, FilterBank, Image, Patch, RegionDescriptor};

// Re-export learning types
pub use algorithms::crossval::{cross_val_accuracy, select_regularization};
pub use algorithms::{LeastSquaresSvm, PatchModel, Warco};

pub use config::{DatasetConfig, Split};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::algorithms::{LeastSquaresSvm, PatchModel, Warco};
    pub use crate::config::{DatasetConfig, Split};
    pub use crate::core::{Error, KernelClassifier, Result};
    pub use crate::features::{FilterBank, Image, Patch, RegionDescriptor};
    pub use crate::manifolds::Distance;
}
