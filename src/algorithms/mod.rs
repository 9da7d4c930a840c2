pub mod classifier;
pub mod crossval;
pub mod ensemble;
pub mod patch_model;

pub use classifier::LeastSquaresSvm;
pub use ensemble::Warco;
pub use patch_model::PatchModel;
