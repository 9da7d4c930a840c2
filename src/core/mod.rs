pub mod error;
pub mod traits;

pub use error::{Error, Result};
pub use traits::{argmax, softmax, KernelClassifier};
