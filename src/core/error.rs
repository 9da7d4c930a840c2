use thiserror::Error;

/// Errors that can occur while building descriptors, training or predicting
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Eigendecomposition failed or its result was unusable
    /// (non-finite input, asymmetric input, non-positive eigenvalue under log)
    #[error("decomposition failed: {0}")]
    Decomposition(String),

    /// Distance name not in the known set
    #[error("unknown distance function: '{0}'")]
    UnknownDistance(String),

    /// Zero-area or out-of-bounds region
    #[error("degenerate region: {0}")]
    DegenerateRegion(String),

    /// Prediction requested before training
    #[error("model has not been trained")]
    UntrainedModel,

    /// Mutation requested after training
    #[error("model has already been trained")]
    AlreadyTrained,

    /// Result outside the domain of a scalar function (e.g. sqrt of a negative)
    #[error("numeric domain error: {0}")]
    NumericDomain(String),

    /// Dimension mismatch
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid parameter value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Too few samples to train or cross-validate
    #[error("not enough samples: need at least {needed}, got {got}")]
    NotEnoughSamples { needed: usize, got: usize },

    /// Numerical error from ndarray-linalg
    #[error("linear algebra error: {0}")]
    LinalgError(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(String),

    /// Model bundle could not be written or read back
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Image could not be decoded
    #[error("image error: {0}")]
    Image(String),
}

/// Convert ndarray-linalg errors to Error
impl From<ndarray_linalg::error::LinalgError> for Error {
    fn from(err: ndarray_linalg::error::LinalgError) -> Self {
        Error::LinalgError(format!("{:?}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

/// Result type for all crate operations
pub type Result<T> = std::result::Result<T, Error>;
