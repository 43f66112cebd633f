//! Error types for forest analysis operations

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for forest analysis operations
pub type Result<T> = std::result::Result<T, EcoWatchError>;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Locating or synthesizing the sample image for a coordinate
    Sample,
    /// Resolving and loading the segmentation model
    Model,
    /// Decoding the input image
    Decode,
    /// Resizing and normalizing into a tensor
    Preprocess,
    /// Forward pass
    Inference,
    /// Thresholding and metric computation
    Mask,
    /// Rendering and persisting artifacts
    Compose,
}

impl PipelineStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Model => "model",
            Self::Decode => "decode",
            Self::Preprocess => "preprocess",
            Self::Inference => "inference",
            Self::Mask => "mask",
            Self::Compose => "compose",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the calling layer should present an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or unusable model weights
    ServerConfiguration,
    /// Bad image data or mismatched inputs supplied by the caller
    ClientInput,
    /// Everything else
    Internal,
}

/// Error types for forest analysis operations
#[derive(Error, Debug)]
pub enum EcoWatchError {
    /// Input image could not be read or decoded as RGB
    #[error("Failed to decode image '{}': {message}", path.display())]
    Decode { path: PathBuf, message: String },

    /// Weights file (or checkpoint state file) does not exist
    #[error("Model weights not found at '{}'", path.display())]
    ModelNotFound { path: PathBuf },

    /// Weights exist but could not be applied to the expected architecture
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Two arrays that must agree on shape do not
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Artifact persistence failure
    #[error("Failed to write '{}': {source}", path.display())]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid caller-supplied values (coordinates, paths)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Any of the above, tagged with the stage that produced it
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<EcoWatchError>,
    },
}

impl EcoWatchError {
    /// Create a new decode error for an image path
    pub fn decode<P: Into<PathBuf>, S: Into<String>>(path: P, msg: S) -> Self {
        Self::Decode {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new shape mismatch error
    pub fn shape_mismatch<E: fmt::Debug, A: fmt::Debug>(expected: E, actual: A) -> Self {
        Self::ShapeMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    /// Create a new artifact write error
    pub fn io_write<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Tag this error with the stage it came from.
    ///
    /// Errors that already carry a stage keep their original one.
    #[must_use]
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            tagged @ Self::Stage { .. } => tagged,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was tagged with, if any
    #[must_use]
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The underlying error with any stage tagging removed
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify the error for the calling layer
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self.root() {
            Self::ModelNotFound { .. } | Self::ModelLoad(_) => ErrorClass::ServerConfiguration,
            Self::Decode { .. } | Self::ShapeMismatch { .. } | Self::InvalidInput(_) => {
                ErrorClass::ClientInput
            },
            _ => ErrorClass::Internal,
        }
    }
}

/// Extension for tagging results with a pipeline stage
pub trait StageExt<T> {
    /// Tag the error side of this result with `stage`
    ///
    /// # Errors
    /// Returns the original error wrapped in [`EcoWatchError::Stage`]
    fn stage(self, stage: PipelineStage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: PipelineStage) -> Result<T> {
        self.map_err(|e| e.at_stage(stage))
    }
}
