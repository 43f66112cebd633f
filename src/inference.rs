//! Segmentation model abstraction and the inference engine

use crate::error::{EcoWatchError, Result};
use instant::Instant;
use ndarray::{Array2, Array4, ArrayView4, Axis};

/// A loaded binary segmentation network
///
/// Implementations must be usable from several threads at once: `forward`
/// takes `&self` and may not mutate learned parameters.
pub trait SegmentationModel: Send + Sync {
    /// Run a forward pass over a `(1, 3, H, W)` tensor
    ///
    /// Returns per-pixel forest probabilities shaped `(1, 1, H, W)`.
    ///
    /// # Errors
    /// - Tensor shape not accepted by the network
    /// - Backend execution failures
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>>;

    /// Static description of the loaded model
    fn info(&self) -> ModelInfo;
}

/// Description of a loaded model
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModelInfo {
    pub name: String,
    /// Hex SHA-256 of the weights the model was built from
    pub fingerprint: String,
    /// Square input side length
    pub input_size: usize,
    /// Device the forward pass runs on
    pub device: String,
}

/// Per-pixel forest probabilities at tensor resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityMap(Array2<f32>);

impl ProbabilityMap {
    /// Wrap a `(H, W)` probability array
    #[must_use]
    pub fn new(values: Array2<f32>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &Array2<f32> {
        &self.0
    }

    /// `(height, width)`
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }
}

/// Runs a shared model over preprocessed tensors
pub struct InferenceEngine;

impl InferenceEngine {
    /// Produce the probability map for one preprocessed tensor
    ///
    /// # Errors
    /// - `InvalidInput` if the tensor is not `(1, 3, H, W)`
    /// - `ShapeMismatch` if the model output is not `(1, 1, H, W)`
    /// - `Inference` on backend failures or non-finite output
    pub fn probabilities(
        model: &dyn SegmentationModel,
        tensor: ArrayView4<'_, f32>,
    ) -> Result<ProbabilityMap> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 3 {
            return Err(EcoWatchError::invalid_input(format!(
                "expected a (1, 3, H, W) tensor, got {:?}",
                tensor.shape()
            )));
        }

        let start = Instant::now();
        let output = model.forward(tensor)?;

        if output.dim() != (1, 1, height, width) {
            return Err(EcoWatchError::shape_mismatch(
                (1, 1, height, width),
                output.dim(),
            ));
        }

        if output.iter().any(|p| !p.is_finite()) {
            return Err(EcoWatchError::inference("model produced non-finite output"));
        }

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis(),
            height,
            width,
            "inference completed"
        );

        let map = output
            .index_axis_move(Axis(0), 0)
            .index_axis_move(Axis(0), 0);
        Ok(ProbabilityMap(map))
    }
}
