//! Image to tensor preprocessing
//!
//! Every inference call goes through the same transform: convert to RGB,
//! stretch to a square `input_size` canvas with a bilinear filter, then
//! normalize per channel into an NCHW `f32` tensor. There is no aspect
//! ratio padding and no randomness, so the same image always yields the
//! same tensor.

use crate::{
    config::PreprocessingConfig,
    error::{EcoWatchError, Result},
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image for model inference
    ///
    /// # Arguments
    /// * `image` - Decoded image of any resolution
    /// * `config` - Input size and normalization constants
    ///
    /// # Returns
    /// * `Ok(tensor)` - `(1, 3, input_size, input_size)` tensor
    /// * `Err(EcoWatchError)` - Empty image or unusable configuration
    pub fn preprocess(image: &DynamicImage, config: &PreprocessingConfig) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EcoWatchError::invalid_input(format!(
                "cannot preprocess an empty {}x{} image",
                image.width(),
                image.height()
            )));
        }
        if config.input_size == 0 {
            return Err(EcoWatchError::invalid_config("input size must be positive"));
        }

        let rgb = image.to_rgb8();
        let resized = image::imageops::resize(
            &rgb,
            config.input_size,
            config.input_size,
            FilterType::Triangle,
        );

        tracing::trace!(
            from = ?rgb.dimensions(),
            to = config.input_size,
            "resized image for inference"
        );

        Ok(Self::canvas_to_tensor(&resized, config))
    }

    /// Convert a square canvas to a normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for c in 0..3 {
                    tensor[[0, c, y, x]] =
                        (f32::from(pixel[c]) / 255.0 - config.mean[c]) / config.std[c];
                }
            }
        }

        tensor
    }
}
