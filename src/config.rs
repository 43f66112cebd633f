//! Configuration types and builders for forest analysis

use crate::error::{EcoWatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the weights location
pub const WEIGHTS_ENV: &str = "FORESTRY_MODEL_WEIGHTS";
/// Environment variable overriding the artifact output directory
pub const OUTPUT_DIR_ENV: &str = "ECOWATCH_OUTPUT_DIR";
/// Environment variable overriding the sample image directory
pub const SAMPLES_DIR_ENV: &str = "ECOWATCH_SAMPLES_DIR";

pub const DEFAULT_WEIGHTS_PATH: &str = "ai_engine/output/best_model.onnx";
pub const DEFAULT_OUTPUT_DIR: &str = "ai_engine/output";
pub const DEFAULT_SAMPLES_DIR: &str = "ai_engine/data/inference";

/// ImageNet channel means used during training
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations used during training
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Tensor preprocessing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square side length of the model input
    pub input_size: u32,
    /// Per-channel normalization mean (RGB)
    pub mean: [f32; 3],
    /// Per-channel normalization standard deviation (RGB)
    pub std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            input_size: 512,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// Restored-image overlay parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Tint blended over forested pixels (RGB)
    pub tint: [u8; 3],
    /// Weight of the original pixel in the blend; the tint gets the rest
    pub original_weight: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            tint: [34, 139, 34],
            original_weight: 0.3,
        }
    }
}

/// Configuration for the analysis pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Weights file or checkpoint directory
    pub weights_path: PathBuf,
    /// Directory receiving before/after/mask artifacts
    pub output_dir: PathBuf,
    /// Directory searched for coordinate sample images
    pub samples_dir: PathBuf,
    /// Probability at or above which a pixel counts as forest
    pub threshold: f32,
    pub preprocessing: PreprocessingConfig,
    pub overlay: OverlayConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from(DEFAULT_WEIGHTS_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            samples_dir: PathBuf::from(DEFAULT_SAMPLES_DIR),
            threshold: 0.5,
            preprocessing: PreprocessingConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use ecowatch::AnalysisConfig;
    ///
    /// let config = AnalysisConfig::builder()
    ///     .weights_path("models/forest.onnx")
    ///     .threshold(0.6)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.preprocessing.input_size, 512);
    /// ```
    #[must_use]
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Defaults with overrides taken from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides taken from `lookup`.
    ///
    /// Empty values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);

        let mut config = Self::default();
        if let Some(path) = get(WEIGHTS_ENV) {
            config.weights_path = path;
        }
        if let Some(path) = get(OUTPUT_DIR_ENV) {
            config.output_dir = path;
        }
        if let Some(path) = get(SAMPLES_DIR_ENV) {
            config.samples_dir = path;
        }
        config
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero input size
    /// - Threshold outside `(0, 1]`
    /// - Non-positive normalization std
    /// - Overlay weight outside `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if self.preprocessing.input_size == 0 {
            return Err(EcoWatchError::invalid_config("input size must be positive"));
        }

        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(EcoWatchError::invalid_config(format!(
                "threshold {} outside (0, 1]",
                self.threshold
            )));
        }

        if self.preprocessing.std.iter().any(|s| !(*s > 0.0)) {
            return Err(EcoWatchError::invalid_config(
                "normalization std entries must be positive",
            ));
        }

        if !(0.0..=1.0).contains(&self.overlay.original_weight) {
            return Err(EcoWatchError::invalid_config(format!(
                "overlay weight {} outside [0, 1]",
                self.overlay.original_weight
            )));
        }

        Ok(())
    }
}

/// Builder for `AnalysisConfig`
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    /// Start from an existing configuration (e.g. one read from the environment)
    #[must_use]
    pub fn from_config(config: AnalysisConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn weights_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.weights_path = path.into();
        self
    }

    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn samples_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.samples_dir = dir.into();
        self
    }

    #[must_use]
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.config.threshold = threshold;
        self
    }

    #[must_use]
    pub fn input_size(mut self, size: u32) -> Self {
        self.config.preprocessing.input_size = size;
        self
    }

    #[must_use]
    pub fn normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.config.preprocessing.mean = mean;
        self.config.preprocessing.std = std;
        self
    }

    #[must_use]
    pub fn overlay(mut self, tint: [u8; 3], original_weight: f32) -> Self {
        self.config.overlay = OverlayConfig {
            tint,
            original_weight,
        };
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Any violation reported by [`AnalysisConfig::validate`]
    pub fn build(self) -> Result<AnalysisConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
