#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # EcoWatch Forest Analysis Library
//!
//! Deforestation detection from satellite imagery. A pretrained binary
//! segmentation network (DeepLabV3+ exported to ONNX) classifies every
//! pixel as forest or not forest; the resulting mask is turned into
//! coverage and deforestation percentages and rendered into before, after
//! and mask artifacts.
//!
//! ## Pipeline
//!
//! 1. **Preprocess**: stretch to 512x512, ImageNet-normalize into NCHW `f32`
//! 2. **Infer**: run the cached model (Tract, pure Rust, CPU)
//! 3. **Threshold**: `p >= 0.5` is forest
//! 4. **Measure**: `coverage = 100 * forest / total`, `deforestation = 100 - coverage`
//! 5. **Compose**: tint forest in a "restored" copy, write before/after/mask PNGs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ecowatch::{AnalysisConfig, ForestAnalyzer};
//!
//! # fn example() -> ecowatch::Result<()> {
//! // Weights from FORESTRY_MODEL_WEIGHTS, else ai_engine/output/best_model.onnx
//! let config = AnalysisConfig::from_env();
//! let analyzer = ForestAnalyzer::new(config)?;
//!
//! let report = analyzer.analyze_coordinates(-3.4653, -62.2159)?;
//! println!(
//!     "coverage {:.2}% / deforestation {:.2}% -> {}",
//!     report.forest_coverage_percent,
//!     report.deforestation_percent,
//!     report.mask_path.display()
//! );
//!
//! let comparison = analyzer.compare_images("2015.png".as_ref(), "2023.png".as_ref())?;
//! println!("forest loss {:.2}%", comparison.loss_percent);
//! # Ok(())
//! # }
//! ```
//!
//! ## Weights
//!
//! The weights path may point at a raw ONNX graph or at a JSON checkpoint
//! envelope referencing the state graph plus training metadata; see
//! [`checkpoint`]. Graphs exported from data-parallel training (parameter
//! names prefixed with `module.`) are accepted as well.
//!
//! ## Feature Flags
//!
//! - `cli` (default): `ecowatch` binary and tracing subscriber setup
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod analysis;
pub mod backends;
pub mod checkpoint;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod inference;
pub mod mask;
pub mod models;
pub mod samples;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod utils;

// Public API exports
pub use analysis::{AnalysisReport, ComparisonReport, ForestAnalyzer};
pub use backends::TractSegmentationModel;
pub use checkpoint::{Activation, Checkpoint, CheckpointInfo, CheckpointMetadata};
pub use compositor::{ArtifactId, ArtifactPath, ArtifactSet, VisualCompositor};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, OverlayConfig, PreprocessingConfig};
pub use error::{EcoWatchError, ErrorClass, PipelineStage, Result};
pub use inference::{InferenceEngine, ModelInfo, ProbabilityMap, SegmentationModel};
pub use mask::{
    compare_forest_loss, AnalysisStatus, BinaryMask, CoverageStatus, DeforestationLevel,
    ForestMetrics, LossComparison,
};
pub use models::{inspect_weights, load_tract_model, LoadStrategy, ModelLoader, ModelProvider, StaticModel};
pub use samples::{DirectorySampleProvider, SampleImageProvider};
pub use services::ImageIOService;
pub use utils::ImagePreprocessor;

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
