//! Request-scoped orchestration of the segmentation pipeline
//!
//! [`ForestAnalyzer`] is the composition root: it owns the model provider,
//! the sample provider and the compositor, and sequences
//! preprocess, infer, threshold, measure and compose for each call.
//! Every stage failure is returned tagged with its [`PipelineStage`].

use crate::{
    compositor::{ArtifactId, ArtifactPath, VisualCompositor},
    config::AnalysisConfig,
    error::{EcoWatchError, PipelineStage, Result, StageExt},
    inference::{InferenceEngine, SegmentationModel},
    mask::{
        compare_forest_loss, AnalysisStatus, BinaryMask, CoverageStatus, DeforestationLevel,
        ForestMetrics,
    },
    models::{ModelLoader, ModelProvider},
    samples::{validate_coordinates, DirectorySampleProvider, SampleImageProvider},
    services::ImageIOService,
    utils::ImagePreprocessor,
};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Result of analyzing one coordinate
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub status: AnalysisStatus,
    pub lat: f64,
    pub lng: f64,
    pub forest_coverage_percent: f64,
    pub deforestation_percent: f64,
    pub coverage_status: CoverageStatus,
    pub deforestation_level: DeforestationLevel,
    /// Relative artifact names, servable from the output directory
    pub image_before: String,
    pub image_after: String,
    pub mask: String,
    /// Absolute artifact paths for report generation
    pub before_path: PathBuf,
    pub after_path: PathBuf,
    pub mask_path: PathBuf,
    pub original_image_path: PathBuf,
    pub model_fingerprint: String,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisReport {
    #[must_use]
    pub fn metrics(&self) -> ForestMetrics {
        ForestMetrics {
            forest_coverage_percent: self.forest_coverage_percent,
            deforestation_percent: self.deforestation_percent,
        }
    }
}

/// Result of comparing a before/after image pair
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub status: AnalysisStatus,
    pub loss_percent: f64,
    pub before_forest_pixels: usize,
    pub after_forest_pixels: usize,
    pub before_metrics: ForestMetrics,
    pub after_metrics: ForestMetrics,
    pub before_mask: ArtifactPath,
    pub after_mask: ArtifactPath,
    pub before_image_path: PathBuf,
    pub after_image_path: PathBuf,
    pub model_fingerprint: String,
    pub analyzed_at: DateTime<Utc>,
}

/// A decoded image and its mask at tensor resolution
struct Segmentation {
    image: RgbImage,
    mask: BinaryMask,
}

/// Sequences the pipeline for coordinate and image-pair requests
pub struct ForestAnalyzer {
    config: AnalysisConfig,
    models: Arc<dyn ModelProvider>,
    samples: Arc<dyn SampleImageProvider>,
    compositor: VisualCompositor,
}

impl std::fmt::Debug for ForestAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForestAnalyzer")
            .field("config", &self.config)
            .field("compositor", &self.compositor)
            .finish_non_exhaustive()
    }
}

impl ForestAnalyzer {
    /// Analyzer with a lazily loaded Tract model and directory samples
    ///
    /// No weights are read until the first request.
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        let models = Arc::new(ModelLoader::new(
            config.weights_path.clone(),
            config.preprocessing.input_size,
        ));
        let samples = Arc::new(DirectorySampleProvider::new(config.samples_dir.clone()));
        Self::with_components(config, models, samples)
    }

    /// Analyzer with injected model and sample providers
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation
    pub fn with_components(
        config: AnalysisConfig,
        models: Arc<dyn ModelProvider>,
        samples: Arc<dyn SampleImageProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let compositor = VisualCompositor::new(config.output_dir.clone(), config.overlay);
        Ok(Self {
            config,
            models,
            samples,
            compositor,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze the sample image for a coordinate pair
    ///
    /// # Errors
    /// The first failing stage's error, tagged with that stage
    #[instrument(skip(self))]
    pub fn analyze_coordinates(&self, lat: f64, lng: f64) -> Result<AnalysisReport> {
        validate_coordinates(lat, lng).stage(PipelineStage::Sample)?;
        let model = self.models.model().stage(PipelineStage::Model)?;
        let sample = self.samples.sample_for(lat, lng).stage(PipelineStage::Sample)?;
        self.analyze_with(model.as_ref(), &sample, lat, lng)
    }

    /// Analyze a caller-supplied image labeled with a coordinate pair
    ///
    /// # Errors
    /// The first failing stage's error, tagged with that stage
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn analyze_image(&self, path: &Path, lat: f64, lng: f64) -> Result<AnalysisReport> {
        validate_coordinates(lat, lng).stage(PipelineStage::Sample)?;
        let model = self.models.model().stage(PipelineStage::Model)?;
        self.analyze_with(model.as_ref(), path, lat, lng)
    }

    fn analyze_with(
        &self,
        model: &dyn SegmentationModel,
        path: &Path,
        lat: f64,
        lng: f64,
    ) -> Result<AnalysisReport> {
        let Segmentation { image, mask } = self.segment(model, path)?;
        let metrics = mask.metrics().stage(PipelineStage::Mask)?;

        tracing::info!(
            coverage = metrics.forest_coverage_percent,
            deforestation = metrics.deforestation_percent,
            "metrics computed"
        );

        let analyzed_at = Utc::now();
        let id = ArtifactId::for_coordinates(lat, lng, analyzed_at);
        let artifacts = self
            .compositor
            .compose(&image, &mask, &id)
            .stage(PipelineStage::Compose)?;

        Ok(AnalysisReport {
            status: metrics.status(),
            lat,
            lng,
            forest_coverage_percent: metrics.forest_coverage_percent,
            deforestation_percent: metrics.deforestation_percent,
            coverage_status: metrics.coverage_status(),
            deforestation_level: metrics.deforestation_level(),
            image_before: artifacts.before.relative,
            image_after: artifacts.after.relative,
            mask: artifacts.mask.relative,
            before_path: artifacts.before.absolute,
            after_path: artifacts.after.absolute,
            mask_path: artifacts.mask.absolute,
            original_image_path: path.to_path_buf(),
            model_fingerprint: model.info().fingerprint,
            analyzed_at,
        })
    }

    /// Compare forest cover between a before and after image
    ///
    /// Both masks are produced at tensor resolution, so the images may
    /// differ in size. Only the two masks are persisted.
    ///
    /// # Errors
    /// The first failing stage's error, tagged with that stage
    #[instrument(skip(self, before, after), fields(before = %before.display(), after = %after.display()))]
    pub fn compare_images(&self, before: &Path, after: &Path) -> Result<ComparisonReport> {
        let model = self.models.model().stage(PipelineStage::Model)?;

        let before_seg = self.segment(model.as_ref(), before)?;
        let after_seg = self.segment(model.as_ref(), after)?;

        let loss = compare_forest_loss(&before_seg.mask, &after_seg.mask).stage(PipelineStage::Mask)?;
        let before_metrics = before_seg.mask.metrics().stage(PipelineStage::Mask)?;
        let after_metrics = after_seg.mask.metrics().stage(PipelineStage::Mask)?;

        tracing::info!(
            loss_percent = loss.loss_percent,
            before_pixels = loss.before_forest_pixels,
            after_pixels = loss.after_forest_pixels,
            "forest loss computed"
        );

        let analyzed_at = Utc::now();
        let before_id = ArtifactId::for_image(before, analyzed_at);
        let after_id = ArtifactId::for_image(after, analyzed_at);
        let mut masks = self
            .compositor
            .write_masks(&[
                (
                    &before_seg.mask,
                    before_seg.image.dimensions(),
                    before_id.file_name("before_mask"),
                ),
                (
                    &after_seg.mask,
                    after_seg.image.dimensions(),
                    after_id.file_name("after_mask"),
                ),
            ])
            .stage(PipelineStage::Compose)?
            .into_iter();

        let (Some(before_mask), Some(after_mask)) = (masks.next(), masks.next()) else {
            return Err(EcoWatchError::shape_mismatch(2, 0).at_stage(PipelineStage::Compose));
        };

        Ok(ComparisonReport {
            status: loss.status(),
            loss_percent: loss.loss_percent,
            before_forest_pixels: loss.before_forest_pixels,
            after_forest_pixels: loss.after_forest_pixels,
            before_metrics,
            after_metrics,
            before_mask,
            after_mask,
            before_image_path: before.to_path_buf(),
            after_image_path: after.to_path_buf(),
            model_fingerprint: model.info().fingerprint,
            analyzed_at,
        })
    }

    /// Decode, preprocess, infer and threshold one image
    fn segment(&self, model: &dyn SegmentationModel, path: &Path) -> Result<Segmentation> {
        let image = ImageIOService::load_image(path).stage(PipelineStage::Decode)?;
        let tensor = ImagePreprocessor::preprocess(&image, &self.config.preprocessing)
            .stage(PipelineStage::Preprocess)?;
        let probabilities =
            InferenceEngine::probabilities(model, tensor.view()).stage(PipelineStage::Inference)?;
        let mask = BinaryMask::from_probabilities(&probabilities, self.config.threshold);

        tracing::debug!(
            path = %path.display(),
            forest_pixels = mask.forest_count(),
            total_pixels = mask.total(),
            "segmented image"
        );

        Ok(Segmentation {
            image: image.to_rgb8(),
            mask,
        })
    }
}
