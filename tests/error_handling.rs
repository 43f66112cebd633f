//! Failure paths through the public API
//!
//! Each failure must surface as a typed error tagged with the stage that
//! produced it, and must not leave partial artifacts behind.

use chrono::{TimeZone, Utc};
use ecowatch::{
    AnalysisConfig, ArtifactId, BinaryMask, EcoWatchError, ErrorClass, ForestAnalyzer,
    OverlayConfig, PipelineStage, VisualCompositor,
};
use image::{Rgb, RgbImage};
use ndarray::Array2;
use tempfile::TempDir;

#[test]
fn test_missing_weights_fail_before_side_effects() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let samples = dir.path().join("samples");
    let config = AnalysisConfig::builder()
        .weights_path(dir.path().join("missing.onnx"))
        .output_dir(&out)
        .samples_dir(&samples)
        .build()
        .unwrap();

    // Construction is lazy and succeeds
    let analyzer = ForestAnalyzer::new(config).unwrap();
    let err = analyzer.analyze_coordinates(-3.4653, -62.2159).unwrap_err();

    assert_eq!(err.stage(), Some(PipelineStage::Model));
    assert!(matches!(err.root(), EcoWatchError::ModelNotFound { .. }));
    assert_eq!(err.class(), ErrorClass::ServerConfiguration);
    assert!(err.to_string().contains("model"));
    assert!(!out.exists());
    assert!(!samples.exists());
}

#[test]
fn test_missing_weights_reported_on_every_call() {
    let dir = TempDir::new().unwrap();
    let config = AnalysisConfig::builder()
        .weights_path(dir.path().join("missing.onnx"))
        .output_dir(dir.path().join("out"))
        .build()
        .unwrap();
    let analyzer = ForestAnalyzer::new(config).unwrap();

    for _ in 0..2 {
        let err = analyzer
            .compare_images(&dir.path().join("a.png"), &dir.path().join("b.png"))
            .unwrap_err();
        assert!(matches!(err.root(), EcoWatchError::ModelNotFound { .. }));
    }
}

#[test]
fn test_corrupt_weights_are_a_load_error() {
    let dir = TempDir::new().unwrap();
    let weights = dir.path().join("best_model.onnx");
    std::fs::write(&weights, b"definitely not protobuf").unwrap();
    let config = AnalysisConfig::builder()
        .weights_path(&weights)
        .output_dir(dir.path().join("out"))
        .build()
        .unwrap();
    let analyzer = ForestAnalyzer::new(config).unwrap();

    let err = analyzer.analyze_coordinates(0.0, 0.0).unwrap_err();

    assert_eq!(err.stage(), Some(PipelineStage::Model));
    assert!(matches!(err.root(), EcoWatchError::ModelLoad(_)));
}

#[test]
fn test_invalid_configuration_rejected() {
    assert!(matches!(
        AnalysisConfig::builder().threshold(0.0).build(),
        Err(EcoWatchError::InvalidConfig(_))
    ));
    assert!(matches!(
        AnalysisConfig::builder().input_size(0).build(),
        Err(EcoWatchError::InvalidConfig(_))
    ));
    assert!(matches!(
        AnalysisConfig::builder().overlay([0, 255, 0], 1.5).build(),
        Err(EcoWatchError::InvalidConfig(_))
    ));
}

#[test]
fn test_out_of_range_coordinates_are_client_errors() {
    let dir = TempDir::new().unwrap();
    let config = AnalysisConfig::builder()
        .weights_path(dir.path().join("missing.onnx"))
        .output_dir(dir.path().join("out"))
        .build()
        .unwrap();
    let analyzer = ForestAnalyzer::new(config).unwrap();

    for (lat, lng) in [(91.0, 0.0), (0.0, -180.5), (f64::NAN, 0.0)] {
        let err = analyzer.analyze_coordinates(lat, lng).unwrap_err();
        assert_eq!(err.class(), ErrorClass::ClientInput, "({lat}, {lng})");
    }
}

#[test]
fn test_artifact_collision_leaves_no_partial_set() {
    let dir = TempDir::new().unwrap();
    let compositor = VisualCompositor::new(dir.path(), OverlayConfig::default());
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let id = ArtifactId::for_coordinates(1.0, 2.0, at);

    // Occupy the mask slot, which is written last
    let taken = dir.path().join(id.file_name("mask"));
    std::fs::write(&taken, b"existing").unwrap();

    let image = RgbImage::from_pixel(16, 16, Rgb([10, 200, 10]));
    let mask = BinaryMask::from_cells(Array2::ones((8, 8))).unwrap();
    let err = compositor.compose(&image, &mask, &id).unwrap_err();

    assert!(matches!(err, EcoWatchError::IoWrite { .. }));
    assert_eq!(std::fs::read(&taken).unwrap(), b"existing");
    assert!(!dir.path().join(id.file_name("before")).exists());
    assert!(!dir.path().join(id.file_name("after")).exists());
}

#[test]
fn test_unreadable_image_is_decode_error() {
    let dir = TempDir::new().unwrap();
    let config = AnalysisConfig::builder()
        .weights_path(dir.path().join("missing.onnx"))
        .output_dir(dir.path().join("out"))
        .build()
        .unwrap();
    let analyzer = ForestAnalyzer::with_components(
        config,
        std::sync::Arc::new(ecowatch::StaticModel::new(AlwaysForest)),
        std::sync::Arc::new(ecowatch::DirectorySampleProvider::new(dir.path())),
    )
    .unwrap();

    let err = analyzer
        .analyze_image(&dir.path().join("nowhere.png"), 0.0, 0.0)
        .unwrap_err();

    assert_eq!(err.stage(), Some(PipelineStage::Decode));
    assert!(matches!(err.root(), EcoWatchError::Decode { .. }));
    assert!(!dir.path().join("out").exists());
}

struct AlwaysForest;

impl ecowatch::SegmentationModel for AlwaysForest {
    fn forward(
        &self,
        input: ndarray::ArrayView4<'_, f32>,
    ) -> ecowatch::Result<ndarray::Array4<f32>> {
        let (_, _, h, w) = input.dim();
        Ok(ndarray::Array4::ones((1, 1, h, w)))
    }

    fn info(&self) -> ecowatch::ModelInfo {
        ecowatch::ModelInfo {
            name: "always-forest".to_string(),
            fingerprint: String::new(),
            input_size: 512,
            device: "cpu".to_string(),
        }
    }
}
