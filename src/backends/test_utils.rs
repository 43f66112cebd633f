//! Mock segmentation models for unit tests
//!
//! These stand in for a real network so the pipeline can be exercised
//! without weights files.

use crate::{
    config::IMAGENET_MEAN,
    config::IMAGENET_STD,
    error::{EcoWatchError, Result},
    inference::{ModelInfo, SegmentationModel},
};
use ndarray::{Array4, ArrayView4};
use std::sync::atomic::{AtomicUsize, Ordering};

fn mock_info(name: &str, input_size: usize) -> ModelInfo {
    ModelInfo {
        name: name.to_string(),
        fingerprint: format!("mock-{name}"),
        input_size,
        device: "cpu".to_string(),
    }
}

/// Outputs the same probability everywhere
#[derive(Debug)]
pub struct ConstantModel {
    probability: f32,
    calls: AtomicUsize,
}

impl ConstantModel {
    #[must_use]
    pub fn new(probability: f32) -> Self {
        Self {
            probability,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationModel for ConstantModel {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_, _, h, w) = input.dim();
        Ok(Array4::from_elem((1, 1, h, w), self.probability))
    }

    fn info(&self) -> ModelInfo {
        mock_info("constant", 512)
    }
}

/// Treats the de-normalized green channel as the forest probability
#[derive(Debug, Default)]
pub struct GreenChannelModel;

impl SegmentationModel for GreenChannelModel {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (_, _, h, w) = input.dim();
        Ok(Array4::from_shape_fn((1, 1, h, w), |(_, _, y, x)| {
            input[[0, 1, y, x]] * IMAGENET_STD[1] + IMAGENET_MEAN[1]
        }))
    }

    fn info(&self) -> ModelInfo {
        mock_info("green-channel", 512)
    }
}

/// Always fails the forward pass
#[derive(Debug, Default)]
pub struct FailingModel;

impl SegmentationModel for FailingModel {
    fn forward(&self, _input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        Err(EcoWatchError::inference("Mock inference failure"))
    }

    fn info(&self) -> ModelInfo {
        mock_info("failing", 512)
    }
}

/// Returns an output half the input resolution
#[derive(Debug, Default)]
pub struct ShapeShiftModel;

impl SegmentationModel for ShapeShiftModel {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (_, _, h, w) = input.dim();
        Ok(Array4::zeros((1, 1, h / 2, w / 2)))
    }

    fn info(&self) -> ModelInfo {
        mock_info("shape-shift", 512)
    }
}
