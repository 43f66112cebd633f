//! Inference backends for segmentation models
//!
//! Tract is the only runtime: pure Rust, CPU execution, no external
//! libraries to install.

pub mod tract;

// Mock models for unit tests
#[cfg(test)]
pub mod test_utils;

pub use self::tract::TractSegmentationModel;
