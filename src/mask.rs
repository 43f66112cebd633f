//! Binary forest masks and the metrics derived from them

use crate::{
    error::{EcoWatchError, Result},
    inference::ProbabilityMap,
};
use image::{GrayImage, Luma};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Per-pixel forest classification, `1` = forest, `0` = not forest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask(Array2<u8>);

impl BinaryMask {
    /// Threshold a probability map: `p >= threshold` is forest
    #[must_use]
    pub fn from_probabilities(map: &ProbabilityMap, threshold: f32) -> Self {
        Self(map.values().mapv(|p| u8::from(p >= threshold)))
    }

    /// Build a mask from a `(height, width)` array of 0/1 cells
    ///
    /// # Errors
    /// `InvalidInput` if any cell is neither 0 nor 1
    pub fn from_cells(cells: Array2<u8>) -> Result<Self> {
        if cells.iter().any(|c| *c > 1) {
            return Err(EcoWatchError::invalid_input("mask cells must be 0 or 1"));
        }
        Ok(Self(cells))
    }

    #[must_use]
    pub fn cells(&self) -> &Array2<u8> {
        &self.0
    }

    /// `(height, width)`
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.0.len()
    }

    /// Number of forest cells
    #[must_use]
    pub fn forest_count(&self) -> usize {
        self.0.iter().filter(|c| **c == 1).count()
    }

    /// Nearest-neighbor resize to `width` x `height`
    ///
    /// Destination cell `(y, x)` copies source cell
    /// `(floor(y * src_h / height), floor(x * src_w / width))`, so edges stay
    /// hard and every output cell is exactly one input cell.
    ///
    /// # Errors
    /// `ShapeMismatch` if either mask or target has a zero dimension
    pub fn resize_nearest(&self, width: u32, height: u32) -> Result<Self> {
        let (src_h, src_w) = self.dim();
        let (dst_h, dst_w) = (height as usize, width as usize);
        if src_h == 0 || src_w == 0 || dst_h == 0 || dst_w == 0 {
            return Err(EcoWatchError::shape_mismatch(
                "non-empty mask and target",
                ((src_h, src_w), (dst_h, dst_w)),
            ));
        }
        if (src_h, src_w) == (dst_h, dst_w) {
            return Ok(self.clone());
        }

        #[allow(clippy::indexing_slicing)]
        // Safe: y * src_h / dst_h < src_h for y < dst_h
        let resized = Array2::from_shape_fn((dst_h, dst_w), |(y, x)| {
            self.0[[y * src_h / dst_h, x * src_w / dst_w]]
        });
        Ok(Self(resized))
    }

    /// Render as grayscale, forest white (255) and the rest black (0)
    #[must_use]
    pub fn to_luma_image(&self) -> GrayImage {
        let (h, w) = self.dim();
        GrayImage::from_fn(w as u32, h as u32, |x, y| {
            Luma([self.0[[y as usize, x as usize]] * 255])
        })
    }

    /// Coverage metrics for this mask
    ///
    /// # Errors
    /// `ShapeMismatch` for an empty mask
    pub fn metrics(&self) -> Result<ForestMetrics> {
        ForestMetrics::from_counts(self.forest_count(), self.total())
    }
}

/// Complementary coverage/deforestation percentages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestMetrics {
    pub forest_coverage_percent: f64,
    pub deforestation_percent: f64,
}

impl ForestMetrics {
    /// Metrics from a forest-cell count out of `total` cells
    ///
    /// Coverage is rounded to two decimals and deforestation is
    /// `100 - coverage`, rounded the same way.
    ///
    /// # Errors
    /// `ShapeMismatch` if `total` is zero or smaller than `forest`
    pub fn from_counts(forest: usize, total: usize) -> Result<Self> {
        if total == 0 || forest > total {
            return Err(EcoWatchError::shape_mismatch(
                "non-empty mask",
                (forest, total),
            ));
        }

        let coverage = round2(100.0 * forest as f64 / total as f64);
        Ok(Self {
            forest_coverage_percent: coverage,
            deforestation_percent: round2(100.0 - coverage),
        })
    }

    #[must_use]
    pub fn coverage_status(&self) -> CoverageStatus {
        CoverageStatus::from_coverage(self.forest_coverage_percent)
    }

    #[must_use]
    pub fn deforestation_level(&self) -> DeforestationLevel {
        DeforestationLevel::from_deforestation(self.deforestation_percent)
    }

    /// Overall status for a single analysis
    #[must_use]
    pub fn status(&self) -> AnalysisStatus {
        AnalysisStatus::from_deforestation(self.deforestation_percent)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Label for how much forest remains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverageStatus {
    Healthy,
    Moderate,
    Critical,
}

impl CoverageStatus {
    #[must_use]
    pub fn from_coverage(coverage_percent: f64) -> Self {
        if coverage_percent > 70.0 {
            Self::Healthy
        } else if coverage_percent > 40.0 {
            Self::Moderate
        } else {
            Self::Critical
        }
    }
}

/// Label for how much forest was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeforestationLevel {
    Low,
    Moderate,
    High,
}

impl DeforestationLevel {
    #[must_use]
    pub fn from_deforestation(deforestation_percent: f64) -> Self {
        if deforestation_percent < 30.0 {
            Self::Low
        } else if deforestation_percent < 60.0 {
            Self::Moderate
        } else {
            Self::High
        }
    }
}

/// Overall status attached to analysis results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Healthy,
    Moderate,
    Critical,
}

impl AnalysisStatus {
    /// Status of a single image from its deforested share
    #[must_use]
    pub fn from_deforestation(deforestation_percent: f64) -> Self {
        if deforestation_percent > 60.0 {
            Self::Critical
        } else if deforestation_percent > 30.0 {
            Self::Moderate
        } else {
            Self::Healthy
        }
    }
}

/// Relative forest loss between two masks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossComparison {
    pub loss_percent: f64,
    pub before_forest_pixels: usize,
    pub after_forest_pixels: usize,
}

impl LossComparison {
    /// Status of an image pair from the share of baseline forest lost
    ///
    /// More than 60% of the baseline gone is critical, more than 30%
    /// moderate. A pair with no baseline forest is healthy.
    #[must_use]
    pub fn status(&self) -> AnalysisStatus {
        if self.loss_percent > 60.0 {
            AnalysisStatus::Critical
        } else if self.loss_percent > 30.0 {
            AnalysisStatus::Moderate
        } else {
            AnalysisStatus::Healthy
        }
    }
}

/// Compare forest cells between a before and after mask
///
/// `loss = 100 * max(0, before - after) / before`, and `0` when the
/// before mask has no forest at all.
///
/// # Errors
/// `ShapeMismatch` if the masks differ in shape
pub fn compare_forest_loss(before: &BinaryMask, after: &BinaryMask) -> Result<LossComparison> {
    if before.dim() != after.dim() {
        return Err(EcoWatchError::shape_mismatch(before.dim(), after.dim()));
    }

    let before_count = before.forest_count();
    let after_count = after.forest_count();

    let loss_percent = if before_count == 0 {
        0.0
    } else {
        100.0 * before_count.saturating_sub(after_count) as f64 / before_count as f64
    };

    Ok(LossComparison {
        loss_percent,
        before_forest_pixels: before_count,
        after_forest_pixels: after_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn mask(cells: Array2<u8>) -> BinaryMask {
        BinaryMask::from_cells(cells).unwrap()
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let map = ProbabilityMap::new(array![[0.49, 0.5], [0.51, 1.0]]);
        let m = BinaryMask::from_probabilities(&map, 0.5);
        assert_eq!(m.cells(), &array![[0u8, 1], [1, 1]]);
    }

    #[test]
    fn test_metrics_degenerate_masks() {
        let zeros = mask(Array2::zeros((4, 4)));
        let metrics = zeros.metrics().unwrap();
        assert!((metrics.forest_coverage_percent - 0.0).abs() < f64::EPSILON);
        assert!((metrics.deforestation_percent - 100.0).abs() < f64::EPSILON);

        let ones = mask(Array2::ones((4, 4)));
        let metrics = ones.metrics().unwrap();
        assert!((metrics.forest_coverage_percent - 100.0).abs() < f64::EPSILON);
        assert!((metrics.deforestation_percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_rounding_keeps_sum() {
        // 1 of 3 cells: 33.333...
        let m = mask(array![[1u8, 0, 0]]);
        let metrics = m.metrics().unwrap();
        assert!((metrics.forest_coverage_percent - 33.33).abs() < 1e-9);
        assert!((metrics.deforestation_percent - 66.67).abs() < 1e-9);
        let sum = metrics.forest_coverage_percent + metrics.deforestation_percent;
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_mask_metrics_fail() {
        let m = mask(Array2::zeros((0, 0)));
        assert!(matches!(
            m.metrics(),
            Err(EcoWatchError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_from_cells_rejects_non_binary() {
        assert!(BinaryMask::from_cells(array![[0u8, 2]]).is_err());
    }

    #[test]
    fn test_compare_zero_baseline() {
        let before = mask(Array2::zeros((3, 3)));
        let after = mask(Array2::ones((3, 3)));
        let cmp = compare_forest_loss(&before, &after).unwrap();
        assert!((cmp.loss_percent - 0.0).abs() < f64::EPSILON);
        assert_eq!(cmp.after_forest_pixels, 9);
    }

    #[test]
    fn test_compare_gain_is_not_negative() {
        let before = mask(array![[1u8, 0], [0, 0]]);
        let after = mask(array![[1u8, 1], [1, 0]]);
        let cmp = compare_forest_loss(&before, &after).unwrap();
        assert!((cmp.loss_percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compare_partial_loss() {
        let before = mask(array![[1u8, 1], [1, 1]]);
        let after = mask(array![[1u8, 0], [0, 0]]);
        let cmp = compare_forest_loss(&before, &after).unwrap();
        assert!((cmp.loss_percent - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_compare_shape_mismatch() {
        let before = mask(Array2::ones((2, 2)));
        let after = mask(Array2::ones((2, 3)));
        assert!(matches!(
            compare_forest_loss(&before, &after),
            Err(EcoWatchError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_loss_status_bands() {
        let loss = |loss_percent| LossComparison {
            loss_percent,
            before_forest_pixels: 100,
            after_forest_pixels: 0,
        };
        assert_eq!(loss(0.0).status(), AnalysisStatus::Healthy);
        assert_eq!(loss(30.0).status(), AnalysisStatus::Healthy);
        assert_eq!(loss(30.5).status(), AnalysisStatus::Moderate);
        assert_eq!(loss(75.0).status(), AnalysisStatus::Critical);
    }

    #[test]
    fn test_resize_nearest_upscale() {
        let m = mask(array![[1u8, 0], [0, 1]]);
        let up = m.resize_nearest(4, 4).unwrap();
        assert_eq!(
            up.cells(),
            &array![[1u8, 1, 0, 0], [1, 1, 0, 0], [0, 0, 1, 1], [0, 0, 1, 1]]
        );
    }

    #[test]
    fn test_resize_nearest_non_uniform() {
        let m = mask(array![[1u8, 0]]);
        let up = m.resize_nearest(3, 2).unwrap();
        // x=0 -> 0, x=1 -> 0, x=2 -> 1
        assert_eq!(up.cells(), &array![[1u8, 1, 0], [1, 1, 0]]);
    }

    #[test]
    fn test_resize_to_zero_fails() {
        let m = mask(Array2::ones((2, 2)));
        assert!(m.resize_nearest(0, 4).is_err());
    }

    #[test]
    fn test_luma_rendering() {
        let m = mask(array![[1u8, 0, 1]]);
        let img = m.to_luma_image();
        assert_eq!(img.dimensions(), (3, 1));
        assert_eq!(img.get_pixel(0, 0)[0], 255);
        assert_eq!(img.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(CoverageStatus::from_coverage(70.5), CoverageStatus::Healthy);
        assert_eq!(CoverageStatus::from_coverage(70.0), CoverageStatus::Moderate);
        assert_eq!(CoverageStatus::from_coverage(40.0), CoverageStatus::Critical);
        assert_eq!(DeforestationLevel::from_deforestation(29.9), DeforestationLevel::Low);
        assert_eq!(DeforestationLevel::from_deforestation(30.0), DeforestationLevel::Moderate);
        assert_eq!(DeforestationLevel::from_deforestation(60.0), DeforestationLevel::High);
        assert_eq!(AnalysisStatus::from_deforestation(60.0), AnalysisStatus::Moderate);
        assert_eq!(AnalysisStatus::from_deforestation(60.1), AnalysisStatus::Critical);
        assert_eq!(AnalysisStatus::from_deforestation(30.0), AnalysisStatus::Healthy);
    }
}
