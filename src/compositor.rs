//! Before/after/mask artifact rendering and persistence

use crate::{
    config::OverlayConfig,
    error::{EcoWatchError, Result},
    mask::BinaryMask,
    services::ImageIOService,
};
use chrono::{DateTime, Utc};
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Location of one persisted artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPath {
    /// File name relative to the output directory
    pub relative: String,
    pub absolute: PathBuf,
}

/// The three images written for one coordinate analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub before: ArtifactPath,
    pub after: ArtifactPath,
    pub mask: ArtifactPath,
}

/// Unique prefix for the files of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// `{lat}_{lng}_{millis}` with coordinates at four decimals
    #[must_use]
    pub fn for_coordinates(lat: f64, lng: f64, at: DateTime<Utc>) -> Self {
        Self(format!("{lat:.4}_{lng:.4}_{}", at.timestamp_millis()))
    }

    /// `{stem}_{millis}` for artifacts derived from an input file
    #[must_use]
    pub fn for_image(path: &Path, at: DateTime<Utc>) -> Self {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map_or_else(|| "image".to_string(), sanitize);
        Self(format!("{stem}_{}", at.timestamp_millis()))
    }

    #[must_use]
    pub fn file_name(&self, kind: &str) -> String {
        format!("{}_{kind}.png", self.0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn sanitize(stem: &str) -> String {
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// Renders artifacts and writes them to the output directory
#[derive(Debug, Clone)]
pub struct VisualCompositor {
    output_dir: PathBuf,
    overlay: OverlayConfig,
}

impl VisualCompositor {
    pub fn new<P: Into<PathBuf>>(output_dir: P, overlay: OverlayConfig) -> Self {
        Self {
            output_dir: output_dir.into(),
            overlay,
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Blend the tint over forest pixels of `image`
    ///
    /// `mask` must already match the image resolution.
    ///
    /// # Errors
    /// `ShapeMismatch` if it does not
    pub fn restore(image: &RgbImage, mask: &BinaryMask, overlay: &OverlayConfig) -> Result<RgbImage> {
        let (width, height) = image.dimensions();
        if mask.dim() != (height as usize, width as usize) {
            return Err(EcoWatchError::shape_mismatch(
                (height, width),
                mask.dim(),
            ));
        }

        let w = overlay.original_weight;
        let blend = |orig: u8, tint: u8| -> u8 {
            (w * f32::from(orig) + (1.0 - w) * f32::from(tint))
                .round()
                .clamp(0.0, 255.0) as u8
        };

        let cells = mask.cells();
        let mut restored = image.clone();
        for (x, y, pixel) in restored.enumerate_pixels_mut() {
            if cells[[y as usize, x as usize]] == 1 {
                let [r, g, b] = pixel.0;
                *pixel = Rgb([
                    blend(r, overlay.tint[0]),
                    blend(g, overlay.tint[1]),
                    blend(b, overlay.tint[2]),
                ]);
            }
        }
        Ok(restored)
    }

    /// Render and persist the before/after/mask set for one image
    ///
    /// The mask is resized with nearest-neighbor sampling to the image
    /// resolution when needed. Either all three files are written or none
    /// remain.
    ///
    /// # Errors
    /// - `ShapeMismatch` for an empty image or mask
    /// - `IoWrite` if the directory or any file cannot be created
    pub fn compose(&self, image: &RgbImage, mask: &BinaryMask, id: &ArtifactId) -> Result<ArtifactSet> {
        let (width, height) = image.dimensions();
        let mask = mask.resize_nearest(width, height)?;
        let restored = Self::restore(image, &mask, &self.overlay)?;

        let written = self.write_all(&[
            (DynamicImage::ImageRgb8(restored), id.file_name("before")),
            (DynamicImage::ImageRgb8(image.clone()), id.file_name("after")),
            (DynamicImage::ImageLuma8(mask.to_luma_image()), id.file_name("mask")),
        ])?;
        let [before, after, mask]: [ArtifactPath; 3] = written
            .try_into()
            .map_err(|w: Vec<ArtifactPath>| EcoWatchError::shape_mismatch(3, w.len()))?;

        tracing::info!(
            before = %before.absolute.display(),
            after = %after.absolute.display(),
            mask = %mask.absolute.display(),
            "artifacts written"
        );
        Ok(ArtifactSet { before, after, mask })
    }

    /// Persist several masks, each resized to its paired resolution
    ///
    /// # Errors
    /// Same as [`Self::compose`]
    pub fn write_masks(&self, masks: &[(&BinaryMask, (u32, u32), String)]) -> Result<Vec<ArtifactPath>> {
        let images = masks
            .iter()
            .map(|(mask, (width, height), name)| {
                let resized = mask.resize_nearest(*width, *height)?;
                Ok((DynamicImage::ImageLuma8(resized.to_luma_image()), name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.write_all(&images)
    }

    fn write_all(&self, images: &[(DynamicImage, String)]) -> Result<Vec<ArtifactPath>> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| EcoWatchError::io_write(&self.output_dir, e))?;

        let dir = std::fs::canonicalize(&self.output_dir)
            .map_err(|e| EcoWatchError::io_write(&self.output_dir, e))?;

        let mut written: Vec<ArtifactPath> = Vec::with_capacity(images.len());
        for (image, name) in images {
            let absolute = dir.join(name);
            if let Err(e) = ImageIOService::write_png_new(image, &absolute) {
                for done in &written {
                    ImageIOService::remove_quietly(&done.absolute);
                }
                return Err(e);
            }
            written.push(ArtifactPath {
                relative: name.clone(),
                absolute,
            });
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::{array, Array2};
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn test_artifact_naming() {
        let id = ArtifactId::for_coordinates(-3.46532, -62.21551, fixed_time());
        assert_eq!(id.file_name("mask"), "-3.4653_-62.2155_1700000000123_mask.png");

        let id = ArtifactId::for_image(Path::new("/data/tile 2019.png"), fixed_time());
        assert_eq!(id.file_name("before_mask"), "tile_2019_1700000000123_before_mask.png");
    }

    #[test]
    fn test_restore_blends_only_forest() {
        let image = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        let mask = BinaryMask::from_cells(array![[1u8, 0]]).unwrap();

        let restored = VisualCompositor::restore(&image, &mask, &OverlayConfig::default()).unwrap();

        // 0.3 * 100 + 0.7 * (34, 139, 34)
        assert_eq!(restored.get_pixel(0, 0), &Rgb([54, 127, 54]));
        assert_eq!(restored.get_pixel(1, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_restore_shape_mismatch() {
        let image = RgbImage::new(4, 4);
        let mask = BinaryMask::from_cells(Array2::ones((2, 2))).unwrap();
        assert!(VisualCompositor::restore(&image, &mask, &OverlayConfig::default()).is_err());
    }

    #[test]
    fn test_compose_writes_three_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested/output");
        let compositor = VisualCompositor::new(&out, OverlayConfig::default());
        let image = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        let mask = BinaryMask::from_cells(Array2::ones((4, 4))).unwrap();
        let id = ArtifactId::for_coordinates(1.0, 2.0, fixed_time());

        let set = compositor.compose(&image, &mask, &id).unwrap();

        for artifact in [&set.before, &set.after, &set.mask] {
            assert!(artifact.absolute.is_file());
            assert!(artifact.absolute.ends_with(&artifact.relative));
        }
        let after = image::open(&set.after.absolute).unwrap().to_rgb8();
        assert_eq!(after, image);
        let mask_img = image::open(&set.mask.absolute).unwrap().to_luma8();
        assert_eq!(mask_img.dimensions(), (8, 6));
        assert!(mask_img.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_compose_collision_leaves_no_partial_set() {
        let dir = TempDir::new().unwrap();
        let compositor = VisualCompositor::new(dir.path(), OverlayConfig::default());
        let image = RgbImage::new(4, 4);
        let mask = BinaryMask::from_cells(Array2::zeros((4, 4))).unwrap();
        let id = ArtifactId::for_coordinates(5.0, 5.0, fixed_time());

        // Occupy the mask name so the third write collides
        let blocker = dir.path().join(id.file_name("mask"));
        std::fs::write(&blocker, b"occupied").unwrap();

        let err = compositor.compose(&image, &mask, &id).unwrap_err();

        assert!(matches!(err, EcoWatchError::IoWrite { .. }));
        assert!(!dir.path().join(id.file_name("before")).exists());
        assert!(!dir.path().join(id.file_name("after")).exists());
        assert_eq!(std::fs::read(&blocker).unwrap(), b"occupied");
    }

    #[test]
    fn test_write_masks_resizes_each() {
        let dir = TempDir::new().unwrap();
        let compositor = VisualCompositor::new(dir.path(), OverlayConfig::default());
        let a = BinaryMask::from_cells(array![[1u8, 0], [0, 1]]).unwrap();
        let b = BinaryMask::from_cells(array![[0u8, 0], [0, 0]]).unwrap();

        let paths = compositor
            .write_masks(&[
                (&a, (4, 2), "a_mask.png".to_string()),
                (&b, (3, 3), "b_mask.png".to_string()),
            ])
            .unwrap();

        assert_eq!(paths.len(), 2);
        let a_img = image::open(&paths[0].absolute).unwrap().to_luma8();
        assert_eq!(a_img.dimensions(), (4, 2));
        assert_eq!(a_img.get_pixel(1, 0)[0], 255);
        assert_eq!(a_img.get_pixel(2, 0)[0], 0);
    }
}
