//! Sample image lookup for coordinate analyses

use crate::{
    error::{EcoWatchError, Result},
    services::ImageIOService,
};
use image::{DynamicImage, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const SAMPLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
const PLACEHOLDER_SIZE: u32 = 512;
const PLACEHOLDER_CELL: u32 = 32;

/// Finds (or makes) a readable image for a coordinate pair
pub trait SampleImageProvider: Send + Sync {
    /// Return a path to a readable image for `(lat, lng)`
    ///
    /// # Errors
    /// - `InvalidInput` for out-of-range coordinates
    /// - `IoWrite` if a placeholder cannot be written
    fn sample_for(&self, lat: f64, lng: f64) -> Result<PathBuf>;
}

/// Check that a coordinate pair is finite and on the globe
///
/// # Errors
/// `InvalidInput` otherwise
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(EcoWatchError::invalid_input(format!("latitude {lat} outside [-90, 90]")));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(EcoWatchError::invalid_input(format!("longitude {lng} outside [-180, 180]")));
    }
    Ok(())
}

/// Looks for `{lat}_{lng}.{png,jpg,jpeg}` in a directory
///
/// When no sample exists a deterministic placeholder tile is written next
/// to the samples and reused on later calls.
#[derive(Debug, Clone)]
pub struct DirectorySampleProvider {
    dir: PathBuf,
}

impl DirectorySampleProvider {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(lat: f64, lng: f64) -> String {
        format!("{lat:.4}_{lng:.4}")
    }

    /// Patchwork of forest and cleared cells seeded by the coordinates
    fn placeholder(lat: f64, lng: f64) -> RgbImage {
        let seed = Sha256::digest(Self::stem(lat, lng).as_bytes());
        let cells_per_row = PLACEHOLDER_SIZE / PLACEHOLDER_CELL;

        RgbImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, y| {
            let cell = (y / PLACEHOLDER_CELL) * cells_per_row + x / PLACEHOLDER_CELL;
            let byte = seed[(cell as usize / 8) % seed.len()];
            if (byte >> (cell % 8)) & 1 == 1 {
                Rgb([34, 110, 40])
            } else {
                Rgb([150, 120, 80])
            }
        })
    }
}

impl SampleImageProvider for DirectorySampleProvider {
    fn sample_for(&self, lat: f64, lng: f64) -> Result<PathBuf> {
        validate_coordinates(lat, lng)?;
        let stem = Self::stem(lat, lng);

        for ext in SAMPLE_EXTENSIONS {
            let candidate = self.dir.join(format!("{stem}.{ext}"));
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "using sample image");
                return Ok(candidate);
            }
        }

        let placeholder = self.dir.join(format!("{stem}_placeholder.png"));
        if placeholder.is_file() {
            return Ok(placeholder);
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| EcoWatchError::io_write(&self.dir, e))?;
        let image = DynamicImage::ImageRgb8(Self::placeholder(lat, lng));
        // Concurrent requests for one coordinate each publish the same
        // complete tile
        ImageIOService::write_png_atomic(&image, &placeholder)?;
        tracing::info!(path = %placeholder.display(), "no sample found, wrote placeholder");
        Ok(placeholder)
    }
}
