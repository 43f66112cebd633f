//! Image I/O operations service
//!
//! This module separates file I/O operations from the pipeline logic,
//! making the pipeline testable against in-memory images.

use crate::error::{EcoWatchError, Result};
use image::{DynamicImage, ImageFormat};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Extension-based detection is tried first, then content sniffing, so
    /// mislabeled files still decode.
    ///
    /// # Errors
    /// `EcoWatchError::Decode` if the file is missing, unreadable, or not
    /// a supported raster format.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use ecowatch::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("tile.png")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.is_file() {
            return Err(EcoWatchError::decode(path_ref, "file does not exist"));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                tracing::debug!(
                    path = %path_ref.display(),
                    error = %e,
                    "extension-based decoding failed, trying content-based detection"
                );

                let data = std::fs::read(path_ref)
                    .map_err(|io_err| EcoWatchError::decode(path_ref, io_err.to_string()))?;

                image::load_from_memory(&data).map_err(|content_err| {
                    EcoWatchError::decode(
                        path_ref,
                        format!(
                            "extension error: {e}; content error: {content_err} ({} bytes)",
                            data.len()
                        ),
                    )
                })
            },
        }
    }

    /// Write an image as PNG to a path that must not exist yet
    ///
    /// A partially written file is removed before the error is returned.
    ///
    /// # Errors
    /// `EcoWatchError::IoWrite` if the file already exists, cannot be
    /// created, or encoding fails.
    pub fn write_png_new<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path_ref)
            .map_err(|e| EcoWatchError::io_write(path_ref, e))?;

        if let Err(e) = Self::encode_png(image, file) {
            Self::remove_quietly(path_ref);
            return Err(EcoWatchError::io_write(path_ref, e));
        }

        tracing::trace!(path = %path_ref.display(), "wrote png");
        Ok(())
    }

    /// Write an image as PNG so that `path` only ever holds a complete file
    ///
    /// The image is encoded under a unique temporary name in the same
    /// directory and then moved into place. Concurrent writers of the same
    /// path each publish a complete file; the last rename wins.
    ///
    /// # Errors
    /// `EcoWatchError::IoWrite` if the temporary file cannot be written or
    /// moved into place.
    pub fn write_png_atomic<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let temp_path = Self::temp_sibling(path_ref);

        Self::write_png_new(image, &temp_path)?;

        if let Err(e) = std::fs::rename(&temp_path, path_ref) {
            Self::remove_quietly(&temp_path);
            // Platforms that refuse to replace an existing file: a complete
            // copy is already in place
            if path_ref.is_file() {
                return Ok(());
            }
            return Err(EcoWatchError::io_write(path_ref, e));
        }

        tracing::trace!(path = %path_ref.display(), "published png");
        Ok(())
    }

    fn temp_sibling(path: &Path) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let file_name = path
            .file_name()
            .map_or_else(|| "image".into(), |n| n.to_string_lossy());
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        path.with_file_name(format!(".{file_name}.{}.{unique}.tmp", std::process::id()))
    }

    fn encode_png(image: &DynamicImage, file: File) -> std::io::Result<()> {
        let mut writer = BufWriter::new(file);
        image
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| match e {
                image::ImageError::IoError(io) => io,
                other => std::io::Error::new(std::io::ErrorKind::Other, other),
            })?;
        writer.flush()
    }

    /// Best-effort removal used when unwinding a partially written artifact set
    pub fn remove_quietly<P: AsRef<Path>>(path: P) {
        if let Err(e) = std::fs::remove_file(path.as_ref()) {
            tracing::warn!(
                path = %path.as_ref().display(),
                error = %e,
                "failed to remove partial artifact"
            );
        }
    }
}
