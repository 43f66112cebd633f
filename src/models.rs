//! Model resolution, loading strategies, and the process-lifetime cache
//!
//! A [`ModelLoader`] is built once by the composition root and handed to
//! the analyzer. The first request reads the weights, classifies them as a
//! [`Checkpoint`], and walks an ordered list of [`LoadStrategy`] values
//! until one yields a model of the expected architecture. The result is
//! cached for the loader's lifetime; it is never reloaded.

use crate::{
    backends::TractSegmentationModel,
    checkpoint::{Checkpoint, CheckpointInfo},
    error::{EcoWatchError, Result},
    inference::{ModelInfo, SegmentationModel},
};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of a ready segmentation model
pub trait ModelProvider: Send + Sync {
    /// Return the shared model, loading it on first use
    ///
    /// # Errors
    /// - `ModelNotFound` when the weights are missing
    /// - `ModelLoad` when no strategy can build the expected architecture
    fn model(&self) -> Result<Arc<dyn SegmentationModel>>;
}

/// One way of turning checkpoint bytes into a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Use the graph exactly as stored
    AsSaved,
    /// Drop `module.` prefixes left by data-parallel training first
    StripParallelPrefix,
}

impl LoadStrategy {
    /// Strategies in the order they are attempted
    pub const ORDERED: [Self; 2] = [Self::AsSaved, Self::StripParallelPrefix];

    fn apply(
        self,
        checkpoint: &Checkpoint,
        input_size: usize,
        info: &ModelInfo,
    ) -> Result<TractSegmentationModel> {
        let mut proto = TractSegmentationModel::parse(checkpoint.graph_bytes())?;

        if self == Self::StripParallelPrefix {
            let renamed = TractSegmentationModel::strip_parallel_prefix(&mut proto);
            if renamed == 0 {
                return Err(EcoWatchError::model_load("no parallel-training prefixes present"));
            }
            tracing::debug!(renamed, "stripped parallel-training prefixes");
        }

        TractSegmentationModel::from_proto(&proto, input_size, checkpoint.activation(), info.clone())
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AsSaved => f.write_str("as-saved"),
            Self::StripParallelPrefix => f.write_str("strip-parallel-prefix"),
        }
    }
}

type ModelBuilder = dyn Fn() -> Result<Arc<dyn SegmentationModel>> + Send + Sync;

/// Lazily loads and caches the segmentation model
pub struct ModelLoader {
    weights_path: PathBuf,
    builder: Box<ModelBuilder>,
    cached: Mutex<Option<Arc<dyn SegmentationModel>>>,
}

impl fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLoader")
            .field("weights_path", &self.weights_path)
            .field("loaded", &self.cached.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl ModelLoader {
    /// Loader for Tract models built from the weights at `weights_path`
    pub fn new<P: Into<PathBuf>>(weights_path: P, input_size: u32) -> Self {
        let weights_path = weights_path.into();
        let path = weights_path.clone();
        let input_size = input_size as usize;
        Self::with_builder(weights_path, move || {
            let model = load_tract_model(&path, input_size)?;
            Ok(Arc::new(model) as Arc<dyn SegmentationModel>)
        })
    }

    /// Loader with a custom build step
    ///
    /// The build step runs at most once per successful load.
    pub fn with_builder<P, F>(weights_path: P, builder: F) -> Self
    where
        P: Into<PathBuf>,
        F: Fn() -> Result<Arc<dyn SegmentationModel>> + Send + Sync + 'static,
    {
        Self {
            weights_path: weights_path.into(),
            builder: Box::new(builder),
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cached.lock().is_some()
    }
}

impl ModelProvider for ModelLoader {
    fn model(&self) -> Result<Arc<dyn SegmentationModel>> {
        let mut slot = self.cached.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let model = (self.builder)()?;
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }
}

/// Provider that hands out an already constructed model
pub struct StaticModel(Arc<dyn SegmentationModel>);

impl StaticModel {
    pub fn new<M: SegmentationModel + 'static>(model: M) -> Self {
        Self(Arc::new(model))
    }

    #[must_use]
    pub fn from_arc(model: Arc<dyn SegmentationModel>) -> Self {
        Self(model)
    }
}

impl ModelProvider for StaticModel {
    fn model(&self) -> Result<Arc<dyn SegmentationModel>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Read the weights at `path` and build a Tract model
///
/// # Errors
/// - `ModelNotFound` if the weights are missing
/// - `ModelLoad` if metadata disagrees with `input_size` or every strategy fails
pub fn load_tract_model(path: &Path, input_size: usize) -> Result<TractSegmentationModel> {
    tracing::info!(path = %path.display(), "🚀 Loading forest segmentation model");

    let checkpoint = Checkpoint::read(path)?;
    check_metadata(&checkpoint, input_size)?;

    let info = ModelInfo {
        name: model_name(&checkpoint),
        fingerprint: checkpoint.fingerprint(),
        input_size,
        device: TractSegmentationModel::DEVICE.to_string(),
    };

    tracing::info!(
        kind = checkpoint.kind(),
        size_bytes = checkpoint.graph_bytes().len(),
        fingerprint = %info.fingerprint,
        device = %info.device,
        "weights resolved"
    );

    let mut failures = Vec::new();
    for strategy in LoadStrategy::ORDERED {
        match strategy.apply(&checkpoint, input_size, &info) {
            Ok(model) => {
                tracing::info!(%strategy, "model loaded");
                return Ok(model);
            },
            Err(e) => {
                tracing::debug!(%strategy, error = %e, "load strategy failed");
                failures.push(format!("{strategy}: {e}"));
            },
        }
    }

    Err(EcoWatchError::model_load(format!(
        "no load strategy succeeded for '{}' ({})",
        path.display(),
        failures.join("; ")
    )))
}

/// Describe the weights at `path` without building a model
///
/// # Errors
/// Same as [`Checkpoint::read`]
pub fn inspect_weights(path: &Path) -> Result<CheckpointInfo> {
    Ok(Checkpoint::read(path)?.describe())
}

fn check_metadata(checkpoint: &Checkpoint, input_size: usize) -> Result<()> {
    let Some(metadata) = checkpoint.metadata() else {
        return Ok(());
    };

    if let Some(classes) = metadata.classes {
        if classes != 1 {
            return Err(EcoWatchError::model_load(format!(
                "checkpoint was trained for {classes} classes, expected 1"
            )));
        }
    }

    if let Some(size) = metadata.input_size {
        if size as usize != input_size {
            return Err(EcoWatchError::model_load(format!(
                "checkpoint expects {size}px inputs, configured for {input_size}px"
            )));
        }
    }

    Ok(())
}

fn model_name(checkpoint: &Checkpoint) -> String {
    checkpoint
        .metadata()
        .and_then(|m| m.arch.clone())
        .or_else(|| {
            checkpoint
                .source()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "forest-segmentation".to_string())
}
