//! Weights file inspection
//!
//! A weights location is read once and classified into a [`Checkpoint`]:
//!
//! - a raw serialized ONNX graph (`RawModel`), or
//! - a JSON envelope pointing at the learned state plus optional training
//!   metadata (`WithState`):
//!
//! ```json
//! {
//!   "model_state_dict": "best_model_state.onnx",
//!   "metadata": { "arch": "deeplabv3plus-resnet50", "epoch": 40, "classes": 1 }
//! }
//! ```
//!
//! Directories are accepted too: `checkpoint.json` inside is an envelope,
//! `model.onnx` inside is a raw graph.

use crate::error::{EcoWatchError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Envelope file name looked up inside a checkpoint directory
pub const ENVELOPE_FILE_NAME: &str = "checkpoint.json";
/// Raw graph file name looked up inside a checkpoint directory
pub const RAW_MODEL_FILE_NAME: &str = "model.onnx";

/// How raw network outputs map to probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// The network emits logits
    #[default]
    Sigmoid,
    /// The network already emits probabilities
    Identity,
}

/// Training metadata stored alongside the state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<usize>,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(alias = "state_dict")]
    model_state_dict: PathBuf,
    #[serde(default)]
    metadata: Option<CheckpointMetadata>,
}

/// A loaded weights file, classified once at load time
#[derive(Debug, Clone)]
pub enum Checkpoint {
    /// Serialized graph with its parameters embedded
    RawModel { graph: Vec<u8>, source: PathBuf },
    /// State referenced by an envelope, with optional metadata
    WithState {
        state: Vec<u8>,
        /// The state file, not the envelope
        source: PathBuf,
        metadata: Option<CheckpointMetadata>,
    },
}

impl Checkpoint {
    /// Read and classify the weights at `path`
    ///
    /// # Errors
    /// - `ModelNotFound` if `path` (or the state file it references) is missing
    /// - `ModelLoad` if the envelope is malformed or the file is unreadable
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = Self::resolve_file(path)?;

        let bytes = std::fs::read(&file).map_err(|e| {
            EcoWatchError::model_load(format!("failed to read '{}': {e}", file.display()))
        })?;

        if !Self::looks_like_envelope(&bytes) {
            tracing::debug!(path = %file.display(), "weights are a raw model graph");
            return Ok(Self::RawModel {
                graph: bytes,
                source: file,
            });
        }

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| {
            EcoWatchError::model_load(format!(
                "malformed checkpoint envelope '{}': {e}",
                file.display()
            ))
        })?;

        let state_path = file
            .parent()
            .map_or_else(|| envelope.model_state_dict.clone(), |dir| dir.join(&envelope.model_state_dict));
        if !state_path.is_file() {
            return Err(EcoWatchError::ModelNotFound { path: state_path });
        }

        let state = std::fs::read(&state_path).map_err(|e| {
            EcoWatchError::model_load(format!(
                "failed to read state '{}': {e}",
                state_path.display()
            ))
        })?;

        tracing::debug!(
            envelope = %file.display(),
            state = %state_path.display(),
            has_metadata = envelope.metadata.is_some(),
            "weights are a checkpoint with state"
        );

        Ok(Self::WithState {
            state,
            source: state_path,
            metadata: envelope.metadata,
        })
    }

    fn resolve_file(path: &Path) -> Result<PathBuf> {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }

        if path.is_dir() {
            for name in [ENVELOPE_FILE_NAME, RAW_MODEL_FILE_NAME] {
                let candidate = path.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        Err(EcoWatchError::ModelNotFound {
            path: path.to_path_buf(),
        })
    }

    fn looks_like_envelope(bytes: &[u8]) -> bool {
        bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{')
    }

    /// Serialized graph bytes to hand to the backend
    #[must_use]
    pub fn graph_bytes(&self) -> &[u8] {
        match self {
            Self::RawModel { graph, .. } => graph,
            Self::WithState { state, .. } => state,
        }
    }

    /// File the graph bytes were read from
    #[must_use]
    pub fn source(&self) -> &Path {
        match self {
            Self::RawModel { source, .. } | Self::WithState { source, .. } => source,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&CheckpointMetadata> {
        match self {
            Self::RawModel { .. } => None,
            Self::WithState { metadata, .. } => metadata.as_ref(),
        }
    }

    #[must_use]
    pub fn activation(&self) -> Activation {
        self.metadata().map(|m| m.activation).unwrap_or_default()
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RawModel { .. } => "raw_model",
            Self::WithState { .. } => "checkpoint_with_state",
        }
    }

    /// Hex SHA-256 of the graph bytes
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.graph_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Summary of this checkpoint without building a model
    #[must_use]
    pub fn describe(&self) -> CheckpointInfo {
        CheckpointInfo {
            kind: self.kind().to_string(),
            size_bytes: self.graph_bytes().len(),
            fingerprint: self.fingerprint(),
            metadata: self.metadata().cloned(),
        }
    }
}

/// Serializable summary of a checkpoint
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointInfo {
    pub kind: String,
    pub size_bytes: usize,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CheckpointMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_path_is_model_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Checkpoint::read(dir.path().join("best_model.onnx")).unwrap_err();
        assert!(matches!(err, EcoWatchError::ModelNotFound { .. }));
    }

    #[test]
    fn test_binary_file_is_raw_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, [0x08u8, 0x07, 0x12, 0x04]).unwrap();

        let checkpoint = Checkpoint::read(&path).unwrap();
        assert!(matches!(checkpoint, Checkpoint::RawModel { .. }));
        assert_eq!(checkpoint.graph_bytes(), &[0x08, 0x07, 0x12, 0x04]);
        assert_eq!(checkpoint.source(), path.as_path());
        assert_eq!(checkpoint.activation(), Activation::Sigmoid);
    }

    #[test]
    fn test_envelope_with_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("state.onnx"), [1u8, 2, 3]).unwrap();
        std::fs::write(
            dir.path().join(ENVELOPE_FILE_NAME),
            r#"  {"model_state_dict": "state.onnx",
                 "metadata": {"arch": "deeplabv3plus", "epoch": 12, "activation": "identity"}}"#,
        )
        .unwrap();

        let checkpoint = Checkpoint::read(dir.path()).unwrap();
        let Checkpoint::WithState {
            state,
            source,
            metadata,
        } = &checkpoint
        else {
            panic!("expected checkpoint with state, got {}", checkpoint.kind());
        };
        assert_eq!(state, &[1, 2, 3]);
        assert_eq!(source, &dir.path().join("state.onnx"));
        let metadata = metadata.as_ref().unwrap();
        assert_eq!(metadata.epoch, Some(12));
        assert_eq!(checkpoint.activation(), Activation::Identity);
    }

    #[test]
    fn test_state_dict_alias_without_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("s.onnx"), [9u8]).unwrap();
        let envelope = dir.path().join("ckpt.json");
        std::fs::write(&envelope, r#"{"state_dict": "s.onnx"}"#).unwrap();

        let checkpoint = Checkpoint::read(&envelope).unwrap();
        assert!(matches!(
            checkpoint,
            Checkpoint::WithState { metadata: None, .. }
        ));
    }

    #[test]
    fn test_envelope_with_missing_state() {
        let dir = TempDir::new().unwrap();
        let envelope = dir.path().join("ckpt.json");
        std::fs::write(&envelope, r#"{"model_state_dict": "gone.onnx"}"#).unwrap();

        let err = Checkpoint::read(&envelope).unwrap_err();
        assert!(matches!(err, EcoWatchError::ModelNotFound { .. }));
    }

    #[test]
    fn test_malformed_envelope_is_model_load() {
        let dir = TempDir::new().unwrap();
        let envelope = dir.path().join("ckpt.json");
        std::fs::write(&envelope, r#"{"weights": 3}"#).unwrap();

        let err = Checkpoint::read(&envelope).unwrap_err();
        assert!(matches!(err, EcoWatchError::ModelLoad(_)));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let checkpoint = Checkpoint::RawModel {
            graph: b"abc".to_vec(),
            source: PathBuf::from("abc.onnx"),
        };
        assert_eq!(
            checkpoint.fingerprint(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(checkpoint.describe().size_bytes, 3);
    }
}
