//! Tract backend for forest segmentation models
//!
//! Tract is a pure Rust ONNX runtime. A built plan is immutable and
//! `run(&self)` allocates its own execution state per call, so one model can
//! serve concurrent forward passes without locking.

use crate::{
    checkpoint::Activation,
    error::{EcoWatchError, Result},
    inference::{ModelInfo, SegmentationModel},
};
use instant::Instant;
use ndarray::{Array4, ArrayView4, Ix4};
use std::collections::HashSet;
use tract_onnx::pb::ModelProto;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Key prefix left on parameter names by data-parallel training wrappers
pub const PARALLEL_PREFIX: &str = "module.";

/// Segmentation model executed by Tract on the CPU
#[derive(Debug)]
pub struct TractSegmentationModel {
    model: TractModel,
    activation: Activation,
    info: ModelInfo,
}

impl TractSegmentationModel {
    /// Name of the only device Tract executes on
    pub const DEVICE: &'static str = "cpu";

    /// Decode serialized ONNX bytes into an editable protobuf graph
    ///
    /// # Errors
    /// `ModelLoad` if the bytes are not a valid ONNX model
    pub fn parse(graph: &[u8]) -> Result<ModelProto> {
        onnx()
            .proto_model_for_read(&mut std::io::Cursor::new(graph))
            .map_err(|e| EcoWatchError::model_load(format!("Failed to parse ONNX graph: {e}")))
    }

    /// Build a runnable model from a protobuf graph
    ///
    /// The input is pinned to `f32 [1, 3, S, S]` and the optimized graph must
    /// produce a single-class 4-D output.
    ///
    /// # Errors
    /// `ModelLoad` if the graph cannot be typed, optimized, or does not
    /// match the expected architecture
    pub fn from_proto(
        proto: &ModelProto,
        input_size: usize,
        activation: Activation,
        mut info: ModelInfo,
    ) -> Result<Self> {
        let start = Instant::now();
        Self::check_graph(proto)?;

        let typed = onnx()
            .model_for_proto_model(proto)
            .map_err(|e| EcoWatchError::model_load(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, input_size, input_size]).into())
            .map_err(|e| EcoWatchError::model_load(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| EcoWatchError::model_load(format!("Failed to optimize model: {e}")))?;

        let output_fact = typed
            .output_fact(0)
            .map_err(|e| EcoWatchError::model_load(format!("Model has no output: {e}")))?;
        Self::check_output_shape(output_fact.shape.as_concrete())?;

        let model = typed.into_runnable().map_err(|e| {
            EcoWatchError::model_load(format!("Failed to create runnable model: {e}"))
        })?;

        info.input_size = input_size;
        info.device = Self::DEVICE.to_string();

        tracing::info!(
            model = %info.name,
            device = Self::DEVICE,
            elapsed_ms = start.elapsed().as_millis(),
            "✅ Tract model ready"
        );

        Ok(Self {
            model,
            activation,
            info,
        })
    }

    /// Reject graphs the ONNX importer cannot describe
    ///
    /// Every graph input not backed by an initializer needs a tensor type,
    /// and every graph output must be produced by something in the graph.
    fn check_graph(proto: &ModelProto) -> Result<()> {
        let graph = proto
            .graph
            .as_ref()
            .ok_or_else(|| EcoWatchError::model_load("ONNX model has no graph"))?;

        let initialized: HashSet<&str> = graph.initializer.iter().map(|t| t.name.as_str()).collect();
        for input in &graph.input {
            if initialized.contains(input.name.as_str()) {
                continue;
            }
            let typed = input.r#type.as_ref().is_some_and(|t| t.value.is_some());
            if !typed {
                return Err(EcoWatchError::model_load(format!(
                    "graph input '{}' has no tensor type",
                    input.name
                )));
            }
        }

        let produced: HashSet<&str> = graph
            .node
            .iter()
            .flat_map(|n| n.output.iter().map(String::as_str))
            .chain(graph.input.iter().map(|v| v.name.as_str()))
            .chain(initialized.iter().copied())
            .collect();
        if let Some(missing) = graph.output.iter().find(|o| !produced.contains(o.name.as_str())) {
            return Err(EcoWatchError::model_load(format!(
                "graph output '{}' is not produced by any node",
                missing.name
            )));
        }

        Ok(())
    }

    fn check_output_shape(shape: Option<&[usize]>) -> Result<()> {
        match shape {
            Some([_, 1, _, _]) => Ok(()),
            Some(other) => Err(EcoWatchError::model_load(format!(
                "expected a single-class (N, 1, H, W) output, got {other:?}"
            ))),
            None => Err(EcoWatchError::model_load(
                "model output shape is not concrete for the configured input size",
            )),
        }
    }

    /// Strip data-parallel prefixes from every tensor and value name
    ///
    /// Returns how many names changed.
    pub fn strip_parallel_prefix(proto: &mut ModelProto) -> usize {
        fn strip(name: &mut String) -> bool {
            let mut stripped = name.as_str();
            while let Some(rest) = stripped.strip_prefix(PARALLEL_PREFIX) {
                stripped = rest;
            }
            if stripped.len() == name.len() {
                return false;
            }
            *name = stripped.to_string();
            true
        }

        let Some(graph) = proto.graph.as_mut() else {
            return 0;
        };

        let mut renamed = 0;
        for tensor in &mut graph.initializer {
            renamed += usize::from(strip(&mut tensor.name));
        }
        for value in graph.input.iter_mut().chain(graph.output.iter_mut()) {
            renamed += usize::from(strip(&mut value.name));
        }
        for node in &mut graph.node {
            for name in node.input.iter_mut().chain(node.output.iter_mut()) {
                renamed += usize::from(strip(name));
            }
        }
        renamed
    }
}

impl SegmentationModel for TractSegmentationModel {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let tensor = Tensor::from(input.to_owned());

        let outputs = self
            .model
            .run(tvec![tensor.into()])
            .map_err(|e| EcoWatchError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| EcoWatchError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output = output_tensor
            .to_array_view::<f32>()
            .map_err(|e| EcoWatchError::inference(format!("Failed to convert output tensor: {e}")))?
            .into_dimensionality::<Ix4>()
            .map_err(|e| EcoWatchError::inference(format!("Expected 4D output tensor: {e}")))?
            .to_owned();

        Ok(match self.activation {
            Activation::Sigmoid => output.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Identity => output,
        })
    }

    fn info(&self) -> ModelInfo {
        self.info.clone()
    }
}
