//! Thin wrapper around an ONNX Runtime session.

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use tracing::info;

/// An ONNX model loaded for inference, with its tensor names captured.
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    /// Load a model file into a CPU session.
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("Model declares no outputs")?;

        info!("Model loaded. Input: {:?}, output: {:?}", input_name, output_name);

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Run the model on a single NCHW float tensor and return the first
    /// output as (dims, data).
    pub fn run(&mut self, shape: [usize; 4], data: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let tensor = Tensor::from_array((shape, data)).context("Failed to build input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("Inference failed")?;

        let output = outputs
            .get(self.output_name.as_str())
            .with_context(|| format!("Model produced no output named {:?}", self.output_name))?;

        let (out_shape, out_data) = output
            .try_extract_tensor::<f32>()
            .context("Model output is not an f32 tensor")?;

        let dims = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, out_data.to_vec()))
    }
}
