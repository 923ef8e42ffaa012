#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::engine::{Device, InferenceEngine};
use crate::detect::result::{Detections, RawDetection};
use crate::frame::{ChannelOrder, InputSpec, Tensor as InputTensor};

/// Tract-based engine for ONNX SSD detectors.
///
/// The model must take a single `[1, 3, H, W]` f32 input and produce a
/// `[1, 1, N, 7]` detection tensor. Tract runs on the CPU only.
pub struct TractEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input: InputSpec,
}

impl TractEngine {
    /// Load an ONNX model from disk and prepare it for `width` x `height` input.
    pub fn load<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input: InputSpec {
                width,
                height,
                channel_order: ChannelOrder::Bgr,
            },
        })
    }

    fn build_input(&self, tensor: &InputTensor) -> Result<Tensor> {
        let [n, c, h, w] = tensor.shape();
        tract_ndarray::Array4::from_shape_vec((n, c, h, w), tensor.data.clone())
            .map(|array| array.into_tensor())
            .map_err(|e| anyhow!("input tensor has the wrong length: {}", e))
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_spec(&self) -> InputSpec {
        self.input
    }

    fn supports(&self, device: Device) -> bool {
        matches!(device, Device::Cpu)
    }

    fn infer(&mut self, tensor: &InputTensor) -> Result<Detections> {
        let input = self.build_input(tensor)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = rows.iter().copied().collect();
        if flat.len() % RawDetection::WIDTH != 0 {
            return Err(anyhow!(
                "detection output length {} is not a multiple of {}",
                flat.len(),
                RawDetection::WIDTH
            ));
        }
        Ok(RawDetection::decode(&flat))
    }
}
