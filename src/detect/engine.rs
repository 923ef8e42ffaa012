use anyhow::{bail, Result};
use std::str::FromStr;

use crate::detect::result::Detections;
use crate::frame::{InputSpec, Tensor};

/// Accelerator a run is configured for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Gpu,
    Myriad,
}

impl Device {
    pub const ALL: [Device; 3] = [Device::Gpu, Device::Cpu, Device::Myriad];

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Gpu => "GPU",
            Device::Myriad => "MYRIAD",
        }
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "CPU" => Ok(Device::Cpu),
            "GPU" => Ok(Device::Gpu),
            "MYRIAD" => Ok(Device::Myriad),
            other => bail!(
                "Device must be one of {:?}, got {:?}",
                Device::ALL.map(|d| d.as_str()),
                other
            ),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque inference capability: planar tensor in, SSD-style detections out.
///
/// Engines are driven from a single worker thread owned by the
/// [`DetectionStage`](crate::detect::DetectionStage); `infer` may block for as
/// long as the device needs.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Input geometry the caller must preprocess to.
    fn input_spec(&self) -> InputSpec;

    /// Returns true when the engine can run on `device`.
    fn supports(&self, device: Device) -> bool;

    /// Run inference on one preprocessed tensor.
    fn infer(&mut self, tensor: &Tensor) -> Result<Detections>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
