use anyhow::{bail, Result};
use std::path::Path;

use crate::detect::engine::{Device, InferenceEngine};

pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubEngine;

#[cfg(feature = "backend-tract")]
pub use tract::TractEngine;

#[cfg(feature = "backend-tract")]
const TRACT_INPUT_SIZE: u32 = 300;

/// Open the engine named by the configuration's model lines and check it can
/// run on `device`.
///
/// `stub://` models select [`StubEngine`]. Anything else is an ONNX model for
/// the tract backend; ONNX files carry their own weights, so the weights line
/// is only checked for existence when it names a file.
pub fn open_engine(
    model_path: &Path,
    weights_path: &Path,
    device: Device,
) -> Result<Box<dyn InferenceEngine>> {
    let model = model_path.to_string_lossy();
    let engine: Box<dyn InferenceEngine> = if model.starts_with("stub://") {
        Box::new(StubEngine::from_url(&model)?)
    } else {
        open_model_file(model_path, weights_path)?
    };
    if !engine.supports(device) {
        bail!(
            "inference engine '{}' cannot run on device {}",
            engine.name(),
            device
        );
    }
    log::info!(
        "loaded '{}' engine for {} ({}x{} input)",
        engine.name(),
        device,
        engine.input_spec().width,
        engine.input_spec().height
    );
    Ok(engine)
}

#[cfg(feature = "backend-tract")]
fn open_model_file(model_path: &Path, weights_path: &Path) -> Result<Box<dyn InferenceEngine>> {
    if weights_path.as_os_str() != "-" && !weights_path.exists() {
        bail!("model weights {} not found", weights_path.display());
    }
    Ok(Box::new(TractEngine::load(
        model_path,
        TRACT_INPUT_SIZE,
        TRACT_INPUT_SIZE,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn open_model_file(model_path: &Path, _weights_path: &Path) -> Result<Box<dyn InferenceEngine>> {
    bail!(
        "loading {} requires the backend-tract feature",
        model_path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn stub_models_open_on_every_device() {
        for device in Device::ALL {
            let engine = open_engine(
                &PathBuf::from("stub://ssd?size=64"),
                &PathBuf::from("-"),
                device,
            )
            .unwrap();
            assert_eq!(engine.name(), "stub");
            assert_eq!(engine.input_spec().width, 64);
        }
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn model_files_need_the_tract_feature() {
        let err = open_engine(
            &PathBuf::from("ssd.onnx"),
            &PathBuf::from("ssd.bin"),
            Device::Cpu,
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().contains("backend-tract"));
    }
}
