use anyhow::{anyhow, bail, Context, Result};
use std::collections::VecDeque;
use std::time::Duration;

use crate::detect::engine::{Device, InferenceEngine};
use crate::detect::result::{Detections, RawDetection};
use crate::frame::{ChannelOrder, InputSpec, Tensor};

const DEFAULT_INPUT_SIZE: u32 = 300;
const DEFAULT_CLASS_ID: u32 = 1;
const BRIGHTNESS_THRESHOLD: f32 = 200.0;
const MIN_REGION_AREA: usize = 4;

/// Stub engine for tests and demos.
///
/// Reports every bright connected region of the input as one detection of a
/// fixed class. Paired with the synthetic `stub://` sources, the count it
/// reports follows the squares moving through the clip.
///
/// Model URL form: `stub://<name>[?size=N&class=K&latency_ms=M]`.
#[derive(Debug)]
pub struct StubEngine {
    input: InputSpec,
    class_id: u32,
    latency: Duration,
}

impl StubEngine {
    pub fn new(input_size: u32, class_id: u32) -> Self {
        Self {
            input: InputSpec {
                width: input_size,
                height: input_size,
                channel_order: ChannelOrder::Bgr,
            },
            class_id,
            latency: Duration::ZERO,
        }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("stub engine URL must start with stub://"))?;
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");
        let mut engine = Self::new(DEFAULT_INPUT_SIZE, DEFAULT_CLASS_ID);
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed query parameter {:?} in {}", pair, url))?;
            let invalid = || format!("invalid value for {} in {}", key, url);
            match key {
                "size" => {
                    let size: u32 = value.parse().with_context(invalid)?;
                    if size < 8 {
                        bail!("stub engine input size must be at least 8");
                    }
                    engine.input.width = size;
                    engine.input.height = size;
                }
                "class" => engine.class_id = value.parse().with_context(invalid)?,
                "latency_ms" => {
                    engine.latency = Duration::from_millis(value.parse().with_context(invalid)?)
                }
                other => bail!("unknown stub engine parameter {:?} in {}", other, url),
            }
        }
        Ok(engine)
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE, DEFAULT_CLASS_ID)
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_spec(&self) -> InputSpec {
        self.input
    }

    fn supports(&self, _device: Device) -> bool {
        true
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<Detections> {
        if tensor.width != self.input.width || tensor.height != self.input.height {
            bail!(
                "tensor {}x{} does not match engine input {}x{}",
                tensor.width,
                tensor.height,
                self.input.width,
                self.input.height
            );
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let (w, h) = (tensor.width as usize, tensor.height as usize);
        let mask: Vec<bool> = (0..w * h)
            .map(|i| (0..Tensor::CHANNELS).all(|c| tensor.plane(c)[i] >= BRIGHTNESS_THRESHOLD))
            .collect();

        Ok(bright_regions(&mask, w, h)
            .into_iter()
            .map(|region| RawDetection {
                batch: 0.0,
                class_id: self.class_id,
                confidence: 0.9,
                xmin: region.xmin as f32 / w as f32,
                ymin: region.ymin as f32 / h as f32,
                xmax: (region.xmax + 1) as f32 / w as f32,
                ymax: (region.ymax + 1) as f32 / h as f32,
            })
            .collect())
    }
}

struct Region {
    xmin: usize,
    ymin: usize,
    xmax: usize,
    ymax: usize,
}

/// 4-connected components of `mask`, in scan order, skipping specks.
fn bright_regions(mask: &[bool], width: usize, height: usize) -> Vec<Region> {
    let mut seen = vec![false; mask.len()];
    let mut regions = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let mut region = Region {
            xmin: usize::MAX,
            ymin: usize::MAX,
            xmax: 0,
            ymax: 0,
        };
        let mut area = 0;
        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % width, idx / width);
            area += 1;
            region.xmin = region.xmin.min(x);
            region.ymin = region.ymin.min(y);
            region.xmax = region.xmax.max(x);
            region.ymax = region.ymax.max(y);

            let neighbours = [
                (x > 0).then(|| idx - 1),
                (x + 1 < width).then(|| idx + 1),
                (y > 0).then(|| idx - width),
                (y + 1 < height).then(|| idx + width),
            ];
            for next in neighbours.into_iter().flatten() {
                if mask[next] && !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        if area >= MIN_REGION_AREA {
            regions.push(region);
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::preprocess;
    use image::{Rgb, RgbImage};

    fn square(frame: &mut RgbImage, x0: u32, y0: u32, size: u32) {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                frame.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
    }

    #[test]
    fn counts_bright_squares() -> Result<()> {
        let mut engine = StubEngine::from_url("stub://ssd?size=32&class=15")?;
        let mut frame = RgbImage::from_pixel(64, 64, Rgb([20, 20, 20]));
        square(&mut frame, 4, 4, 12);
        square(&mut frame, 40, 40, 12);

        let tensor = preprocess(&frame, &engine.input_spec())?;
        let detections = engine.infer(&tensor)?;
        assert_eq!(detections.len(), 2);
        assert!(detections.iter().all(|d| d.class_id == 15));
        assert!(detections[0].xmin < 0.2 && detections[1].xmin > 0.5);
        Ok(())
    }

    #[test]
    fn empty_scene_has_no_detections() -> Result<()> {
        let mut engine = StubEngine::new(16, 1);
        let frame = RgbImage::from_pixel(16, 16, Rgb([20, 20, 20]));
        let tensor = preprocess(&frame, &engine.input_spec())?;
        assert!(engine.infer(&tensor)?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_mismatched_tensor() {
        let mut engine = StubEngine::new(16, 1);
        let tensor = Tensor {
            width: 8,
            height: 8,
            data: vec![0.0; 3 * 64],
        };
        assert!(engine.infer(&tensor).is_err());
    }

    #[test]
    fn rejects_unknown_url_parameters() {
        assert!(StubEngine::from_url("stub://ssd?gpu=1").is_err());
        assert!(StubEngine::from_url("stub://ssd?size=4").is_err());
        assert!(StubEngine::from_url("ssd.onnx").is_err());
    }
}
