//! Frame preprocessing for the inference engine.
//!
//! Captured frames are packed (interleaved HWC) RGB images. Engines take a
//! planar NCHW `f32` tensor at their own input resolution, with raw 0..255
//! channel values in the channel order the engine declares.

use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Channel order an engine expects in its input planes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Input geometry an engine declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub channel_order: ChannelOrder,
}

/// Planar `[1, 3, height, width]` tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Tensor {
    pub const CHANNELS: usize = 3;

    pub fn shape(&self) -> [usize; 4] {
        [1, Self::CHANNELS, self.height as usize, self.width as usize]
    }

    /// One channel plane in row-major order.
    pub fn plane(&self, channel: usize) -> &[f32] {
        let size = self.width as usize * self.height as usize;
        &self.data[channel * size..(channel + 1) * size]
    }
}

/// Resize `frame` to the engine input and transpose HWC to planar CHW.
pub fn preprocess(frame: &RgbImage, spec: &InputSpec) -> Result<Tensor> {
    if spec.width == 0 || spec.height == 0 {
        bail!("engine input size must be non-zero");
    }
    let resized;
    let frame = if frame.dimensions() == (spec.width, spec.height) {
        frame
    } else {
        resized = imageops::resize(frame, spec.width, spec.height, FilterType::Triangle);
        &resized
    };

    let plane = spec.width as usize * spec.height as usize;
    let mut data = vec![0f32; plane * Tensor::CHANNELS];
    for (i, pixel) in frame.pixels().enumerate() {
        let [r, g, b] = pixel.0;
        let (first, third) = match spec.channel_order {
            ChannelOrder::Rgb => (r, b),
            ChannelOrder::Bgr => (b, r),
        };
        data[i] = f32::from(first);
        data[plane + i] = f32::from(g);
        data[2 * plane + i] = f32::from(third);
    }

    Ok(Tensor {
        width: spec.width,
        height: spec.height,
        data,
    })
}

/// Resize a frame to the annotation/output resolution.
pub fn resize_to(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    imageops::resize(frame, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn spec(order: ChannelOrder) -> InputSpec {
        InputSpec {
            width: 2,
            height: 1,
            channel_order: order,
        }
    }

    #[test]
    fn transposes_interleaved_to_planar() {
        let mut frame = RgbImage::new(2, 1);
        frame.put_pixel(0, 0, Rgb([1, 2, 3]));
        frame.put_pixel(1, 0, Rgb([4, 5, 6]));

        let tensor = preprocess(&frame, &spec(ChannelOrder::Rgb)).unwrap();
        assert_eq!(tensor.shape(), [1, 3, 1, 2]);
        assert_eq!(tensor.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        let tensor = preprocess(&frame, &spec(ChannelOrder::Bgr)).unwrap();
        assert_eq!(tensor.plane(0), &[3.0, 6.0]);
        assert_eq!(tensor.plane(2), &[1.0, 4.0]);
    }

    #[test]
    fn resizes_to_engine_input() {
        let frame = RgbImage::from_pixel(64, 32, Rgb([10, 20, 30]));
        let spec = InputSpec {
            width: 8,
            height: 8,
            channel_order: ChannelOrder::Rgb,
        };
        let tensor = preprocess(&frame, &spec).unwrap();
        assert_eq!(tensor.data.len(), 3 * 8 * 8);
        assert!(tensor.plane(1).iter().all(|v| (*v - 20.0).abs() < 1.0));
    }

    #[test]
    fn rejects_zero_sized_input() {
        let frame = RgbImage::new(4, 4);
        let spec = InputSpec {
            width: 0,
            height: 4,
            channel_order: ChannelOrder::Rgb,
        };
        assert!(preprocess(&frame, &spec).is_err());
    }
}
