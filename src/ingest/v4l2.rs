//! V4L2 camera capture.
//!
//! Camera index `k` from the configuration file maps to `/dev/video<k>`. The
//! device is asked for packed RGB; whatever format it settles on is queried
//! once and treated as fixed for the rest of the run.

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

const PREFERRED_WIDTH: u32 = 640;
const PREFERRED_HEIGHT: u32 = 480;

pub(crate) struct V4l2Camera {
    device_path: String,
    state: V4l2State,
    width: u32,
    height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub(crate) fn open(index: u32) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device_path = format!("/dev/video{}", index);
        let device = v4l::Device::new(index as usize)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = PREFERRED_WIDTH;
        format.height = PREFERRED_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", device_path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            bail!(
                "{} does not support packed RGB capture (got {})",
                device_path,
                format.fourcc
            );
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: connected to {} ({}x{})",
            device_path,
            format.width,
            format.height
        );
        Ok(Self {
            device_path,
            state,
            width: format.width,
            height: format.height,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let expected = (self.width as usize) * (self.height as usize) * 3;
        let pixels = self
            .state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .with_context(|| format!("capture frame from {}", self.device_path))?;
        let pixels = pixels
            .get(..expected)
            .with_context(|| format!("short frame from {}", self.device_path))?
            .to_vec();
        RgbImage::from_raw(self.width, self.height, pixels)
            .with_context(|| format!("malformed frame from {}", self.device_path))
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
