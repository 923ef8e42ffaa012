use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::encoder::{EncoderFactory, VideoEncoder};
use crate::monitor::Session;

/// Where a sink worker puts the frames it receives.
pub trait SinkTarget: Send {
    fn write(&mut self, frame_no: u64, image: &RgbImage) -> Result<()>;

    /// Release any held resource. Called once, when the worker exits.
    fn release(&mut self) -> Result<()>;
}

/// Encodes frames into `path`. The encoder is opened on the first frame so it
/// can take that frame's dimensions.
pub struct EncoderTarget {
    path: PathBuf,
    fps: f64,
    factory: Arc<dyn EncoderFactory>,
    encoder: Option<Box<dyn VideoEncoder>>,
}

impl EncoderTarget {
    pub fn new(path: PathBuf, fps: f64, factory: Arc<dyn EncoderFactory>) -> Self {
        Self {
            path,
            fps,
            factory,
            encoder: None,
        }
    }
}

impl SinkTarget for EncoderTarget {
    fn write(&mut self, _frame_no: u64, image: &RgbImage) -> Result<()> {
        if self.encoder.is_none() {
            let encoder = self
                .factory
                .open(&self.path, image.width(), image.height(), self.fps)?;
            self.encoder = Some(encoder);
        }
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write_frame(image),
            None => Err(anyhow!("{}: encoder unavailable", self.path.display())),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self.encoder.take() {
            Some(encoder) => {
                log::info!("releasing {}", self.path.display());
                encoder.finish()
            }
            None => Ok(()),
        }
    }
}

/// Keeps `<dir>/<name>.jpg` updated with the latest frame.
pub struct PreviewTarget {
    path: PathBuf,
    staging: PathBuf,
    session: Arc<Session>,
}

impl PreviewTarget {
    pub fn new(dir: &Path, file_stem: &str, session: Arc<Session>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create preview dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join(format!("{}.jpg", file_stem)),
            staging: dir.join(format!(".{}.jpg.tmp", file_stem)),
            session,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SinkTarget for PreviewTarget {
    fn write(&mut self, _frame_no: u64, image: &RgbImage) -> Result<()> {
        let _display = self
            .session
            .display_lock
            .lock()
            .map_err(|_| anyhow!("display lock poisoned"))?;
        image
            .save_with_format(&self.staging, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", self.staging.display()))?;
        std::fs::rename(&self.staging, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
