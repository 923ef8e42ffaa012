use anyhow::Result;
use image::RgbImage;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::V4l2Camera;
use super::SourceSpec;

/// One camera or file capture owned by a stream.
///
/// `read` never fails: a failed or exhausted read closes the source, and once
/// closed no further reads reach the backend.
pub struct FrameSource {
    name: String,
    backend: CaptureBackend,
    is_camera: bool,
    loop_video: bool,
    closed: bool,
    width: u32,
    height: u32,
    fps: f64,
    frames_read: u64,
}

enum CaptureBackend {
    /// The capture could not be opened.
    Unavailable,
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
    #[cfg(feature = "ingest-v4l2")]
    V4l2(V4l2Camera),
}

impl FrameSource {
    pub fn open(name: &str, spec: &SourceSpec, loop_video: bool) -> Result<Self> {
        let backend = match spec {
            SourceSpec::File(path) if path.starts_with("stub://") => {
                CaptureBackend::Synthetic(SyntheticSource::new(SyntheticConfig::from_url(path)?))
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceSpec::File(path) => CaptureBackend::Ffmpeg(FfmpegFileSource::open(path)?),
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            SourceSpec::File(path) => {
                anyhow::bail!(
                    "{}: reading {} requires the ingest-file-ffmpeg feature",
                    name,
                    path
                )
            }
            #[cfg(feature = "ingest-v4l2")]
            SourceSpec::Camera(index) => CaptureBackend::V4l2(V4l2Camera::open(*index)?),
            #[cfg(not(feature = "ingest-v4l2"))]
            SourceSpec::Camera(index) => {
                anyhow::bail!(
                    "{}: camera {} requires the ingest-v4l2 feature",
                    name,
                    index
                )
            }
        };
        Ok(Self::from_backend(name, backend, spec.is_camera(), loop_video))
    }

    /// Placeholder for a capture that failed to open. It starts closed, so
    /// the stream it belongs to never reads.
    pub fn unavailable(name: &str, spec: &SourceSpec, reason: &str) -> Self {
        log::warn!("{}: cannot open {}: {}", name, spec, reason);
        Self {
            name: name.to_string(),
            backend: CaptureBackend::Unavailable,
            is_camera: spec.is_camera(),
            loop_video: false,
            closed: true,
            width: 0,
            height: 0,
            fps: 0.0,
            frames_read: 0,
        }
    }

    /// Wrap an already configured synthetic clip.
    pub fn synthetic(name: &str, source: SyntheticSource, loop_video: bool) -> Self {
        Self::from_backend(name, CaptureBackend::Synthetic(source), false, loop_video)
    }

    fn from_backend(name: &str, backend: CaptureBackend, is_camera: bool, loop_video: bool) -> Self {
        let (width, height) = backend.dimensions();
        let fps = if is_camera { 0.0 } else { backend.fps() };
        log::info!(
            "{}: opened {}x{} capture ({})",
            name,
            width,
            height,
            if fps > 0.0 {
                format!("{:.2} fps", fps)
            } else {
                "live".to_string()
            }
        );
        Self {
            name: name.to_string(),
            backend,
            is_camera,
            loop_video,
            closed: false,
            width,
            height,
            fps,
            frames_read: 0,
        }
    }

    /// Read the next frame, or `None` once the source is closed.
    pub fn read(&mut self) -> Option<RgbImage> {
        if self.closed {
            return None;
        }
        match self.backend.next_frame() {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Some(frame)
            }
            Ok(None) if self.loop_video && !self.is_camera => match self.rewind_and_read() {
                Ok(Some(frame)) => {
                    self.frames_read += 1;
                    Some(frame)
                }
                Ok(None) => self.close_with("empty after rewind"),
                Err(e) => self.close_with(&format!("rewind failed: {:#}", e)),
            },
            Ok(None) => self.close_with("end of stream"),
            Err(e) => self.close_with(&format!("read failed: {:#}", e)),
        }
    }

    fn rewind_and_read(&mut self) -> Result<Option<RgbImage>> {
        log::debug!("{}: rewinding to the first frame", self.name);
        self.backend.rewind()?;
        self.backend.next_frame()
    }

    fn close_with(&mut self, reason: &str) -> Option<RgbImage> {
        log::info!("{}: closed ({})", self.name, reason);
        self.closed = true;
        None
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_camera(&self) -> bool {
        self.is_camera
    }

    /// Native dimensions, queried once when the capture was opened.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Native frame rate; 0 for live cameras.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Clip length when the source knows it and does not loop.
    pub fn frame_count(&self) -> Option<u64> {
        if self.is_camera || self.loop_video {
            return None;
        }
        self.backend.frame_count()
    }
}

impl CaptureBackend {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self {
            Self::Unavailable => Ok(None),
            Self::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Ffmpeg(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            Self::V4l2(source) => source.next_frame().map(Some),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        match self {
            Self::Unavailable => Ok(()),
            Self::Synthetic(source) => source.rewind(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Ffmpeg(source) => source.rewind(),
            #[cfg(feature = "ingest-v4l2")]
            Self::V4l2(_) => Ok(()),
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Unavailable => (0, 0),
            Self::Synthetic(source) => source.dimensions(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Ffmpeg(source) => source.dimensions(),
            #[cfg(feature = "ingest-v4l2")]
            Self::V4l2(source) => source.dimensions(),
        }
    }

    fn fps(&self) -> f64 {
        match self {
            Self::Unavailable => 0.0,
            Self::Synthetic(source) => source.fps(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Ffmpeg(source) => source.fps(),
            #[cfg(feature = "ingest-v4l2")]
            Self::V4l2(_) => 0.0,
        }
    }

    fn frame_count(&self) -> Option<u64> {
        match self {
            Self::Unavailable => None,
            Self::Synthetic(source) => source.frame_count(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Ffmpeg(source) => source.frame_count(),
            #[cfg(feature = "ingest-v4l2")]
            Self::V4l2(_) => None,
        }
    }
}
