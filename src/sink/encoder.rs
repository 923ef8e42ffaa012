//! Video encoding behind a small trait pair.
//!
//! The default factory pipes raw RGB frames into an `ffmpeg` child process and
//! retimes finished files with ffmpeg's `setpts` filter.

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// An open video file accepting frames of one fixed size.
pub trait VideoEncoder: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush trailing data and close the file.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens encoders and rewrites finished videos to a new playback rate.
pub trait EncoderFactory: Send + Sync {
    fn open(&self, path: &Path, width: u32, height: u32, fps: f64)
        -> Result<Box<dyn VideoEncoder>>;

    /// Rewrite `input` into `output`, scaling every timestamp by `pts_factor`.
    fn retime(&self, input: &Path, output: &Path, pts_factor: f64) -> Result<()>;
}

/// Encoders backed by the `ffmpeg` executable found on `PATH` (or `program`).
#[derive(Clone, Debug)]
pub struct FfmpegEncoderFactory {
    program: PathBuf,
}

impl FfmpegEncoderFactory {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn VideoEncoder>> {
        let mut child = Command::new(&self.program)
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-r", &format!("{}", fps)])
            .args(["-i", "-", "-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program.display()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
        log::debug!("encoding {} ({}x{} @ {} fps)", path.display(), width, height, fps);
        Ok(Box::new(FfmpegEncoder {
            path: path.to_path_buf(),
            width,
            height,
            stdin: Some(stdin),
            child,
        }))
    }

    fn retime(&self, input: &Path, output: &Path, pts_factor: f64) -> Result<()> {
        let status = Command::new(&self.program)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-filter:v", &format!("setpts={}*PTS", pts_factor)])
            .arg(output)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("failed to start {}", self.program.display()))?;
        if !status.success() {
            bail!("ffmpeg retime of {} exited with {}", input.display(), status);
        }
        Ok(())
    }
}

struct FfmpegEncoder {
    path: PathBuf,
    width: u32,
    height: u32,
    stdin: Option<ChildStdin>,
    child: Child,
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "{}: frame is {}x{}, encoder was opened for {}x{}",
                self.path.display(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("{}: encoder already finished", self.path.display()))?;
        stdin
            .write_all(frame.as_raw())
            .with_context(|| format!("failed to write frame to {}", self.path.display()))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing stdin lets ffmpeg write the trailer and exit.
        self.stdin.take();
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed to wait for encoder of {}", self.path.display()))?;
        if !status.success() {
            bail!("encoder for {} exited with {}", self.path.display(), status);
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            // Dropped without finish (error path): still reap the child.
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_reported() {
        let factory = FfmpegEncoderFactory::with_program("/nonexistent/ffmpeg-binary");
        let dir = tempfile::tempdir().unwrap();
        let err = factory
            .open(&dir.path().join("out.mp4"), 16, 16, 15.0)
            .err()
            .expect("spawn must fail");
        assert!(err.to_string().contains("failed to start"));
        assert!(factory
            .retime(&dir.path().join("a.mp4"), &dir.path().join("b.mp4"), 1.0)
            .is_err());
    }
}
