//! Frame ingestion sources.
//!
//! Every monitored stream reads from one capture:
//! - Synthetic `stub://` sources (tests and demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 cameras addressed by index (feature: ingest-v4l2)
//!
//! A failed or exhausted read closes only the affected stream. Finite sources
//! can be rewound instead when loop mode is enabled; cameras never loop.

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod source;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

pub use source::FrameSource;
pub use synthetic::{read_stamp, SyntheticConfig, SyntheticSource};

/// Where a stream's frames come from, as written in the configuration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Integer camera index (`/dev/video<k>`).
    Camera(u32),
    /// File path, or a `stub://` synthetic source.
    File(String),
}

impl SourceSpec {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = token.parse() {
                return Self::Camera(index);
            }
        }
        Self::File(token.to_string())
    }

    pub fn is_camera(&self) -> bool {
        matches!(self, Self::Camera(_))
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera(index) => write!(f, "camera {}", index),
            Self::File(path) => f.write_str(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_are_camera_indices() {
        assert_eq!(SourceSpec::parse("0"), SourceSpec::Camera(0));
        assert_eq!(SourceSpec::parse("12"), SourceSpec::Camera(12));
        assert!(SourceSpec::parse("3").is_camera());
    }

    #[test]
    fn everything_else_is_a_file() {
        assert_eq!(
            SourceSpec::parse("videos/0.mp4"),
            SourceSpec::File("videos/0.mp4".to_string())
        );
        assert_eq!(
            SourceSpec::parse("stub://lobby"),
            SourceSpec::File("stub://lobby".to_string())
        );
        assert!(!SourceSpec::parse("-1").is_camera());
    }
}
