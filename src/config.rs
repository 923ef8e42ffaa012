use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ingest::SourceSpec;

const DEFAULT_PROB_THRESHOLD: f32 = 0.145;
const DEFAULT_QUEUE_SIZE: usize = 100;
const DEFAULT_PREVIEW_DIR: &str = "preview";
const DEFAULT_ENCODER_FPS: f64 = 15.0;
const DEFAULT_DEBOUNCE_THRESHOLD: u32 = 5;

/// Window/stream name template; `{}` is the stream index in the configuration file.
pub const STREAM_NAME_PREFIX: &str = "Video";

/// One monitored input as declared in the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub name: String,
    pub source: SourceSpec,
    pub required_label: String,
}

/// Parsed line-oriented configuration file.
///
/// ```text
/// <model definition path>
/// <model weights path>
/// <labels file path>
/// <source> <required label>
/// ...
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub model_path: PathBuf,
    pub weights_path: PathBuf,
    pub labels_path: PathBuf,
    pub streams: Vec<StreamConfig>,
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid configuration file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let mut header = |what: &str| -> Result<PathBuf> {
            let line = lines
                .next()
                .ok_or_else(|| anyhow!("missing {} line", what))?
                .trim();
            if line.is_empty() {
                bail!("{} line is empty", what);
            }
            Ok(PathBuf::from(line))
        };
        let model_path = header("model definition")?;
        let weights_path = header("model weights")?;
        let labels_path = header("labels file")?;

        let mut streams = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(source), Some(label)) = (parts.next(), parts.next()) else {
                bail!(
                    "stream line {}: expected `<source> <required-label>`, got {:?}",
                    line_no + 4,
                    line
                );
            };
            let index = streams.len();
            streams.push(StreamConfig {
                name: format!("{} {}", STREAM_NAME_PREFIX, index),
                source: SourceSpec::parse(source),
                required_label: label.to_string(),
            });
        }
        if streams.is_empty() {
            bail!("no streams configured");
        }

        Ok(Self {
            model_path,
            weights_path,
            labels_path,
            streams,
        })
    }
}

/// Read a labels file: one label per line, class id `k` maps to line `k - 1`.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    Ok(raw.lines().map(|line| line.trim().to_string()).collect())
}

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    prob_threshold: Option<f32>,
    queue_size: Option<usize>,
    loop_video: Option<bool>,
    font_path: Option<PathBuf>,
    preview_dir: Option<PathBuf>,
    encoder_fps: Option<f64>,
    debounce_threshold: Option<u32>,
}

/// Runtime tunables. Loaded from `TRAFFIC_MONITOR_SETTINGS` (JSON) and then
/// overridden by individual `TRAFFIC_MONITOR_*` environment variables.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub prob_threshold: f32,
    pub queue_size: usize,
    pub loop_video: bool,
    pub font_path: Option<PathBuf>,
    pub preview_dir: PathBuf,
    /// Nominal rate written into encoded videos before retiming.
    pub encoder_fps: f64,
    pub debounce_threshold: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_file(SettingsFile::default())
    }
}

impl MonitorSettings {
    pub fn load() -> Result<Self> {
        let settings_path = std::env::var("TRAFFIC_MONITOR_SETTINGS").ok();
        let file = match settings_path.as_deref() {
            Some(path) if !path.trim().is_empty() => read_settings_file(Path::new(path))?,
            _ => SettingsFile::default(),
        };
        let mut settings = Self::from_file(file);
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    fn from_file(file: SettingsFile) -> Self {
        Self {
            prob_threshold: file.prob_threshold.unwrap_or(DEFAULT_PROB_THRESHOLD),
            queue_size: file.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
            loop_video: file.loop_video.unwrap_or(false),
            font_path: file.font_path,
            preview_dir: file
                .preview_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_DIR)),
            encoder_fps: file.encoder_fps.unwrap_or(DEFAULT_ENCODER_FPS),
            debounce_threshold: file
                .debounce_threshold
                .unwrap_or(DEFAULT_DEBOUNCE_THRESHOLD),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(threshold) = std::env::var("TRAFFIC_MONITOR_PROB_THRESHOLD") {
            self.prob_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("TRAFFIC_MONITOR_PROB_THRESHOLD must be a number in [0, 1]")
            })?;
        }
        if let Ok(size) = std::env::var("TRAFFIC_MONITOR_QUEUE_SIZE") {
            self.queue_size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("TRAFFIC_MONITOR_QUEUE_SIZE must be a positive integer"))?;
        }
        if let Ok(flag) = std::env::var("TRAFFIC_MONITOR_LOOP_VIDEO") {
            self.loop_video = parse_flag(&flag)
                .ok_or_else(|| anyhow!("TRAFFIC_MONITOR_LOOP_VIDEO must be true/false/1/0"))?;
        }
        if let Ok(path) = std::env::var("TRAFFIC_MONITOR_FONT") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("TRAFFIC_MONITOR_PREVIEW_DIR") {
            if !path.trim().is_empty() {
                self.preview_dir = PathBuf::from(path);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.prob_threshold) {
            bail!("prob_threshold must be within [0, 1]");
        }
        if self.queue_size == 0 {
            bail!("queue_size must be greater than zero");
        }
        if self.encoder_fps.is_nan() || self.encoder_fps <= 0.0 {
            bail!("encoder_fps must be greater than zero");
        }
        if self.debounce_threshold == 0 {
            bail!("debounce_threshold must be greater than zero");
        }
        Ok(())
    }
}

fn read_settings_file(path: &Path) -> Result<SettingsFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read settings file {}: {}", path.display(), e))?;
    let file = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid settings file {}: {}", path.display(), e))?;
    Ok(file)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_streams() {
        let cfg = MonitorConfig::parse(
            "models/ssd.xml\nmodels/ssd.bin\nlabels.txt\n0 person\nvideos/shop.mp4 bottle\n\n",
        )
        .unwrap();
        assert_eq!(cfg.model_path, PathBuf::from("models/ssd.xml"));
        assert_eq!(cfg.weights_path, PathBuf::from("models/ssd.bin"));
        assert_eq!(cfg.labels_path, PathBuf::from("labels.txt"));
        assert_eq!(cfg.streams.len(), 2);
        assert_eq!(cfg.streams[0].source, SourceSpec::Camera(0));
        assert_eq!(cfg.streams[0].name, "Video 0");
        assert_eq!(cfg.streams[1].source, SourceSpec::File("videos/shop.mp4".into()));
        assert_eq!(cfg.streams[1].required_label, "bottle");
    }

    #[test]
    fn rejects_stream_line_without_label() {
        let err = MonitorConfig::parse("m\nw\nl\nvideo.mp4\n").unwrap_err();
        assert!(err.to_string().contains("stream line 4"));
    }

    #[test]
    fn rejects_missing_header_and_empty_stream_list() {
        assert!(MonitorConfig::parse("m\nw\n").is_err());
        assert!(MonitorConfig::parse("m\nw\nl\n").is_err());
    }

    #[test]
    fn flag_parsing_accepts_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = MonitorSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.queue_size, 100);
        assert_eq!(settings.debounce_threshold, 5);
    }
}
