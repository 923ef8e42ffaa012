//! Files written into the output directory.
//!
//! ```text
//! inference_output_<name>_temp.mp4   encoded at the nominal rate while running
//! inference_output_<name>.mp4        retimed to the measured rate
//! fps.txt                            average rounds per second
//! i_progress.txt                     inference progress, one percent per line
//! v_progress.txt                     retime progress, one percent per line
//! data.json                          confirmed-count samples and totals
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::monitor::CountSample;

pub const STATS_NAME: &str = "stats";
pub const FPS_FILE: &str = "fps.txt";
pub const INFERENCE_PROGRESS_FILE: &str = "i_progress.txt";
pub const RETIME_PROGRESS_FILE: &str = "v_progress.txt";
pub const DATA_FILE: &str = "data.json";

/// `Video 0` becomes `Video_0`.
pub fn sanitize_name(name: &str) -> String {
    name.trim().replace(' ', "_")
}

#[derive(Clone, Debug)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create output dir {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Video written while the pipeline runs.
    pub fn temp_video(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("inference_output_{}_temp.mp4", sanitize_name(name)))
    }

    /// Final, retimed video.
    pub fn video(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("inference_output_{}.mp4", sanitize_name(name)))
    }

    pub fn progress(&self, file: &str) -> Result<ProgressFile> {
        ProgressFile::create(&self.root.join(file))
    }

    pub fn write_fps(&self, fps: f64) -> Result<PathBuf> {
        let path = self.root.join(FPS_FILE);
        std::fs::write(&path, format!("{}", fps))
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn write_data(&self, data: &CountData) -> Result<PathBuf> {
        let path = self.root.join(DATA_FILE);
        let json = serde_json::to_string_pretty(data).context("failed to encode count data")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Append-only `percent\n` file read by external progress bars.
pub struct ProgressFile {
    path: PathBuf,
    file: File,
    last: Option<u32>,
}

impl ProgressFile {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            last: None,
        })
    }

    /// Record `done / total` as a whole percent. Repeated values are skipped.
    pub fn update(&mut self, done: u64, total: u64) -> Result<()> {
        if total == 0 {
            return Ok(());
        }
        let percent = (done.min(total) * 100 / total) as u32;
        if self.last == Some(percent) {
            return Ok(());
        }
        writeln!(self.file, "{}", percent)
            .and_then(|_| self.file.flush())
            .with_context(|| format!("failed to update {}", self.path.display()))?;
        self.last = Some(percent);
        Ok(())
    }
}

/// Contents of `data.json`:
///
/// ```json
/// {
///   "Video_1": [{"frame": 4, "count": 2, "time": "12:00:01"}],
///   "totals": {"Video_1": 2, "Video_2": 0}
/// }
/// ```
///
/// Streams are numbered from 1; streams without samples have no entry.
///
/// Not compatible with the legacy dashboard format, which keys each sample by
/// frame number and stores the count as a string. Samples here are an
/// ordered array with numeric counts, and totals sit alongside them.
#[derive(Debug, Default, Serialize)]
pub struct CountData {
    #[serde(flatten)]
    pub samples: BTreeMap<String, Vec<CountSample>>,
    pub totals: BTreeMap<String, u64>,
}

impl CountData {
    pub fn push_stream(&mut self, index: usize, samples: &[CountSample], total: u64) {
        let key = format!("Video_{}", index + 1);
        if !samples.is_empty() {
            self.samples.insert(key.clone(), samples.to_vec());
        }
        self.totals.insert(key, total);
    }
}
