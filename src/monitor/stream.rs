use anyhow::{anyhow, Result};
use chrono::NaiveTime;
use image::RgbImage;
use serde::Serialize;

use super::stabilizer::CountStabilizer;
use crate::detect::RawDetection;
use crate::ingest::FrameSource;
use crate::sink::SinkHandle;

/// Confirmed count at the frame where it was committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CountSample {
    pub frame: u64,
    pub count: u32,
    /// Wall-clock `HH:MM:SS`.
    pub time: String,
}

/// Result of feeding one frame's detections to a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    pub frame_no: u64,
    /// One rolling-log entry per newly confirmed object.
    pub new_logs: Vec<String>,
}

/// One monitored input: its capture, its debounce state and its sink.
pub struct Stream {
    name: String,
    label: String,
    class_id: Option<u32>,
    source: FrameSource,
    stabilizer: CountStabilizer,
    current_frame: Option<RgbImage>,
    current_count: u32,
    samples: Vec<CountSample>,
    sink: Option<SinkHandle>,
}

impl Stream {
    /// `labels` is the detector's label list; class id `k` is `labels[k - 1]`.
    pub fn new(
        label: &str,
        labels: &[String],
        source: FrameSource,
        debounce_threshold: u32,
    ) -> Self {
        let class_id = class_id_for(labels, label);
        if class_id.is_none() {
            log::warn!(
                "{}: label '{}' is not in the labels file; nothing will be counted",
                source.name(),
                label
            );
        }
        Self {
            name: source.name().to_string(),
            label: label.to_string(),
            class_id,
            source,
            stabilizer: CountStabilizer::new(debounce_threshold),
            current_frame: None,
            current_count: 0,
            samples: Vec::new(),
            sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    /// Read the next frame and keep it as the current frame.
    pub fn read(&mut self) -> Option<&RgbImage> {
        let frame = self.source.read()?;
        Some(self.current_frame.insert(frame))
    }

    pub fn current_frame(&self) -> Option<&RgbImage> {
        self.current_frame.as_ref()
    }

    /// Whether a detection counts toward this stream's label.
    pub fn matches(&self, detection: &RawDetection, prob_threshold: f32) -> bool {
        detection.confidence > prob_threshold && Some(detection.class_id) == self.class_id
    }

    pub fn observe(&mut self, raw_count: u32) -> Observation {
        self.observe_at(raw_count, chrono::Local::now().time())
    }

    /// Feed one frame's raw count, stamping any commit with `now`.
    pub fn observe_at(&mut self, raw_count: u32, now: NaiveTime) -> Observation {
        self.current_count = raw_count;
        let frame_no = self.stabilizer.frames();
        let mut observation = Observation {
            frame_no,
            new_logs: Vec::new(),
        };
        let Some(commit) = self.stabilizer.observe(raw_count) else {
            return observation;
        };
        if !commit.changed() {
            return observation;
        }

        let time = now.format("%H:%M:%S").to_string();
        for _ in 0..commit.new_objects() {
            observation
                .new_logs
                .push(format!("{} - {} detected on {}", time, self.label, self.name));
        }
        log::debug!(
            "{}: confirmed {} '{}' at frame {}",
            self.name,
            commit.count,
            self.label,
            frame_no
        );
        self.samples.push(CountSample {
            frame: frame_no,
            count: commit.count,
            time,
        });
        observation
    }

    /// Raw count of the last observed frame.
    pub fn current_count(&self) -> u32 {
        self.current_count
    }

    pub fn confirmed_count(&self) -> u32 {
        self.stabilizer.confirmed_count()
    }

    pub fn total_count(&self) -> u64 {
        self.stabilizer.total_count()
    }

    pub fn samples(&self) -> &[CountSample] {
        &self.samples
    }

    pub fn attach_sink(&mut self, sink: SinkHandle) {
        self.sink = Some(sink);
    }

    pub fn sink(&self) -> Result<&SinkHandle> {
        self.sink
            .as_ref()
            .ok_or_else(|| anyhow!("{}: no sink attached", self.name))
    }

    pub fn take_sink(&mut self) -> Option<SinkHandle> {
        self.sink.take()
    }
}

/// 1-based class id of `label`, taken from its first line in the labels file.
pub fn class_id_for(labels: &[String], label: &str) -> Option<u32> {
    labels
        .iter()
        .position(|candidate| candidate == label)
        .map(|index| index as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{SyntheticConfig, SyntheticSource};

    fn labels() -> Vec<String> {
        ["background", "person", "car", "person"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn stream(label: &str) -> Stream {
        let config = SyntheticConfig::from_url("stub://clip?frames=4&objects=1").unwrap();
        let source = FrameSource::synthetic("Video 0", SyntheticSource::new(config), false);
        Stream::new(label, &labels(), source, 5)
    }

    fn detection(class_id: u32, confidence: f32) -> RawDetection {
        RawDetection {
            batch: 0.0,
            class_id,
            confidence,
            xmin: 0.1,
            ymin: 0.1,
            xmax: 0.2,
            ymax: 0.2,
        }
    }

    #[test]
    fn labels_map_to_one_based_class_ids() {
        assert_eq!(class_id_for(&labels(), "background"), Some(1));
        assert_eq!(class_id_for(&labels(), "person"), Some(2));
        assert_eq!(class_id_for(&labels(), "truck"), None);
    }

    #[test]
    fn filter_uses_threshold_and_label() {
        let s = stream("car");
        assert!(s.matches(&detection(3, 0.5), 0.145));
        assert!(!s.matches(&detection(3, 0.145), 0.145));
        assert!(!s.matches(&detection(2, 0.9), 0.145));

        let unknown = stream("truck");
        assert!(!unknown.matches(&detection(0, 1.0), 0.145));
    }

    #[test]
    fn commit_emits_one_line_per_new_object() {
        let mut s = stream("person");
        let noon = NaiveTime::from_hms_opt(12, 30, 5).unwrap();
        let mut logs = Vec::new();
        for _ in 0..5 {
            logs.extend(s.observe_at(3, noon).new_logs);
        }
        assert_eq!(logs, vec!["12:30:05 - person detected on Video 0"; 3]);
        assert_eq!(s.total_count(), 3);
        assert_eq!(
            s.samples(),
            &[CountSample {
                frame: 4,
                count: 3,
                time: "12:30:05".to_string()
            }]
        );

        // A confirmed decrease is sampled but logs nothing.
        for _ in 0..5 {
            assert!(s.observe_at(1, noon).new_logs.is_empty());
        }
        assert_eq!(s.samples().len(), 2);
        assert_eq!(s.confirmed_count(), 1);
        assert_eq!(s.total_count(), 3);
    }

    #[test]
    fn frame_numbers_follow_observations() {
        let mut s = stream("person");
        let frame_nos: Vec<u64> = (0..4).map(|_| s.observe(0).frame_no).collect();
        assert_eq!(frame_nos, vec![0, 1, 2, 3]);
    }

    #[test]
    fn read_keeps_the_current_frame() {
        let mut s = stream("person");
        assert!(s.current_frame().is_none());
        let dims = s.read().map(|f| f.dimensions());
        assert_eq!(dims, Some((640, 480)));
        assert!(s.current_frame().is_some());
        while s.read().is_some() {}
        assert!(s.is_closed());
        // The last frame stays available for a lagging result.
        assert!(s.current_frame().is_some());
    }
}
