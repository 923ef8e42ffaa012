//! Round-robin read / infer / annotate / dispatch loop.
//!
//! Every round visits the streams in configuration order. Each visit reads one
//! frame, submits it to the detection stage and consumes one finished result.
//! With pipelining on, the frame goes to the "next" slot while the "current"
//! slot (submitted one visit earlier) is waited on, so inference for one
//! stream overlaps with post-processing for the previous one. The consumed
//! result therefore belongs to the previous stream; see [`result_owner`].
//!
//! Streams whose capture could not be opened are reported but never take
//! part in the rotation.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::control::Controls;
use super::session::Session;
use super::stream::{CountSample, Stream};
use crate::annotate::{live_stats_size, Annotator, Overlay};
use crate::config::{load_labels, MonitorConfig, MonitorSettings};
use crate::detect::{open_engine, DetectionStage, Detections, Device, InferenceEngine, SlotPair};
use crate::frame::{preprocess, resize_to, InputSpec};
use crate::ingest::FrameSource;
use crate::output::{
    sanitize_name, CountData, OutputDir, ProgressFile, INFERENCE_PROGRESS_FILE,
    RETIME_PROGRESS_FILE, STATS_NAME,
};
use crate::sink::{EncoderFactory, EncoderTarget, PreviewTarget, SinkHandle, SinkReport, SinkTarget};

/// Index of the stream whose result is consumed on the visit to stream `idx`.
///
/// Pipelined with more than one stream, results lag one visit behind:
/// `(idx - 1) mod streams`. Otherwise each visit consumes its own result.
pub fn result_owner(idx: usize, streams: usize, pipelined: bool) -> usize {
    if pipelined && streams > 1 {
        (idx + streams - 1) % streams
    } else {
        idx
    }
}

/// Where annotated frames go.
pub enum OutputMode {
    /// Encode each stream and the statistics view into `dir`.
    Directory {
        dir: PathBuf,
        encoders: Arc<dyn EncoderFactory>,
    },
    /// Keep `<preview_dir>/<name>.jpg` updated with each stream's latest frame.
    Live { preview_dir: PathBuf },
}

enum Output {
    Directory {
        dir: OutputDir,
        encoders: Arc<dyn EncoderFactory>,
    },
    Live {
        preview_dir: PathBuf,
    },
}

impl Output {
    fn target(
        &self,
        name: &str,
        encoder_fps: f64,
        session: &Arc<Session>,
    ) -> Result<Box<dyn SinkTarget>> {
        Ok(match self {
            Output::Directory { dir, encoders } => Box::new(EncoderTarget::new(
                dir.temp_video(name),
                encoder_fps,
                Arc::clone(encoders),
            )),
            Output::Live { preview_dir } => Box::new(PreviewTarget::new(
                preview_dir,
                &sanitize_name(name),
                Arc::clone(session),
            )?),
        })
    }

    fn is_live(&self) -> bool {
        matches!(self, Output::Live { .. })
    }
}

#[derive(Clone, Debug)]
pub struct StreamReport {
    pub name: String,
    pub label: String,
    pub frames_read: u64,
    /// Frames the stream's sink wrote before it stopped.
    pub frames_written: u64,
    pub total_count: u64,
    pub samples: Vec<CountSample>,
}

#[derive(Clone, Debug)]
pub struct MonitorReport {
    pub rounds: u64,
    pub average_fps: f64,
    /// The loop stopped on an exit request rather than end of input.
    pub exited: bool,
    pub pipelined: bool,
    pub streams: Vec<StreamReport>,
    pub stats_frames: u64,
}

enum Step {
    Skipped,
    Processed,
    Exit,
}

pub struct Monitor {
    streams: Vec<Stream>,
    /// Indices of the streams visited each round, in configuration order.
    rotation: Vec<usize>,
    stats: Option<SinkHandle>,
    stage: Option<DetectionStage>,
    session: Arc<Session>,
    annotator: Annotator,
    controls: Controls,
    output: Output,
    input: InputSpec,
    prob_threshold: f32,
    encoder_fps: f64,
    pipelined: bool,
    slots: SlotPair,
    stats_frame_no: u64,
    progress: Option<ProgressFile>,
}

impl Monitor {
    /// Load labels and the model, open every configured source and start the
    /// sinks. A source that fails to open only closes its own stream; every
    /// other failure here happens before a single frame is processed.
    pub fn open(
        config: &MonitorConfig,
        device: Device,
        settings: &MonitorSettings,
        mode: OutputMode,
        controls: Controls,
    ) -> Result<Self> {
        let labels = load_labels(&config.labels_path)?;
        let engine = open_engine(&config.model_path, &config.weights_path, device)?;
        let sources = config
            .streams
            .iter()
            .map(|stream| {
                let source = FrameSource::open(&stream.name, &stream.source, settings.loop_video)
                    .unwrap_or_else(|e| {
                        FrameSource::unavailable(&stream.name, &stream.source, &format!("{:#}", e))
                    });
                (stream.required_label.clone(), source)
            })
            .collect::<Vec<_>>();
        Self::assemble(engine, &labels, sources, settings, mode, controls)
    }

    /// Build a monitor from an engine and `(label, source)` pairs. Fails when
    /// no source is open.
    pub fn assemble(
        engine: Box<dyn InferenceEngine>,
        labels: &[String],
        sources: Vec<(String, FrameSource)>,
        settings: &MonitorSettings,
        mode: OutputMode,
        controls: Controls,
    ) -> Result<Self> {
        if sources.is_empty() {
            bail!("no streams to monitor");
        }
        let rotation: Vec<usize> = sources
            .iter()
            .enumerate()
            .filter(|(_, (_, source))| !source.is_closed())
            .map(|(idx, _)| idx)
            .collect();
        if rotation.is_empty() {
            bail!("none of the {} configured sources could be opened", sources.len());
        }
        let stage = DetectionStage::start(engine)?;
        let input = stage.input_spec();
        log::info!(
            "monitoring {} of {} streams with the '{}' engine",
            rotation.len(),
            sources.len(),
            stage.engine_name()
        );
        let session = Arc::new(Session::for_view_height(input.height));
        let annotator = Annotator::load(settings.font_path.as_deref())?;

        let (output, progress) = match mode {
            OutputMode::Directory { dir, encoders } => {
                let dir = OutputDir::create(&dir)?;
                let progress = dir.progress(INFERENCE_PROGRESS_FILE)?;
                log::info!("writing results into {}", dir.root().display());
                (Output::Directory { dir, encoders }, Some(progress))
            }
            OutputMode::Live { preview_dir } => {
                log::info!("live preview in {}", preview_dir.display());
                (Output::Live { preview_dir }, None)
            }
        };

        let mut streams = Vec::with_capacity(sources.len());
        for (label, source) in sources {
            let fps = source.fps();
            let mut stream = Stream::new(&label, labels, source, settings.debounce_threshold);
            if stream.is_closed() {
                streams.push(stream);
                continue;
            }
            let target = output.target(stream.name(), settings.encoder_fps, &session)?;
            let sink = SinkHandle::spawn(
                stream.name(),
                settings.queue_size,
                target,
                Arc::clone(&session),
                fps,
            )?;
            stream.attach_sink(sink);
            streams.push(stream);
        }
        let stats_target = output.target(STATS_NAME, settings.encoder_fps, &session)?;
        let stats = SinkHandle::spawn(
            STATS_NAME,
            settings.queue_size,
            stats_target,
            Arc::clone(&session),
            0.0,
        )?;

        Ok(Self {
            streams,
            rotation,
            stats: Some(stats),
            stage: Some(stage),
            session,
            annotator,
            controls,
            output,
            input,
            prob_threshold: settings.prob_threshold,
            encoder_fps: settings.encoder_fps,
            pipelined: true,
            slots: SlotPair::new(),
            stats_frame_no: 0,
            progress,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_pipelined(&self) -> bool {
        self.pipelined
    }

    /// Start in sequential mode instead of pipelined mode.
    pub fn set_pipelined(&mut self, pipelined: bool) {
        self.pipelined = pipelined;
    }

    /// Run until every stream is closed or an exit is requested, then shut
    /// the sinks and the detection stage down.
    pub fn run(mut self) -> Result<MonitorReport> {
        let mut rounds = 0u64;
        let mut fps_sum = 0.0;
        let mut exited = false;

        'rounds: while !self.streams.iter().all(Stream::is_closed) {
            let started = Instant::now();
            let mut processed = 0usize;
            for position in 0..self.rotation.len() {
                match self.step(position)? {
                    Step::Skipped => {}
                    Step::Processed => processed += 1,
                    Step::Exit => {
                        log::info!("exit requested, stopping");
                        exited = true;
                        break 'rounds;
                    }
                }
            }
            // The round that discovers the last end of stream did no work.
            if processed == 0 {
                continue;
            }
            rounds += 1;
            fps_sum += 1.0 / started.elapsed().as_secs_f64().max(f64::EPSILON);
            self.finish_round()?;
        }

        self.finish(rounds, fps_sum, exited)
    }

    /// Visit the stream at `position` in the rotation.
    fn step(&mut self, position: usize) -> Result<Step> {
        let idx = self.rotation[position];
        let tensor = match self.streams[idx].read() {
            Some(frame) => preprocess(frame, &self.input)?,
            None => return Ok(Step::Skipped),
        };

        let pipelined = self.pipelined;
        let submit_slot = if pipelined {
            self.slots.next()
        } else {
            self.slots.current()
        };
        let current = self.slots.current();
        let detections = {
            let stage = self.stage_mut()?;
            stage.submit(submit_slot, tensor)?;
            stage.wait(current)?
        };
        if let Some(detections) = detections {
            let owner = self.rotation[result_owner(position, self.rotation.len(), pipelined)];
            self.consume(owner, &detections)?;
        }

        if self.controls.exit_requested() {
            return Ok(Step::Exit);
        }
        if self.controls.take_toggle() {
            self.toggle_pipelining(idx)?;
        }
        if self.pipelined {
            self.slots.swap();
        }
        Ok(Step::Processed)
    }

    /// Count, annotate and dispatch one result on behalf of stream `owner`.
    fn consume(&mut self, owner: usize, detections: &Detections) -> Result<()> {
        let prob_threshold = self.prob_threshold;
        let pipelined = self.pipelined;
        let (width, height) = (self.input.width, self.input.height);

        let stream = &mut self.streams[owner];
        let (native_w, native_h) = stream.source().dimensions();
        let boxes: Vec<_> = detections
            .iter()
            .filter(|detection| stream.matches(detection, prob_threshold))
            .map(|detection| detection.scaled(native_w, native_h))
            .collect();
        let observation = stream.observe(boxes.len() as u32);
        log::debug!(
            "{}: frame {} has {} {}, confirmed {}",
            stream.name(),
            observation.frame_no,
            stream.current_count(),
            stream.label(),
            stream.confirmed_count()
        );

        if let Some(frame) = stream.current_frame() {
            let mut annotated = frame.clone();
            self.annotator.draw_boxes(&mut annotated, &boxes);
            let mut annotated = resize_to(&annotated, width, height);
            self.annotator.draw_overlay(
                &mut annotated,
                &Overlay {
                    pipelined,
                    label: stream.label(),
                    total: stream.total_count(),
                    current: stream.confirmed_count(),
                },
            );
            stream
                .sink()?
                .send(observation.frame_no, annotated, observation.new_logs)?;
        }

        if self.output.is_live() {
            if let Some(entries) = self.session.rolling_log.snapshot_if_changed()? {
                let (w, h) = live_stats_size(width, height, self.streams.len());
                let image = self.annotator.render_stats(&entries, w, h);
                self.send_stats(image)?;
            }
        }
        Ok(())
    }

    fn toggle_pipelining(&mut self, idx: usize) -> Result<()> {
        if self.pipelined {
            // Sequential mode never waits on "next"; collect what was just
            // submitted there before leaving pipelined mode.
            let pending = self.slots.next();
            if let Some(detections) = self.stage_mut()?.wait(pending)? {
                self.consume(idx, &detections)?;
            }
            self.pipelined = false;
        } else {
            self.pipelined = true;
        }
        log::info!(
            "switched to {} mode",
            if self.pipelined { "async" } else { "sync" }
        );
        Ok(())
    }

    fn finish_round(&mut self) -> Result<()> {
        if !self.output.is_live() {
            let entries = self.session.rolling_log.snapshot()?;
            let image = self
                .annotator
                .render_stats(&entries, self.input.width, self.input.height);
            self.send_stats(image)?;
        }
        if let Some(progress) = self.progress.as_mut() {
            let (done, total) = self
                .streams
                .iter()
                .filter_map(|stream| {
                    let source = stream.source();
                    source
                        .frame_count()
                        .map(|count| (source.frames_read().min(count), count))
                })
                .fold((0, 0), |(done, total), (d, t)| (done + d, total + t));
            progress.update(done, total)?;
        }
        Ok(())
    }

    fn send_stats(&mut self, image: image::RgbImage) -> Result<()> {
        let stats = self
            .stats
            .as_ref()
            .ok_or_else(|| anyhow!("statistics sink already stopped"))?;
        stats.send(self.stats_frame_no, image, Vec::new())?;
        self.stats_frame_no += 1;
        Ok(())
    }

    fn stage_mut(&mut self) -> Result<&mut DetectionStage> {
        self.stage
            .as_mut()
            .ok_or_else(|| anyhow!("detection stage already released"))
    }

    fn finish(mut self, rounds: u64, fps_sum: f64, exited: bool) -> Result<MonitorReport> {
        // Sentinels first so every sink drains concurrently.
        for stream in &self.streams {
            if let Ok(sink) = stream.sink() {
                sink.shutdown();
            }
        }
        if let Some(stats) = &self.stats {
            stats.shutdown();
        }

        let mut streams = Vec::with_capacity(self.streams.len());
        let mut data = CountData::default();
        for (index, stream) in self.streams.iter_mut().enumerate() {
            let written = match stream.take_sink() {
                Some(sink) => sink.join()?,
                None => SinkReport::default(),
            };
            data.push_stream(index, stream.samples(), stream.total_count());
            streams.push(StreamReport {
                name: stream.name().to_string(),
                label: stream.label().to_string(),
                frames_read: stream.source().frames_read(),
                frames_written: written.frames,
                total_count: stream.total_count(),
                samples: stream.samples().to_vec(),
            });
        }
        let stats_frames = match self.stats.take() {
            Some(stats) => stats.join()?.frames,
            None => 0,
        };

        // Captures first, then the engine.
        let names: Vec<String> = self.streams.iter().map(|s| s.name().to_string()).collect();
        self.streams.clear();
        if let Some(stage) = self.stage.take() {
            stage.release()?;
        }

        let average_fps = if rounds > 0 {
            fps_sum / rounds as f64
        } else {
            0.0
        };
        let report = MonitorReport {
            rounds,
            average_fps,
            exited,
            pipelined: self.pipelined,
            streams,
            stats_frames,
        };
        if exited {
            return Ok(report);
        }

        log::info!("average fps over {} rounds: {:.2}", rounds, average_fps);
        if let Output::Directory { dir, encoders } = &self.output {
            dir.write_fps(average_fps)?;
            let mut videos = names;
            videos.push(STATS_NAME.to_string());
            retime_videos(dir, encoders.as_ref(), &videos, self.encoder_fps, average_fps)?;
            dir.write_data(&data)?;
        }
        Ok(report)
    }
}

/// Rewrite every temporary video so it plays back at the measured rate.
fn retime_videos(
    dir: &OutputDir,
    encoders: &dyn EncoderFactory,
    names: &[String],
    encoder_fps: f64,
    average_fps: f64,
) -> Result<()> {
    let mut progress = dir.progress(RETIME_PROGRESS_FILE)?;
    if average_fps <= 0.0 {
        log::warn!("no rounds completed; videos keep their nominal rate");
        return Ok(());
    }
    let pts_factor = encoder_fps / average_fps;
    for (done, name) in names.iter().enumerate() {
        let temp = dir.temp_video(name);
        if temp.exists() {
            let video = dir.video(name);
            match encoders.retime(&temp, &video, pts_factor) {
                Ok(()) => {
                    std::fs::remove_file(&temp)
                        .with_context(|| format!("failed to remove {}", temp.display()))?;
                    log::info!("{}: wrote {}", name, video.display());
                }
                Err(e) => log::warn!(
                    "{}: retime failed, keeping {}: {:#}",
                    name,
                    temp.display(),
                    e
                ),
            }
        } else {
            log::debug!("{}: no frames were encoded", name);
        }
        progress.update(done as u64 + 1, names.len() as u64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipelined_results_lag_one_stream() {
        let owners: Vec<usize> = (0..3).map(|idx| result_owner(idx, 3, true)).collect();
        assert_eq!(owners, vec![2, 0, 1]);
    }

    #[test]
    fn sequential_results_belong_to_the_submitter() {
        for idx in 0..3 {
            assert_eq!(result_owner(idx, 3, false), idx);
        }
    }

    #[test]
    fn single_stream_owns_every_result() {
        assert_eq!(result_owner(0, 1, true), 0);
        assert_eq!(result_owner(0, 1, false), 0);
    }

    #[test]
    fn two_streams_alternate() {
        assert_eq!(result_owner(0, 2, true), 1);
        assert_eq!(result_owner(1, 2, true), 0);
    }
}
