//! Per-stream frame sinks.
//!
//! Each stream (plus the statistics view) gets one worker thread that drains a
//! bounded queue in FIFO order and hands every frame to its [`SinkTarget`].
//! The orchestrator is the only producer. A [`SinkMessage::Shutdown`] sentinel
//! stops the worker after everything queued before it has been written.

pub mod encoder;
pub mod target;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbImage;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::monitor::Session;

pub use encoder::{EncoderFactory, FfmpegEncoderFactory, VideoEncoder};
pub use target::{EncoderTarget, PreviewTarget, SinkTarget};

pub enum SinkMessage {
    Frame {
        frame_no: u64,
        image: RgbImage,
        /// Rolling-log entries produced with this frame.
        new_logs: Vec<String>,
    },
    Shutdown,
}

/// What a sink worker did before it stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub frames: u64,
}

/// Drain `queue` into `target` until a shutdown sentinel arrives or every
/// producer is gone, then release the target.
///
/// With `fps > 0` each iteration is padded to `1 / fps` seconds, counting the
/// time spent waiting on the queue.
pub fn run_sink(
    name: &str,
    queue: Receiver<SinkMessage>,
    mut target: Box<dyn SinkTarget>,
    session: Arc<Session>,
    fps: f64,
) -> Result<SinkReport> {
    let period = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
    let mut report = SinkReport::default();

    let outcome = loop {
        let started = Instant::now();
        let (frame_no, image, new_logs) = match queue.recv() {
            Ok(SinkMessage::Frame {
                frame_no,
                image,
                new_logs,
            }) => (frame_no, image, new_logs),
            Ok(SinkMessage::Shutdown) => break Ok(()),
            Err(_) => {
                log::debug!("{}: producer gone without shutdown", name);
                break Ok(());
            }
        };

        if let Err(e) = target.write(frame_no, &image) {
            break Err(e.context(format!("{}: failed to write frame {}", name, frame_no)));
        }
        report.frames += 1;

        if !new_logs.is_empty() {
            if let Err(e) = session.rolling_log.append_all(new_logs) {
                break Err(e);
            }
        }

        if let Some(period) = period {
            if let Some(remaining) = period.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    };

    let released = target.release();
    outcome?;
    released.with_context(|| format!("{}: failed to release sink", name))?;
    log::debug!("{}: sink stopped after {} frames", name, report.frames);
    Ok(report)
}

/// Producer end of one sink plus its worker thread.
///
/// Dropping the handle sends the shutdown sentinel and joins the worker, so
/// targets are released on every exit path.
pub struct SinkHandle {
    name: String,
    queue: Sender<SinkMessage>,
    worker: Option<JoinHandle<Result<SinkReport>>>,
}

impl SinkHandle {
    pub fn spawn(
        name: &str,
        capacity: usize,
        target: Box<dyn SinkTarget>,
        session: Arc<Session>,
        fps: f64,
    ) -> Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        let worker_name = name.to_string();
        let worker = std::thread::Builder::new()
            .name(format!("sink {}", name))
            .spawn(move || run_sink(&worker_name, rx, target, session, fps))
            .with_context(|| format!("failed to spawn sink worker for {}", name))?;
        Ok(Self {
            name: name.to_string(),
            queue: tx,
            worker: Some(worker),
        })
    }

    /// Queue a frame, blocking while the queue is full.
    pub fn send(&self, frame_no: u64, image: RgbImage, new_logs: Vec<String>) -> Result<()> {
        self.queue
            .send(SinkMessage::Frame {
                frame_no,
                image,
                new_logs,
            })
            .map_err(|_| anyhow!("{}: sink worker stopped", self.name))
    }

    /// Queue the shutdown sentinel behind any pending frames.
    pub fn shutdown(&self) {
        if self.queue.send(SinkMessage::Shutdown).is_err() {
            log::debug!("{}: sink worker already stopped", self.name);
        }
    }

    /// Wait for the worker to finish. Call [`SinkHandle::shutdown`] first.
    pub fn join(mut self) -> Result<SinkReport> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<SinkReport> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow!("{}: sink worker panicked", self.name))?,
            None => Ok(SinkReport::default()),
        }
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
            if let Err(e) = self.join_worker() {
                log::error!("{:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        frames: Vec<u64>,
        releases: usize,
    }

    struct RecordingTarget {
        recorded: Arc<Mutex<Recorded>>,
        delay: Duration,
    }

    impl SinkTarget for RecordingTarget {
        fn write(&mut self, frame_no: u64, _image: &RgbImage) -> Result<()> {
            // Uneven per-frame latency.
            std::thread::sleep(self.delay * (frame_no % 3) as u32);
            self.recorded.lock().unwrap().frames.push(frame_no);
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.recorded.lock().unwrap().releases += 1;
            Ok(())
        }
    }

    fn recording(delay: Duration) -> (Box<dyn SinkTarget>, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let target = RecordingTarget {
            recorded: Arc::clone(&recorded),
            delay,
        };
        (Box::new(target), recorded)
    }

    #[test]
    fn frames_arrive_in_send_order() -> Result<()> {
        let session = Arc::new(Session::new(4));
        let (target, recorded) = recording(Duration::from_millis(2));
        let sink = SinkHandle::spawn("Video 0", 2, target, session, 0.0)?;
        for frame_no in 0..12 {
            sink.send(frame_no, RgbImage::new(2, 2), Vec::new())?;
        }
        sink.shutdown();
        let report = sink.join()?;

        assert_eq!(report.frames, 12);
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.frames, (0..12).collect::<Vec<_>>());
        assert_eq!(recorded.releases, 1);
        Ok(())
    }

    #[test]
    fn log_deltas_reach_the_rolling_log() -> Result<()> {
        let session = Arc::new(Session::new(8));
        let (target, _) = recording(Duration::ZERO);
        let sink = SinkHandle::spawn("Video 1", 4, target, Arc::clone(&session), 0.0)?;
        sink.send(0, RgbImage::new(1, 1), vec!["first".into(), "second".into()])?;
        sink.send(1, RgbImage::new(1, 1), Vec::new())?;
        sink.send(2, RgbImage::new(1, 1), vec!["third".into()])?;
        sink.shutdown();
        sink.join()?;
        assert_eq!(
            session.rolling_log.snapshot()?,
            vec!["first", "second", "third"]
        );
        Ok(())
    }

    #[test]
    fn paced_sink_holds_the_source_rate() -> Result<()> {
        let session = Arc::new(Session::new(1));
        let (target, _) = recording(Duration::ZERO);
        let sink = SinkHandle::spawn("paced", 8, target, session, 100.0)?;
        let started = Instant::now();
        for frame_no in 0..5 {
            sink.send(frame_no * 3, RgbImage::new(1, 1), Vec::new())?;
        }
        sink.shutdown();
        sink.join()?;
        assert!(started.elapsed() >= Duration::from_millis(45));
        Ok(())
    }

    #[test]
    fn dropping_the_handle_releases_the_target() {
        let session = Arc::new(Session::new(1));
        let (target, recorded) = recording(Duration::ZERO);
        {
            let sink = SinkHandle::spawn("dropped", 4, target, session, 0.0).unwrap();
            sink.send(0, RgbImage::new(1, 1), Vec::new()).unwrap();
        }
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.frames, vec![0]);
        assert_eq!(recorded.releases, 1);
    }

    #[test]
    fn write_failures_stop_the_worker_and_surface_on_join() -> Result<()> {
        struct Failing;
        impl SinkTarget for Failing {
            fn write(&mut self, _: u64, _: &RgbImage) -> Result<()> {
                Err(anyhow!("disk full"))
            }
            fn release(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let session = Arc::new(Session::new(1));
        let sink = SinkHandle::spawn("failing", 1, Box::new(Failing), session, 0.0)?;
        sink.send(0, RgbImage::new(1, 1), Vec::new())?;
        // The worker is gone once the failure is processed; later sends error.
        let mut send_failed = false;
        for frame_no in 1..100 {
            if sink.send(frame_no, RgbImage::new(1, 1), Vec::new()).is_err() {
                send_failed = true;
                break;
            }
        }
        assert!(send_failed);
        sink.shutdown();
        let err = sink.join().unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
        Ok(())
    }
}
