//! Two-slot asynchronous detection stage.
//!
//! The engine runs on a dedicated worker thread. `submit` hands a tensor to
//! that thread and returns at once; `wait` blocks until the given slot's
//! request has finished. Each slot holds at most one request: it must be
//! consumed with `wait` before the slot is submitted to again.

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::thread::JoinHandle;

use crate::detect::engine::InferenceEngine;
use crate::detect::result::Detections;
use crate::frame::{InputSpec, Tensor};

/// One of the two reusable request slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Which physical slot currently plays "current" and which plays "next".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotPair {
    current: Slot,
}

impl SlotPair {
    pub fn new() -> Self {
        Self { current: Slot::A }
    }

    pub fn current(&self) -> Slot {
        self.current
    }

    pub fn next(&self) -> Slot {
        self.current.other()
    }

    pub fn swap(&mut self) {
        self.current = self.current.other();
    }
}

impl Default for SlotPair {
    fn default() -> Self {
        Self::new()
    }
}

struct Job {
    slot: Slot,
    tensor: Tensor,
}

/// Detection stage wrapping an [`InferenceEngine`] with two request slots.
pub struct DetectionStage {
    engine_name: &'static str,
    input: InputSpec,
    jobs: Option<Sender<Job>>,
    results: [Receiver<Result<Detections>>; 2],
    inflight: [bool; 2],
    worker: Option<JoinHandle<()>>,
}

impl DetectionStage {
    /// Warm the engine up and move it onto its worker thread.
    pub fn start(mut engine: Box<dyn InferenceEngine>) -> Result<Self> {
        engine.warm_up().context("engine warm-up failed")?;
        let engine_name = engine.name();
        let input = engine.input_spec();

        let (job_tx, job_rx) = unbounded::<Job>();
        let (a_tx, a_rx) = bounded(1);
        let (b_tx, b_rx) = bounded(1);
        let worker = std::thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || run_engine(engine, job_rx, [a_tx, b_tx]))
            .context("spawn inference worker")?;

        Ok(Self {
            engine_name,
            input,
            jobs: Some(job_tx),
            results: [a_rx, b_rx],
            inflight: [false; 2],
            worker: Some(worker),
        })
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine_name
    }

    /// Input geometry callers must preprocess frames to.
    pub fn input_spec(&self) -> InputSpec {
        self.input
    }

    pub fn is_inflight(&self, slot: Slot) -> bool {
        self.inflight[slot.index()]
    }

    /// Queue `tensor` for inference in `slot` without blocking.
    pub fn submit(&mut self, slot: Slot, tensor: Tensor) -> Result<()> {
        if self.inflight[slot.index()] {
            bail!("slot {:?} still holds an unconsumed request", slot);
        }
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("detection stage already released"))?;
        jobs.send(Job { slot, tensor })
            .map_err(|_| anyhow!("inference worker stopped"))?;
        self.inflight[slot.index()] = true;
        Ok(())
    }

    /// Block until `slot` completes. `Ok(None)` when nothing was submitted to it.
    pub fn wait(&mut self, slot: Slot) -> Result<Option<Detections>> {
        if !self.inflight[slot.index()] {
            return Ok(None);
        }
        let result = self.results[slot.index()]
            .recv()
            .map_err(|_| anyhow!("inference worker stopped before slot {:?} completed", slot));
        self.inflight[slot.index()] = false;
        result?.map(Some)
    }

    /// Stop the worker thread and release the engine.
    pub fn release(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        // Dropping the job sender ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("inference worker panicked"))?;
            log::info!("released '{}' engine", self.engine_name);
        }
        Ok(())
    }
}

impl Drop for DetectionStage {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("detection stage shutdown failed: {:#}", e);
        }
    }
}

fn run_engine(
    mut engine: Box<dyn InferenceEngine>,
    jobs: Receiver<Job>,
    results: [Sender<Result<Detections>>; 2],
) {
    for job in jobs {
        let result = engine.infer(&job.tensor);
        if results[job.slot.index()].send(result).is_err() {
            break;
        }
    }
    log::debug!("inference worker for '{}' stopped", engine.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::engine::Device;
    use crate::detect::result::RawDetection;
    use crate::frame::ChannelOrder;
    use std::time::Duration;

    /// Echoes the first tensor value back as the class id.
    struct EchoEngine {
        fail_on: Option<u32>,
        latency: Duration,
    }

    impl InferenceEngine for EchoEngine {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn input_spec(&self) -> InputSpec {
            InputSpec {
                width: 1,
                height: 1,
                channel_order: ChannelOrder::Rgb,
            }
        }

        fn supports(&self, _device: Device) -> bool {
            true
        }

        fn infer(&mut self, tensor: &Tensor) -> Result<Detections> {
            std::thread::sleep(self.latency);
            let tag = tensor.data[0] as u32;
            if self.fail_on == Some(tag) {
                bail!("device lost");
            }
            Ok(vec![RawDetection {
                batch: 0.0,
                class_id: tag,
                confidence: 1.0,
                xmin: 0.0,
                ymin: 0.0,
                xmax: 1.0,
                ymax: 1.0,
            }])
        }
    }

    fn tensor(tag: u32) -> Tensor {
        Tensor {
            width: 1,
            height: 1,
            data: vec![tag as f32; 3],
        }
    }

    fn stage(fail_on: Option<u32>) -> DetectionStage {
        DetectionStage::start(Box::new(EchoEngine {
            fail_on,
            latency: Duration::from_millis(5),
        }))
        .unwrap()
    }

    #[test]
    fn slot_pair_alternates_roles() {
        let mut pair = SlotPair::new();
        assert_eq!((pair.current(), pair.next()), (Slot::A, Slot::B));
        pair.swap();
        assert_eq!((pair.current(), pair.next()), (Slot::B, Slot::A));
        pair.swap();
        assert_eq!(pair.current(), Slot::A);
    }

    #[test]
    fn results_are_returned_per_slot() -> Result<()> {
        let mut stage = stage(None);
        stage.submit(Slot::A, tensor(7))?;
        stage.submit(Slot::B, tensor(9))?;
        assert_eq!(stage.wait(Slot::B)?.unwrap()[0].class_id, 9);
        assert_eq!(stage.wait(Slot::A)?.unwrap()[0].class_id, 7);
        stage.release()
    }

    #[test]
    fn waiting_on_an_idle_slot_returns_none() -> Result<()> {
        let mut stage = stage(None);
        assert!(stage.wait(Slot::A)?.is_none());
        stage.submit(Slot::A, tensor(1))?;
        assert!(stage.is_inflight(Slot::A));
        assert!(stage.wait(Slot::A)?.is_some());
        assert!(!stage.is_inflight(Slot::A));
        assert!(stage.wait(Slot::A)?.is_none());
        Ok(())
    }

    #[test]
    fn resubmitting_an_unconsumed_slot_is_rejected() -> Result<()> {
        let mut stage = stage(None);
        stage.submit(Slot::B, tensor(1))?;
        assert!(stage.submit(Slot::B, tensor(2)).is_err());
        assert_eq!(stage.wait(Slot::B)?.unwrap()[0].class_id, 1);
        stage.submit(Slot::B, tensor(2))?;
        assert_eq!(stage.wait(Slot::B)?.unwrap()[0].class_id, 2);
        Ok(())
    }

    #[test]
    fn engine_errors_surface_from_wait() -> Result<()> {
        let mut stage = stage(Some(3));
        stage.submit(Slot::A, tensor(3))?;
        let err = stage.wait(Slot::A).unwrap_err();
        assert!(err.to_string().contains("device lost"));
        // The slot is free again and the worker keeps running.
        stage.submit(Slot::A, tensor(4))?;
        assert_eq!(stage.wait(Slot::A)?.unwrap()[0].class_id, 4);
        Ok(())
    }
}
