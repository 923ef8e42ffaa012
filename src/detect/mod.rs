mod backends;
mod engine;
mod result;
mod stage;

pub use backends::{open_engine, StubEngine};
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use engine::{Device, InferenceEngine};
pub use result::{Detections, PixelBox, RawDetection};
pub use stage::{DetectionStage, Slot, SlotPair};
