//! The multi-stream monitoring pipeline: per-stream state, debounce, the
//! shared rolling log and the orchestrating loop.

pub mod control;
pub mod orchestrator;
pub mod rolling_log;
pub mod session;
pub mod stabilizer;
pub mod stream;

pub use control::{ControlInput, Controls};
pub use orchestrator::{result_owner, Monitor, MonitorReport, OutputMode, StreamReport};
pub use rolling_log::RollingLog;
pub use session::Session;
pub use stabilizer::{Commit, CountStabilizer};
pub use stream::{CountSample, Observation, Stream};
