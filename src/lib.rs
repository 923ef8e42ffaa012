//! Traffic Monitor
//!
//! Multi-stream object counting over cameras and video files.
//!
//! # Architecture
//!
//! One control thread drives the [`monitor::Monitor`] loop. It reads a frame
//! from every stream in turn and runs it through a two-slot asynchronous
//! [`detect::DetectionStage`]. With pipelining on, inference for one stream
//! overlaps with post-processing of the previous stream's result.
//!
//! Per-stream object counts are debounced by a [`monitor::CountStabilizer`]
//! before they reach the running totals. Annotated frames go to one sink
//! worker per stream over a bounded queue, and a shared
//! [`monitor::RollingLog`] collects recent detection events for the
//! statistics view.
//!
//! # Module Structure
//!
//! - `config`: configuration file, labels file and runtime settings
//! - `ingest`: frame sources (synthetic, video files, V4L2 cameras)
//! - `frame`: preprocessing into planar engine tensors
//! - `detect`: inference engines and the two-slot detection stage
//! - `monitor`: streams, debounce, rolling log, orchestrator
//! - `annotate`: boxes, counters and the statistics view
//! - `sink`: per-stream writer threads and video encoders
//! - `output`: files written into the output directory

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod output;
pub mod sink;

pub use config::{MonitorConfig, MonitorSettings, StreamConfig};
pub use detect::{Device, InferenceEngine};
pub use ingest::{FrameSource, SourceSpec};
pub use monitor::{Controls, Monitor, MonitorReport, OutputMode};
