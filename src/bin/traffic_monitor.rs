//! traffic_monitor - count labelled objects across cameras and video files
//!
//! Reads the configuration file, runs every stream through the shared
//! detection stage and either writes annotated videos into `--output_dir` or
//! keeps per-stream preview snapshots updated.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use traffic_monitor::sink::FfmpegEncoderFactory;
use traffic_monitor::{Controls, Device, Monitor, MonitorConfig, MonitorSettings, OutputMode};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory to write annotated videos into. Without it frames go to the
    /// live preview directory.
    #[arg(short = 'o', long = "output_dir")]
    output_dir: Option<PathBuf>,
    /// Device to use for inference (CPU, GPU or MYRIAD).
    #[arg(short = 'd', long, default_value = "GPU")]
    device: String,
    /// Configuration file to use.
    #[arg(short = 'c', long, default_value = "./resources/conf.txt")]
    conf: PathBuf,
    /// Start with pipelining disabled.
    #[arg(long)]
    sync: bool,
    /// ffmpeg executable used for encoding and retiming.
    #[arg(long, default_value = "ffmpeg", env = "TRAFFIC_MONITOR_FFMPEG")]
    ffmpeg: PathBuf,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device: Device = match args.device.parse() {
        Ok(device) => device,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let is_tty = std::io::stderr().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, args.output_dir.is_none());

    let (config, settings) = {
        let _stage = ui.stage("Load configuration");
        (MonitorConfig::load(&args.conf)?, MonitorSettings::load()?)
    };

    let mode = match &args.output_dir {
        Some(dir) => OutputMode::Directory {
            dir: dir.clone(),
            encoders: Arc::new(FfmpegEncoderFactory::with_program(&args.ffmpeg)),
        },
        None => OutputMode::Live {
            preview_dir: settings.preview_dir.clone(),
        },
    };

    let controls = Controls::new();
    controls.install_signal_handler()?;

    let mut monitor = {
        let _stage = ui.stage(&format!("Open {} streams on {}", config.streams.len(), device));
        Monitor::open(&config, device, &settings, mode, controls.clone())?
    };
    monitor.set_pipelined(!args.sync);

    if args.output_dir.is_none() {
        controls.spawn_stdin_listener()?;
        eprintln!("Type q + Enter (or press Ctrl-C) to stop, t + Enter to toggle async mode");
    }

    let report = {
        let _stage = ui.stage("Monitor streams");
        monitor.run()?
    };

    for stream in &report.streams {
        log::info!(
            "{}: {} frames read, {} written, total {} count {}",
            stream.name,
            stream.frames_read,
            stream.frames_written,
            stream.label,
            stream.total_count
        );
    }
    if report.exited {
        eprintln!("Finished (stopped early)");
    } else {
        eprintln!("total_fps was {:.2}", report.average_fps);
    }
    Ok(())
}
