use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use traffic_monitor::{
    Controls, Device, Monitor, MonitorConfig, MonitorSettings, OutputMode, SourceSpec,
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRAFFIC_MONITOR_SETTINGS",
        "TRAFFIC_MONITOR_PROB_THRESHOLD",
        "TRAFFIC_MONITOR_QUEUE_SIZE",
        "TRAFFIC_MONITOR_LOOP_VIDEO",
        "TRAFFIC_MONITOR_FONT",
        "TRAFFIC_MONITOR_PREVIEW_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_settings_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp settings");
    let json = r#"{
        "prob_threshold": 0.4,
        "queue_size": 8,
        "loop_video": true,
        "preview_dir": "/tmp/monitor-preview",
        "encoder_fps": 25.0,
        "debounce_threshold": 3
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write settings");

    std::env::set_var("TRAFFIC_MONITOR_SETTINGS", file.path());
    std::env::set_var("TRAFFIC_MONITOR_QUEUE_SIZE", "16");
    std::env::set_var("TRAFFIC_MONITOR_LOOP_VIDEO", "off");

    let settings = MonitorSettings::load().expect("load settings");
    assert!((settings.prob_threshold - 0.4).abs() < f32::EPSILON);
    assert_eq!(settings.queue_size, 16);
    assert!(!settings.loop_video);
    assert_eq!(settings.preview_dir, PathBuf::from("/tmp/monitor-preview"));
    assert_eq!(settings.encoder_fps, 25.0);
    assert_eq!(settings.debounce_threshold, 3);
    assert!(settings.font_path.is_none());

    clear_env();
}

#[test]
fn defaults_apply_without_a_settings_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let settings = MonitorSettings::load().expect("load settings");
    assert!((settings.prob_threshold - 0.145).abs() < f32::EPSILON);
    assert_eq!(settings.queue_size, 100);
    assert_eq!(settings.encoder_fps, 15.0);
    assert_eq!(settings.preview_dir, PathBuf::from("preview"));
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRAFFIC_MONITOR_PROB_THRESHOLD", "1.5");
    let err = MonitorSettings::load().unwrap_err();
    assert!(err.to_string().contains("prob_threshold"));
    clear_env();

    std::env::set_var("TRAFFIC_MONITOR_QUEUE_SIZE", "0");
    let err = MonitorSettings::load().unwrap_err();
    assert!(err.to_string().contains("queue_size"));
    clear_env();

    std::env::set_var("TRAFFIC_MONITOR_LOOP_VIDEO", "sometimes");
    assert!(MonitorSettings::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp settings");
    std::io::Write::write_all(&mut file, br#"{"encoder_fps": 0}"#).expect("write settings");
    std::env::set_var("TRAFFIC_MONITOR_SETTINGS", file.path());
    let err = MonitorSettings::load().unwrap_err();
    assert!(err.to_string().contains("encoder_fps"));
    clear_env();
}

#[test]
fn unreadable_settings_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRAFFIC_MONITOR_SETTINGS", "/nonexistent/monitor.json");
    let err = MonitorSettings::load().unwrap_err();
    assert!(err.to_string().contains("failed to read settings file"));
    clear_env();
}

#[test]
fn loads_configuration_file() {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(
        &mut file,
        b"models/ssd.xml\nmodels/ssd.bin\nresources/labels.txt\n0 person\n  videos/a.mp4   car  \n",
    )
    .expect("write config");

    let cfg = MonitorConfig::load(file.path()).expect("load config");
    assert_eq!(cfg.labels_path, PathBuf::from("resources/labels.txt"));
    assert_eq!(cfg.streams.len(), 2);
    assert_eq!(cfg.streams[0].source, SourceSpec::Camera(0));
    assert_eq!(cfg.streams[1].name, "Video 1");
    assert_eq!(cfg.streams[1].source, SourceSpec::File("videos/a.mp4".into()));
    assert_eq!(cfg.streams[1].required_label, "car");
}

#[test]
fn missing_configuration_file_names_the_path() {
    let err = MonitorConfig::load(std::path::Path::new("/nonexistent/conf.txt")).unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/conf.txt"));
}

#[test]
fn opens_and_runs_a_stub_configuration() {
    let dir = tempfile::tempdir().expect("temp dir");
    let labels = dir.path().join("labels.txt");
    std::fs::write(&labels, "car\nperson\n").expect("write labels");
    let conf = dir.path().join("conf.txt");
    std::fs::write(
        &conf,
        format!(
            "stub://ssd?size=32&class=2\n-\n{}\n\
             stub://lot?frames=6&width=64&height=64&fps=0 person\n\
             stub://gate?frames=4&width=64&height=64&fps=0 car\n",
            labels.display()
        ),
    )
    .expect("write config");

    let cfg = MonitorConfig::load(&conf).expect("load config");
    let settings = MonitorSettings::default();
    let preview_dir = dir.path().join("preview");
    let monitor = Monitor::open(
        &cfg,
        Device::Myriad,
        &settings,
        OutputMode::Live {
            preview_dir: preview_dir.clone(),
        },
        Controls::new(),
    )
    .expect("open monitor");
    let report = monitor.run().expect("run monitor");

    assert_eq!(report.rounds, 6);
    assert_eq!(report.streams[0].name, "Video 0");
    assert_eq!(report.streams[0].frames_read, 6);
    assert_eq!(report.streams[1].frames_read, 4);
    assert!(preview_dir.join("Video_0.jpg").exists());
    assert!(preview_dir.join("Video_1.jpg").exists());
}

#[test]
fn unknown_device_is_rejected() {
    let err = "TPU".parse::<Device>().unwrap_err();
    assert!(err.to_string().contains("Device must be one of"));
}
