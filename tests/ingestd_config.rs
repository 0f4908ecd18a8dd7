use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use tuyere_capture::config::IngestdConfig;
use tuyere_capture::CaptureTiming;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TUYERE_CONFIG",
        "TUYERE_SOURCES_PATH",
        "TUYERE_STATUS_INTERVAL_SECS",
        "TUYERE_RELOAD_POLL_MS",
        "TUYERE_FRAME_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = IngestdConfig::load().expect("load config");

    assert_eq!(cfg.sources_path.to_str(), Some("camera_config.json"));
    assert_eq!(cfg.status_interval, Duration::from_secs(5));
    assert_eq!(cfg.reload_poll, Duration::from_secs(1));
    assert_eq!(cfg.capture, CaptureTiming::default());
    assert_eq!(cfg.capture.frame_interval, Duration::from_millis(33));
    assert_eq!(cfg.capture.max_read_failures, 5);
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "sources_path": "/var/lib/tuyere/cameras.json",
        "status": { "interval_secs": 30 },
        "reload": { "poll_ms": 250 },
        "capture": {
            "frame_interval_ms": 50,
            "retry_delay_ms": 200,
            "error_backoff_ms": 2000,
            "max_read_failures": 8,
            "stop_timeout_ms": 1500
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TUYERE_CONFIG", file.path());
    std::env::set_var("TUYERE_SOURCES_PATH", "/tmp/override.json");
    std::env::set_var("TUYERE_FRAME_INTERVAL_MS", "40");

    let cfg = IngestdConfig::load().expect("load config");

    assert_eq!(cfg.sources_path.to_str(), Some("/tmp/override.json"));
    assert_eq!(cfg.status_interval, Duration::from_secs(30));
    assert_eq!(cfg.reload_poll, Duration::from_millis(250));
    assert_eq!(cfg.capture.frame_interval, Duration::from_millis(40));
    assert_eq!(cfg.capture.retry_delay, Duration::from_millis(200));
    assert_eq!(cfg.capture.error_backoff, Duration::from_secs(2));
    assert_eq!(cfg.capture.max_read_failures, 8);
    assert_eq!(cfg.capture.stop_timeout, Duration::from_millis(1500));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
sources_path = "cams.json"

[capture]
retry_delay_ms = 100
max_read_failures = 3
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("TUYERE_CONFIG", file.path());

    let cfg = IngestdConfig::load().expect("load config");

    assert_eq!(cfg.sources_path.to_str(), Some("cams.json"));
    assert_eq!(cfg.capture.retry_delay, Duration::from_millis(100));
    assert_eq!(cfg.capture.max_read_failures, 3);
    assert_eq!(cfg.capture.frame_interval, Duration::from_millis(33));

    clear_env();
}

#[test]
fn rejects_malformed_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TUYERE_RELOAD_POLL_MS", "soon");
    assert!(IngestdConfig::load().is_err());

    std::env::set_var("TUYERE_RELOAD_POLL_MS", "0");
    assert!(IngestdConfig::load().is_err());

    clear_env();
}
