use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use video_augment::config::{CONFIG_ENV, LLAVA_URL_ENV};
use video_augment::{AppConfig, ConfigError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [CONFIG_ENV, LLAVA_URL_ENV] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "camera_address": "/dev/video2",
            "llava_server_url": "http://jetson.local:5000/query",
            "capture": { "width": 320, "height": 240, "target_fps": 15 },
            "stream": { "buffer_capacity": 3, "display_interval_ms": 33, "ready_timeout_ms": 4000 }
        }"#,
    );
    std::env::set_var(CONFIG_ENV, file.path());
    std::env::set_var(LLAVA_URL_ENV, "https://inference.example:8443/query");

    let cfg = AppConfig::load().expect("load config");

    assert_eq!(cfg.camera_address, "/dev/video2");
    assert_eq!(cfg.llava_server_url, "https://inference.example:8443/query");
    assert_eq!(cfg.capture.width, 320);
    assert_eq!(cfg.capture.height, 240);
    assert_eq!(cfg.capture.target_fps, 15);
    assert_eq!(cfg.stream.buffer_capacity, 3);
    assert_eq!(cfg.stream.display_interval, Duration::from_millis(33));
    assert_eq!(cfg.stream.ready_timeout, Some(Duration::from_millis(4000)));

    clear_env();
}

#[test]
fn minimal_file_uses_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{ "camera_address": "/dev/video0", "llava_server_url": "http://10.0.0.5:5000/query" }"#,
    );
    let cfg = AppConfig::load_from(file.path()).expect("load config");

    assert_eq!(cfg.llava_server_url, "http://10.0.0.5:5000/query");
    assert_eq!(cfg.capture.width, 640);
    assert_eq!(cfg.capture.height, 480);
    assert_eq!(cfg.capture.target_fps, 10);
    assert_eq!(cfg.stream.buffer_capacity, 5);
    assert_eq!(cfg.stream.ready_timeout, None);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var(CONFIG_ENV, "/nonexistent/video-augment/config.json");
    let err = AppConfig::load().expect_err("missing config");
    assert!(matches!(err, ConfigError::Read { .. }));

    clear_env();
}

#[test]
fn malformed_json_is_a_parse_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "camera_address": "/dev/video0", "#);
    let err = AppConfig::load_from(file.path()).expect_err("bad json");
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn invalid_server_url_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "llava_server_url": "not a url" }"#);
    let err = AppConfig::load_from(file.path()).expect_err("invalid url");
    assert!(matches!(err, ConfigError::Invalid(_)));
}
