use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::frame::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_TARGET_FPS,
};
use crate::ingest::CaptureParams;

pub const CONFIG_ENV: &str = "VIDEO_AUGMENT_CONFIG";
pub const LLAVA_URL_ENV: &str = "VIDEO_AUGMENT_LLAVA_URL";
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

const DEFAULT_CAMERA_ADDRESS: &str = "/dev/video0";
const DEFAULT_LLAVA_SERVER_URL: &str = "http://127.0.0.1:5000/query";
/// Roughly 1/60 s between display polls.
const DEFAULT_DISPLAY_INTERVAL_MS: u64 = 17;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    camera_address: Option<String>,
    llava_server_url: Option<String>,
    capture: Option<CaptureConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    buffer_capacity: Option<usize>,
    display_interval_ms: Option<u64>,
    ready_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Camera device used for the webcam selection. No runtime override.
    pub camera_address: String,
    pub llava_server_url: String,
    pub capture: CaptureParams,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub buffer_capacity: usize,
    /// Pause between display polls of the frame buffer.
    pub display_interval: Duration,
    /// Give up on a source that has not produced a frame within this time.
    /// `None` waits indefinitely.
    pub ready_timeout: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            display_interval: Duration::from_millis(DEFAULT_DISPLAY_INTERVAL_MS),
            ready_timeout: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

impl AppConfig {
    /// Load from `VIDEO_AUGMENT_CONFIG`, or from `config/config.json` when the
    /// variable is unset. A missing default file yields the built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let file_cfg = match std::env::var(CONFIG_ENV).ok() {
            Some(path) => read_config_file(Path::new(&path))?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    read_config_file(default_path)?
                } else {
                    log::debug!(
                        "config: {} not found, using defaults",
                        default_path.display()
                    );
                    AppConfigFile::default()
                }
            }
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a specific file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        Self {
            camera_address: file
                .camera_address
                .unwrap_or_else(|| DEFAULT_CAMERA_ADDRESS.to_string()),
            llava_server_url: file
                .llava_server_url
                .unwrap_or_else(|| DEFAULT_LLAVA_SERVER_URL.to_string()),
            capture: CaptureParams {
                width: capture.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
                target_fps: capture.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
            stream: StreamSettings {
                buffer_capacity: stream.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY),
                display_interval: Duration::from_millis(
                    stream
                        .display_interval_ms
                        .unwrap_or(DEFAULT_DISPLAY_INTERVAL_MS),
                ),
                ready_timeout: stream.ready_timeout_ms.map(Duration::from_millis),
            },
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(LLAVA_URL_ENV) {
            if !url.trim().is_empty() {
                self.llava_server_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "camera_address cannot be empty".to_string(),
            ));
        }
        let url = Url::parse(&self.llava_server_url).map_err(|err| {
            ConfigError::Invalid(format!(
                "llava_server_url '{}' is not a valid URL: {}",
                self.llava_server_url, err
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "llava_server_url must use http or https, got {}",
                url.scheme()
            )));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid(
                "capture width and height must be greater than zero".to_string(),
            ));
        }
        if self.capture.target_fps == 0 {
            return Err(ConfigError::Invalid(
                "capture target_fps must be greater than zero".to_string(),
            ));
        }
        if self.stream.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if self.stream.ready_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::Invalid(
                "stream ready_timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: PathBuf::from(path),
        source,
    })?;
    let cfg = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: PathBuf::from(path),
        source,
    })?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.camera_address, "/dev/video0");
        assert_eq!(cfg.capture, CaptureParams::default());
        assert_eq!(cfg.stream.buffer_capacity, 5);
        assert_eq!(cfg.stream.ready_timeout, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() -> Result<(), ConfigError> {
        let file: AppConfigFile = serde_json::from_str(
            r#"{ "camera_address": "/dev/video3", "stream": { "ready_timeout_ms": 2500 } }"#,
        )
        .map_err(|source| ConfigError::Parse {
            path: PathBuf::from("inline"),
            source,
        })?;
        let cfg = AppConfig::from_file(file);
        assert_eq!(cfg.camera_address, "/dev/video3");
        assert_eq!(cfg.llava_server_url, "http://127.0.0.1:5000/query");
        assert_eq!(cfg.stream.ready_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(cfg.stream.display_interval, Duration::from_millis(17));
        Ok(())
    }

    #[test]
    fn rejects_non_http_server_url() {
        let cfg = AppConfig {
            llava_server_url: "ftp://inference.local/query".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_buffer_capacity() {
        let mut cfg = AppConfig::default();
        cfg.stream.buffer_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
