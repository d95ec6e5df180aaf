use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::DetectionThresholds;
use crate::window::{Garment, Vocabulary, DEFAULT_COUNT_THRESHOLD, DEFAULT_WINDOW_SECS};

const DEFAULT_STREAM_URL: &str = "http://127.0.0.1:81/stream";
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_STREAM_WIDTH: u32 = 640;
const DEFAULT_STREAM_HEIGHT: u32 = 360;
const DEFAULT_STREAM_READ_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DETECTOR_API_URL: &str = "https://detect.roboflow.com";
const DEFAULT_MODEL_ID: &str = "clothing-detection-uhmgf/9";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_DETECTOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
const DEFAULT_BACKEND_PORT: u16 = 3000;
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DEVICE_ID: &str = "station-1";
const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:5000";

#[derive(Debug, Deserialize, Default)]
struct StationConfigFile {
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    window: Option<WindowConfigFile>,
    vocabulary: Option<Vec<Garment>>,
    backend: Option<BackendConfigFile>,
    server: Option<ServerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    read_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    api_url: Option<String>,
    model_id: Option<String>,
    api_key: Option<String>,
    model_path: Option<PathBuf>,
    class_names: Option<Vec<String>>,
    model_input_width: Option<u32>,
    model_input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    overlap_threshold: Option<f32>,
    timeout_secs: Option<u64>,
    script: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Deserialize, Default)]
struct WindowConfigFile {
    duration_secs: Option<u64>,
    count_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    host: Option<String>,
    port: Option<u16>,
    timeout_secs: Option<u64>,
    device_id: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
}

/// Everything the station daemon and the one-shot CLI need.
#[derive(Debug, Clone)]
pub struct StationConfig {
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
    pub window: WindowSettings,
    pub vocabulary: Vocabulary,
    pub backend: BackendSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub read_timeout: Duration,
}

/// Which detector backend to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hosted,
    Tract,
    Scripted,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hosted" => Ok(Self::Hosted),
            "tract" => Ok(Self::Tract),
            "scripted" => Ok(Self::Scripted),
            other => Err(anyhow!(
                "unknown detector backend '{}' (expected hosted, tract or scripted)",
                other
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hosted => "hosted",
            Self::Tract => "tract",
            Self::Scripted => "scripted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub api_url: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub model_path: Option<PathBuf>,
    /// Output class order of a local model. Empty means the vocabulary order.
    pub class_names: Vec<String>,
    pub model_input_width: u32,
    pub model_input_height: u32,
    pub thresholds: DetectionThresholds,
    pub request_timeout: Duration,
    /// Per-frame label batches for the scripted backend.
    pub script: Vec<Vec<String>>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Hosted,
            api_url: DEFAULT_DETECTOR_API_URL.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            api_key: None,
            model_path: None,
            class_names: Vec::new(),
            model_input_width: DEFAULT_MODEL_INPUT,
            model_input_height: DEFAULT_MODEL_INPUT,
            thresholds: DetectionThresholds::default(),
            request_timeout: Duration::from_secs(DEFAULT_DETECTOR_TIMEOUT_SECS),
            script: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    pub duration: Duration,
    pub count_threshold: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(DEFAULT_WINDOW_SECS),
            count_threshold: DEFAULT_COUNT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub device_id: String,
    pub token: Option<String>,
}

impl BackendSettings {
    /// Root of the clothes collection on the laundry backend.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/api/clothes", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
}

impl StationConfig {
    pub fn load() -> Result<Self> {
        let cfg = Self::load_unvalidated()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// File and env layers without validation, for callers that apply their
    /// own overrides (CLI flags) before calling `validate`.
    pub fn load_unvalidated() -> Result<Self> {
        let config_path = std::env::var("WEAR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: StationConfigFile) -> Result<Self> {
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            url: stream_file
                .url
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            target_fps: stream_file.target_fps.unwrap_or(DEFAULT_STREAM_FPS),
            width: stream_file.width.unwrap_or(DEFAULT_STREAM_WIDTH),
            height: stream_file.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
            read_timeout: Duration::from_secs(
                stream_file
                    .read_timeout_secs
                    .unwrap_or(DEFAULT_STREAM_READ_TIMEOUT_SECS),
            ),
        };

        let detector_file = file.detector.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let backend = match detector_file.backend.as_deref() {
            Some(name) => name.parse()?,
            None => defaults.backend,
        };
        let detector = DetectorSettings {
            backend,
            api_url: detector_file.api_url.unwrap_or(defaults.api_url),
            model_id: detector_file.model_id.unwrap_or(defaults.model_id),
            api_key: detector_file.api_key.filter(|key| !key.trim().is_empty()),
            model_path: detector_file.model_path,
            class_names: detector_file.class_names.unwrap_or_default(),
            model_input_width: detector_file
                .model_input_width
                .unwrap_or(defaults.model_input_width),
            model_input_height: detector_file
                .model_input_height
                .unwrap_or(defaults.model_input_height),
            thresholds: DetectionThresholds {
                confidence: detector_file
                    .confidence_threshold
                    .unwrap_or(defaults.thresholds.confidence),
                overlap: detector_file
                    .overlap_threshold
                    .unwrap_or(defaults.thresholds.overlap),
            },
            request_timeout: detector_file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            script: detector_file.script.unwrap_or_default(),
        };

        let window_file = file.window.unwrap_or_default();
        let window = WindowSettings {
            duration: Duration::from_secs(
                window_file.duration_secs.unwrap_or(DEFAULT_WINDOW_SECS),
            ),
            count_threshold: window_file
                .count_threshold
                .unwrap_or(DEFAULT_COUNT_THRESHOLD),
        };

        let vocabulary = match file.vocabulary {
            Some(garments) => Vocabulary::new(garments)?,
            None => Vocabulary::default(),
        };

        let backend_file = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            host: backend_file
                .host
                .unwrap_or_else(|| DEFAULT_BACKEND_HOST.to_string()),
            port: backend_file.port.unwrap_or(DEFAULT_BACKEND_PORT),
            timeout: Duration::from_secs(
                backend_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECS),
            ),
            device_id: backend_file
                .device_id
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
            token: backend_file.token.filter(|token| !token.trim().is_empty()),
        };

        let server = ServerSettings {
            addr: file
                .server
                .and_then(|server| server.addr)
                .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
        };

        Ok(Self {
            stream,
            detector,
            window,
            vocabulary,
            backend,
            server,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("WEAR_STREAM_URL") {
            self.stream.url = url;
        }
        if let Some(backend) = env_nonempty("WEAR_DETECTOR_BACKEND") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(model_id) = env_nonempty("WEAR_MODEL_ID") {
            self.detector.model_id = model_id;
        }
        if let Some(api_key) = env_nonempty("ROBOFLOW_API_KEY") {
            self.detector.api_key = Some(api_key);
        }
        if let Some(path) = env_nonempty("WEAR_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = env_nonempty("WEAR_WINDOW_SECS") {
            let seconds: u64 = secs.parse().map_err(|_| {
                anyhow!("WEAR_WINDOW_SECS must be an integer number of seconds")
            })?;
            self.window.duration = Duration::from_secs(seconds);
        }
        if let Some(threshold) = env_nonempty("WEAR_COUNT_THRESHOLD") {
            self.window.count_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("WEAR_COUNT_THRESHOLD must be a non-negative integer"))?;
        }
        if let Some(names) = env_nonempty("WEAR_VOCABULARY") {
            self.vocabulary = Vocabulary::from_names(split_csv(&names))?;
        }
        if let Some(host) = env_nonempty("BACKEND_HOST") {
            self.backend.host = host;
        }
        if let Some(port) = env_nonempty("BACKEND_PORT") {
            self.backend.port = port
                .parse()
                .map_err(|_| anyhow!("BACKEND_PORT must be a port number"))?;
        }
        if let Some(device_id) = env_nonempty("WEAR_DEVICE_ID") {
            self.backend.device_id = device_id;
        }
        if let Some(token) = env_nonempty("WEAR_BACKEND_TOKEN") {
            self.backend.token = Some(token);
        }
        if let Some(addr) = env_nonempty("WEAR_SERVER_ADDR") {
            self.server.addr = addr;
        } else if let Some(port) = env_nonempty("DETECTION_SERVER_PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow!("DETECTION_SERVER_PORT must be a port number"))?;
            self.server.addr = with_port(&self.server.addr, port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let thresholds = &self.detector.thresholds;
        if !(thresholds.confidence > 0.0 && thresholds.confidence <= 1.0) {
            return Err(anyhow!("confidence threshold must be in (0, 1]"));
        }
        if !(thresholds.overlap > 0.0 && thresholds.overlap <= 1.0) {
            return Err(anyhow!("overlap threshold must be in (0, 1]"));
        }
        if self.window.duration.is_zero() {
            return Err(anyhow!("window duration must be greater than zero"));
        }
        if self.vocabulary.is_empty() {
            return Err(anyhow!("vocabulary must track at least one garment"));
        }
        if self.stream.target_fps == 0 {
            return Err(anyhow!("stream target_fps must be greater than zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream width and height must be greater than zero"));
        }
        match self.detector.backend {
            BackendKind::Hosted if self.detector.api_key.is_none() => {
                return Err(anyhow!(
                    "hosted detector requires an API key (ROBOFLOW_API_KEY)"
                ));
            }
            BackendKind::Tract if self.detector.model_path.is_none() => {
                return Err(anyhow!(
                    "tract detector requires a model path (WEAR_MODEL_PATH)"
                ));
            }
            _ => {}
        }
        if self.backend.device_id.trim().is_empty() {
            return Err(anyhow!("backend device_id must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<StationConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Replace the port of a `host:port` string, keeping the host.
fn with_port(addr: &str, port: u16) -> String {
    let host = match addr.rsplit_once(':') {
        Some((host, _)) if !host.is_empty() => host,
        _ => "0.0.0.0",
    };
    format!("{}:{}", host, port)
}

/// Parse a comma separated list, dropping blanks.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
