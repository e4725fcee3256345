use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;
use crate::ingest::{CaptureOptions, ReconnectPolicy};

const DEFAULT_RTSP_URL: &str = "stub://front_camera";
const DEFAULT_BUFFER_FRAMES: u32 = 2;
const DEFAULT_CODEC_HINT: &str = "H264";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: f64 = 25.0;
const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_RECONNECTS: u32 = 5;
const DEFAULT_BACKOFF_SECS: u64 = 2;
const DEFAULT_FRAME_SKIP: u32 = 2;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
struct SentryConfigFile {
    stream: Option<StreamConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
    sampling: Option<SamplingConfigFile>,
    detector: Option<DetectorConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    buffer_frames: Option<u32>,
    codec_hint: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconnectConfigFile {
    max_attempts: Option<u32>,
    backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplingConfigFile {
    frame_skip: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorBackend>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    min_confidence: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    path: Option<PathBuf>,
    display: Option<bool>,
    font_path: Option<PathBuf>,
    max_frames: Option<u64>,
}

/// Which detector implementation to load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// Built-in scripted detector (no model).
    #[default]
    Stub,
    /// YOLOv8 ONNX model via tract (`backend-tract` feature).
    Tract,
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub stream: StreamSettings,
    pub reconnect: ReconnectSettings,
    pub sampling: SamplingSettings,
    pub detector: DetectorSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub buffer_frames: u32,
    pub codec_hint: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub frame_skip: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorBackend,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub min_confidence: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub path: Option<PathBuf>,
    pub display: bool,
    pub font_path: Option<PathBuf>,
    pub max_frames: Option<u64>,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self::from_file(SentryConfigFile::default())
    }
}

impl SentryConfig {
    /// Load configuration: file (explicit path or `SENTRY_CONFIG`), then
    /// `SENTRY_*` environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SENTRY_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentryConfigFile) -> Self {
        let stream = file.stream.unwrap_or_default();
        let reconnect = file.reconnect.unwrap_or_default();
        let sampling = file.sampling.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let output = file.output.unwrap_or_default();

        Self {
            stream: StreamSettings {
                url: stream.url.unwrap_or_else(|| DEFAULT_RTSP_URL.to_string()),
                buffer_frames: stream.buffer_frames.unwrap_or(DEFAULT_BUFFER_FRAMES),
                codec_hint: stream
                    .codec_hint
                    .unwrap_or_else(|| DEFAULT_CODEC_HINT.to_string()),
                width: stream.width.unwrap_or(DEFAULT_WIDTH),
                height: stream.height.unwrap_or(DEFAULT_HEIGHT),
                fps: stream.fps.unwrap_or(DEFAULT_FPS),
                read_timeout: Duration::from_millis(
                    stream.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                ),
            },
            reconnect: ReconnectSettings {
                max_attempts: reconnect.max_attempts.unwrap_or(DEFAULT_MAX_RECONNECTS),
                backoff: Duration::from_secs(reconnect.backoff_secs.unwrap_or(DEFAULT_BACKOFF_SECS)),
            },
            sampling: SamplingSettings {
                frame_skip: sampling.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or_default(),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                min_confidence: detector.min_confidence.unwrap_or(0.0),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            output: OutputSettings {
                path: output.path,
                display: output.display.unwrap_or(false),
                font_path: output.font_path,
                max_frames: output.max_frames,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SENTRY_RTSP_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Ok(path) = std::env::var("SENTRY_OUTPUT_PATH") {
            if !path.trim().is_empty() {
                self.output.path = Some(PathBuf::from(path));
            }
        }
        if let Ok(skip) = std::env::var("SENTRY_FRAME_SKIP") {
            self.sampling.frame_skip = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTRY_FRAME_SKIP must be a positive integer"))?;
        }
        if let Ok(max) = std::env::var("SENTRY_MAX_RECONNECTS") {
            self.reconnect.max_attempts = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTRY_MAX_RECONNECTS must be a non-negative integer"))?;
        }
        if let Ok(path) = std::env::var("SENTRY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(display) = std::env::var("SENTRY_DISPLAY") {
            self.output.display = parse_flag(&display)
                .ok_or_else(|| anyhow!("SENTRY_DISPLAY must be one of 1/0, true/false, yes/no"))?;
        }
        Ok(())
    }

    /// Check the merged settings. Call again after applying CLI overrides.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let url = self.stream.url.trim();
        if url.is_empty() {
            return Err(invalid("stream url must not be empty"));
        }
        if url::Url::parse(url).is_err() {
            return Err(invalid(format!(
                "stream url {} is not a valid URI",
                crate::ingest::redact_uri(url)
            )));
        }
        if self.stream.buffer_frames == 0 {
            return Err(invalid("stream buffer_frames must be at least 1"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(invalid("stream width and height must be non-zero"));
        }
        if !self.stream.fps.is_finite() || self.stream.fps <= 0.0 {
            return Err(invalid("stream fps must be a positive number"));
        }
        if self.sampling.frame_skip == 0 {
            return Err(invalid("frame_skip must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(invalid("detector min_confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(invalid("detector iou_threshold must be within [0, 1]"));
        }
        if self.detector.input_size == 0 {
            return Err(invalid("detector input_size must be non-zero"));
        }
        if self.detector.backend == DetectorBackend::Tract && self.detector.model_path.is_none() {
            return Err(invalid("the tract detector requires a model path"));
        }
        if self.output.max_frames == Some(0) {
            return Err(invalid("output max_frames must be at least 1"));
        }
        Ok(())
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            buffer_frames: self.stream.buffer_frames,
            codec_hint: self.stream.codec_hint.clone(),
            read_timeout: self.stream.read_timeout,
            width: self.stream.width,
            height: self.stream.height,
            fallback_fps: self.stream.fps,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            backoff: self.reconnect.backoff,
        }
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::Config(message.into())
}

fn read_config_file(path: &Path) -> Result<SentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
