use crate::error::AppError;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Settings for the bidirectional agent session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// WebSocket endpoint of the agent service.
    pub endpoint: String,
    /// API key. Never read from the config file; see [`AppConfig::load`].
    pub api_key: String,
    pub model: String,
    /// Prebuilt voice identity used for agent speech.
    pub voice: String,
    pub system_instruction: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_key: String::new(),
            model: "models/gemini-2.0-flash-live-001".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "You are a friendly and helpful voice assistant. \
                Keep your responses concise and conversational."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Input device name; the host default when unset.
    pub device: Option<String>,
    /// Rate of frames sent to the agent.
    pub capture_rate_hz: u32,
    /// Rate of frames received from the agent.
    pub playback_rate_hz: u32,
    /// Samples per outbound frame.
    pub frame_size_samples: usize,
    /// Capacity of the capture ring buffer, in samples.
    pub ring_capacity: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: None,
            capture_rate_hz: 16_000,
            playback_rate_hz: 24_000,
            frame_size_samples: 4096,
            ring_capacity: 16384 * 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Milliseconds between sampled camera frames.
    pub interval_ms: u64,
    /// Camera index for the native backend.
    pub camera_index: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            jpeg_quality: 60,
            interval_ms: 500,
            camera_index: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSettings,
    pub audio: AudioSettings,
    pub video: VideoSettings,
}

impl AppConfig {
    /// Load configuration from an optional TOML file plus `LIVECALL_*`
    /// environment overrides (e.g. `LIVECALL_SESSION__MODEL`). The API key
    /// comes from `LIVECALL_SESSION__API_KEY` or, as a fallback,
    /// `GEMINI_API_KEY`.
    pub fn load(path: Option<&str>) -> Result<Self, AppError> {
        let mut builder = Config::builder().add_source(File::with_name("livecall").required(false));
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let cfg = builder
            .add_source(Environment::with_prefix("LIVECALL").separator("__"))
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let mut app: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        if app.session.api_key.is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                app.session.api_key = key;
            }
        }
        Ok(app)
    }

    /// Checks that run before any device or network resource is touched.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.session.api_key.is_empty() {
            return Err(AppError::Config(
                "API key not set (LIVECALL_SESSION__API_KEY or GEMINI_API_KEY)".to_string(),
            ));
        }
        if self.audio.frame_size_samples == 0 {
            return Err(AppError::Config("frame_size_samples must be > 0".to_string()));
        }
        if self.video.jpeg_quality == 0 || self.video.jpeg_quality > 100 {
            return Err(AppError::Config("jpeg_quality must be in 1..=100".to_string()));
        }
        Ok(())
    }
}
