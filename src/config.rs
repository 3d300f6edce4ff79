use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, ConfiguredDevices, OutputKind, INPUT_SAMPLE_RATE};
use crate::session::{SessionConfig, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION};

const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/\
google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
    /// How often the battery sensor is polled into the device state
    pub battery_refresh_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// WebSocket endpoint of the live service
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub voice: Option<String>,
    pub system_instruction: String,
    /// Limit on opening the WebSocket
    pub connect_timeout_secs: u64,
    /// Limit on waiting for the setup acknowledgment
    pub setup_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Fixed by the live service's input format
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    /// `device`, `silence` or `file:<path>`
    pub capture: String,
    /// `device` or `virtual`
    pub output: String,
}

impl Config {
    /// Load from `path` (any extension the config crate knows, optional) with
    /// `LOQA_LIVE__SECTION__KEY` environment overrides on top of defaults
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "loqa-live")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8090_i64)?
            .set_default("service.battery_refresh_secs", 60_i64)?
            .set_default("live.endpoint", DEFAULT_ENDPOINT)?
            .set_default("live.model", DEFAULT_MODEL)?
            .set_default("live.api_key_env", "GEMINI_API_KEY")?
            .set_default("live.system_instruction", DEFAULT_SYSTEM_INSTRUCTION)?
            .set_default("live.connect_timeout_secs", 10_i64)?
            .set_default("live.setup_timeout_secs", 10_i64)?
            .set_default("audio.input_sample_rate", 16000_i64)?
            .set_default("audio.output_sample_rate", 24000_i64)?
            .set_default("audio.frame_size", 4096_i64)?
            .set_default("audio.capture", "device")?
            .set_default("audio.output", "device")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LOQA_LIVE").separator("__"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.audio.frame_size > 0, "audio.frame_size must be positive");
        ensure!(
            self.audio.output_sample_rate > 0,
            "audio.output_sample_rate must be positive"
        );
        ensure!(
            self.audio.input_sample_rate == INPUT_SAMPLE_RATE,
            "audio.input_sample_rate must be {} (got {})",
            INPUT_SAMPLE_RATE,
            self.audio.input_sample_rate
        );
        ensure!(
            self.live.connect_timeout_secs > 0 && self.live.setup_timeout_secs > 0,
            "live timeouts must be positive"
        );
        ensure!(
            self.service.battery_refresh_secs > 0,
            "service.battery_refresh_secs must be positive"
        );
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.live.model.clone(),
            system_instruction: self.live.system_instruction.clone(),
            voice: self.live.voice.clone(),
            frame_size: self.audio.frame_size,
            output_sample_rate: self.audio.output_sample_rate,
            connect_timeout: Duration::from_secs(self.live.connect_timeout_secs),
            setup_timeout: Duration::from_secs(self.live.setup_timeout_secs),
            ..SessionConfig::default()
        }
    }

    pub fn devices(&self) -> Result<ConfiguredDevices> {
        let source: AudioSource = self
            .audio
            .capture
            .parse()
            .context("Invalid audio.capture setting")?;
        let output: OutputKind = self
            .audio
            .output
            .parse()
            .context("Invalid audio.output setting")?;

        Ok(ConfiguredDevices {
            source,
            output,
            backend: AudioBackendConfig {
                sample_rate: self.audio.input_sample_rate,
                frame_size: self.audio.frame_size,
                ..AudioBackendConfig::default()
            },
            output_sample_rate: self.audio.output_sample_rate,
        })
    }

    /// API key from the configured environment variable, if set
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.live.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}
