//! Configuration management for parley

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::DEFAULT_TIMEOUT;
use crate::voice::{CaptureConfig, VadConfig};
use crate::{Error, Result};

/// Relay endpoint the front end talks to when nothing is configured
pub const DEFAULT_RELAY_URL: &str = "http://localhost:3000/api/talk";

/// Port the relay gateway listens on when nothing is configured
pub const DEFAULT_PORT: u16 = 3000;

/// parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Conversation front end
    pub conversation: ConversationConfig,

    /// Voice activity detection
    pub vad: VadConfig,

    /// Microphone capture
    pub capture: CaptureConfig,

    /// Relay gateway
    pub server: ServerConfig,
}

/// Conversation front end configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Relay endpoint receiving each turn
    pub relay_url: String,

    /// Echo turns locally instead of calling the relay
    pub mock: bool,

    /// Round-trip timeout for one turn
    pub request_timeout: Duration,
}

/// Relay gateway configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Downstream webhook uploads are forwarded to
    pub downstream_url: Option<String>,

    /// Echo uploads instead of forwarding
    pub mock_mode: bool,

    /// Directory of the web front end
    pub static_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(file::ParleyConfigFile::default(), |_| None)
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// An explicit `path` must exist and parse; the default location is
    /// optional and falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or the result
    /// fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        let config = Self::resolve(fc, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed file with environment lookups from `env`
    pub fn resolve(fc: file::ParleyConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults_vad = VadConfig::default();
        let defaults_capture = CaptureConfig::default();

        let conversation = ConversationConfig {
            relay_url: env("PARLEY_RELAY_URL")
                .or(fc.conversation.relay_url)
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            mock: env("PARLEY_MOCK")
                .map(|v| parse_bool(&v))
                .or(fc.conversation.mock)
                .unwrap_or(false),
            request_timeout: fc
                .conversation
                .request_timeout_secs
                .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
        };

        let vad = VadConfig {
            threshold: env("PARLEY_VAD_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .or(fc.vad.threshold)
                .unwrap_or(defaults_vad.threshold),
            silence: env("PARLEY_SILENCE_MS")
                .and_then(|s| s.parse().ok())
                .or(fc.vad.silence_ms)
                .map_or(defaults_vad.silence, Duration::from_millis),
            check_interval: fc
                .vad
                .check_interval_ms
                .map_or(defaults_vad.check_interval, Duration::from_millis),
        };

        let capture = CaptureConfig {
            sample_rate: fc.capture.sample_rate.unwrap_or(defaults_capture.sample_rate),
            chunk: fc
                .capture
                .chunk_ms
                .map_or(defaults_capture.chunk, Duration::from_millis),
            fft_size: fc.capture.fft_size.unwrap_or(defaults_capture.fft_size),
            hop: fc.capture.hop.unwrap_or(defaults_capture.hop),
            smoothing: fc.capture.smoothing.unwrap_or(defaults_capture.smoothing),
        };

        let server = ServerConfig {
            port: env("PARLEY_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            downstream_url: env("PARLEY_DOWNSTREAM_URL")
                .or_else(|| env("N8N_WEBHOOK_URL"))
                .or(fc.server.downstream_url)
                .filter(|url| !url.is_empty()),
            mock_mode: env("PARLEY_MOCK_MODE")
                .or_else(|| env("MOCK_MODE"))
                .map(|v| parse_bool(&v))
                .or(fc.server.mock_mode)
                .unwrap_or(false),
            static_dir: env("PARLEY_STATIC_DIR")
                .map(PathBuf::from)
                .or(fc.server.static_dir)
                .unwrap_or_else(|| PathBuf::from("public")),
        };

        Self {
            conversation,
            vad,
            capture,
            server,
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let vad = &self.vad;
        if !(0.0..=1.0).contains(&vad.threshold) {
            return Err(Error::Config(format!(
                "vad threshold must be within [0, 1], got {}",
                vad.threshold
            )));
        }
        if vad.silence.is_zero() {
            return Err(Error::Config("vad silence must be non-zero".to_string()));
        }
        if vad.check_interval.is_zero() {
            return Err(Error::Config(
                "vad check interval must be non-zero".to_string(),
            ));
        }

        let capture = &self.capture;
        if capture.sample_rate == 0 {
            return Err(Error::Config("capture sample rate must be non-zero".to_string()));
        }
        if capture.chunk.is_zero() {
            return Err(Error::Config("capture chunk must be non-zero".to_string()));
        }
        if capture.fft_size < 32 || !capture.fft_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "fft size must be a power of two of at least 32, got {}",
                capture.fft_size
            )));
        }
        if capture.hop == 0 {
            return Err(Error::Config("capture hop must be non-zero".to_string()));
        }
        if !(0.0..1.0).contains(&capture.smoothing) {
            return Err(Error::Config(format!(
                "smoothing must be within [0, 1), got {}",
                capture.smoothing
            )));
        }

        reqwest::Url::parse(&self.conversation.relay_url).map_err(|e| {
            Error::Config(format!(
                "invalid relay url {}: {e}",
                self.conversation.relay_url
            ))
        })?;

        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
