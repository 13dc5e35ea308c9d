//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Conversation front end
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Voice activity detection
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Microphone capture
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Relay gateway
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Conversation front end configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Relay endpoint receiving each turn
    pub relay_url: Option<String>,

    /// Echo turns locally instead of calling the relay
    pub mock: Option<bool>,

    /// Round-trip timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Voice activity detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// Speech threshold in `[0, 1]`
    pub threshold: Option<f32>,

    /// Silence after speech that ends a turn
    pub silence_ms: Option<u64>,

    /// Cadence of the silence check
    pub check_interval_ms: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub sample_rate: Option<u32>,
    pub chunk_ms: Option<u64>,
    pub fft_size: Option<usize>,
    pub hop: Option<usize>,
    pub smoothing: Option<f32>,
}

/// Relay gateway configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port to listen on
    pub port: Option<u16>,

    /// Downstream webhook the relay forwards to
    pub downstream_url: Option<String>,

    /// Echo uploads instead of forwarding
    pub mock_mode: Option<bool>,

    /// Directory of the web front end
    pub static_dir: Option<PathBuf>,
}

/// Load the config file from the default location
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<ParleyConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
