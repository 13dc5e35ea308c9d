//! Error types for parley

use thiserror::Error;

/// Result type alias for parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in parley
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture device unavailable, revoked or misbehaving
    #[error("device error: {0}")]
    Device(String),

    /// Turn transport or downstream relay failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Output sink cannot render the payload
    #[error("playback error: {0}")]
    Playback(String),

    /// Capture pipeline misuse (sealing a pipeline that is not open)
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A failure that ends the current turn but not the process
///
/// Every fault sends the conversation back to idle; restarting needs an
/// explicit user action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// Capture device unavailable or revoked mid-session
    #[error("device fault: {0}")]
    Device(String),

    /// Network failure, non-success status or malformed response
    #[error("transport fault: {0}")]
    Transport(String),

    /// Sink cannot render the returned payload
    #[error("playback fault: {0}")]
    Playback(String),
}

impl Fault {
    /// Short headline shown to the user
    #[must_use]
    pub const fn headline(&self) -> &'static str {
        match self {
            Self::Device(_) => "Mic Error",
            Self::Transport(_) | Self::Playback(_) => "Error",
        }
    }

    /// Detail message without the fault kind prefix
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Device(m) | Self::Transport(m) | Self::Playback(m) => m,
        }
    }
}

impl Error {
    /// Message without the variant prefix for string-carrying variants
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Config(m)
            | Self::Device(m)
            | Self::Transport(m)
            | Self::Playback(m)
            | Self::Pipeline(m) => m.clone(),
            other => other.to_string(),
        }
    }
}
