//! Parley - hands-free, turn-taking voice conversations
//!
//! This library provides the pieces of a voice conversation loop:
//! - Loudness metering and voice activity detection on the microphone
//! - Per-turn capture buffering
//! - A turn transport to a remote agent relay
//! - Playback of the spoken response, then back to listening
//! - The relay gateway the front end talks to
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Conversation                       │
//! │   Capture  │  Level/VAD  │  Pipeline  │  Playback   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ multipart upload / audio reply
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Relay gateway                       │
//! │        POST /api/talk  │  echo or forward            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Downstream agent webhook                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod console;
pub mod conversation;
pub mod error;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use conversation::{Conversation, ConversationHandle, ConversationState, Status};
pub use error::{Error, Fault, Result};
pub use transport::{AudioResponse, EchoTransport, HttpTransport, TurnTransport};
