//! Conversation state and its observable status

use std::fmt;

use crate::Fault;
use crate::voice::ring_size;

/// Sub-status shown while the latest sample is speech
pub const HEARING: &str = "I hear you...";

/// Phase of the conversation; exactly one is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConversationState {
    /// Waiting for the user to start
    #[default]
    Idle,
    /// Capturing the user's utterance
    Listening,
    /// Waiting for the response to the sealed utterance
    Thinking,
    /// Playing the response
    Speaking,
}

impl ConversationState {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a front end needs to render the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    /// Current state
    pub state: ConversationState,
    /// Main status line
    pub headline: String,
    /// Secondary line ("I hear you...", fault details)
    pub detail: String,
    /// Visual feedback size derived from the latest level
    pub ring_size: f32,
    /// Fault that ended the last turn, if any
    pub fault: Option<Fault>,
    /// Turns whose response played to the end
    pub turns_completed: u64,
}

impl Status {
    /// Default presentation of a state
    #[must_use]
    pub fn for_state(state: ConversationState, turns_completed: u64) -> Self {
        let (headline, detail) = match state {
            ConversationState::Idle => ("Tap to Start", ""),
            ConversationState::Listening => ("Listening...", ""),
            ConversationState::Thinking => ("Thinking...", "Asking the AI..."),
            ConversationState::Speaking => ("Reseller Agent", "Speaking..."),
        };

        Self {
            state,
            headline: headline.to_string(),
            detail: detail.to_string(),
            ring_size: ring_size(0.0),
            fault: None,
            turns_completed,
        }
    }

    /// Idle status after a fault
    #[must_use]
    pub fn faulted(fault: Fault, turns_completed: u64) -> Self {
        Self {
            headline: fault.headline().to_string(),
            detail: fault.message().to_string(),
            fault: Some(fault),
            ..Self::for_state(ConversationState::Idle, turns_completed)
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::for_state(ConversationState::Idle, 0)
    }
}
