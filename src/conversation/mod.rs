//! Turn-taking conversation controller
//!
//! ```text
//!          start                 end of turn              response
//!   IDLE ────────▶ LISTENING ───────────────▶ THINKING ──────────▶ SPEAKING
//!    ▲                 ▲                          │                    │
//!    │                 └──────────────────────────┼── playback done ───┘
//!    └──── interrupt / fault (any state) ─────────┘
//! ```

mod event;
mod machine;
mod state;

pub use event::{CaptureSink, ConversationHandle, Event, EventSender, Generation, PlaybackDone};
pub use machine::Conversation;
pub use state::{ConversationState, HEARING, Status};
