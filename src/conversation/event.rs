//! Events delivered to the conversation loop
//!
//! Every external source (capture device, silence timer, transport task,
//! playback sink, user control) talks to the orchestrator only by posting an
//! [`Event`] into its queue. Callbacks carry the generation they were created
//! under so the orchestrator can drop anything that arrives after the owning
//! state has been left.

use tokio::sync::mpsc;

use crate::Fault;
use crate::transport::AudioResponse;

/// Sending half of the conversation event queue
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Transition counter; bumped on every state change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// The generation following this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw counter value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input to the conversation state machine
#[derive(Debug)]
pub enum Event {
    /// Single-button control: start when idle, interrupt otherwise
    Toggle,
    /// Begin a conversation (no-op unless idle)
    Start,
    /// Barge-in: abandon whatever is happening and go idle
    Interrupt,
    /// Stop the event loop
    Shutdown,
    /// Loudness sample from the capture stream
    Level {
        generation: Generation,
        level: f32,
    },
    /// Encoded audio chunk from the capture stream
    Chunk {
        generation: Generation,
        bytes: Vec<u8>,
    },
    /// Periodic silence check tick
    SilenceCheck { generation: Generation },
    /// Transport round-trip finished
    TransportDone {
        generation: Generation,
        result: Result<AudioResponse, Fault>,
    },
    /// Response audio reached its natural end
    PlaybackFinished { generation: Generation },
    /// A collaborator failed asynchronously
    Fault {
        generation: Generation,
        fault: Fault,
    },
}

impl Event {
    /// Generation an asynchronous event belongs to; `None` for user input
    #[must_use]
    pub const fn generation(&self) -> Option<Generation> {
        match self {
            Self::Toggle | Self::Start | Self::Interrupt | Self::Shutdown => None,
            Self::Level { generation, .. }
            | Self::Chunk { generation, .. }
            | Self::SilenceCheck { generation }
            | Self::TransportDone { generation, .. }
            | Self::PlaybackFinished { generation }
            | Self::Fault { generation, .. } => Some(*generation),
        }
    }
}

/// Where a capture stream delivers levels, chunks and device faults
///
/// Cheap to clone and `Send`, so it can move into audio callback threads.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    generation: Generation,
    tx: EventSender,
}

impl CaptureSink {
    /// Create a sink bound to one listening phase
    #[must_use]
    pub const fn new(generation: Generation, tx: EventSender) -> Self {
        Self { generation, tx }
    }

    /// Deliver a loudness sample
    pub fn level(&self, level: f32) {
        let _ = self.tx.send(Event::Level {
            generation: self.generation,
            level,
        });
    }

    /// Deliver an encoded chunk
    pub fn chunk(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(Event::Chunk {
            generation: self.generation,
            bytes,
        });
    }

    /// Report that the device failed mid-stream
    pub fn fault(&self, message: impl Into<String>) {
        let _ = self.tx.send(Event::Fault {
            generation: self.generation,
            fault: Fault::Device(message.into()),
        });
    }

    /// Generation this sink reports under
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }
}

/// One-shot completion notifier for a single playback
///
/// Consumed on use, so a playback can report its end at most once. Dropping
/// it unused (as `stop` does) reports nothing.
#[derive(Debug)]
pub struct PlaybackDone {
    generation: Generation,
    tx: EventSender,
}

impl PlaybackDone {
    /// Create a notifier bound to one speaking phase
    #[must_use]
    pub const fn new(generation: Generation, tx: EventSender) -> Self {
        Self { generation, tx }
    }

    /// Report the natural end of the audio
    pub fn finished(self) {
        let _ = self.tx.send(Event::PlaybackFinished {
            generation: self.generation,
        });
    }

    /// Report that the sink could not render the audio
    pub fn failed(self, message: impl Into<String>) {
        let _ = self.tx.send(Event::Fault {
            generation: self.generation,
            fault: Fault::Playback(message.into()),
        });
    }
}

/// Clonable control surface for a running conversation
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    tx: EventSender,
}

impl ConversationHandle {
    pub(crate) const fn new(tx: EventSender) -> Self {
        Self { tx }
    }

    /// Start when idle, interrupt otherwise
    ///
    /// Returns false if the conversation loop has stopped.
    pub fn toggle(&self) -> bool {
        self.tx.send(Event::Toggle).is_ok()
    }

    /// Start a conversation
    pub fn start(&self) -> bool {
        self.tx.send(Event::Start).is_ok()
    }

    /// Interrupt and return to idle
    pub fn interrupt(&self) -> bool {
        self.tx.send(Event::Interrupt).is_ok()
    }

    /// Stop the conversation loop
    pub fn shutdown(&self) -> bool {
        self.tx.send(Event::Shutdown).is_ok()
    }
}
