//! The conversation loop
//!
//! `Conversation` owns the VAD, the capture pipeline and every collaborator,
//! and is the only thing that mutates them. All inputs arrive as [`Event`]s on
//! one queue and are applied in order by [`Conversation::dispatch`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::event::{CaptureSink, ConversationHandle, Event, EventSender, Generation, PlaybackDone};
use super::state::{ConversationState, HEARING, Status};
use crate::Fault;
use crate::transport::{AudioResponse, TurnTransport};
use crate::voice::{
    CaptureDevice, CapturePipeline, PlaybackSink, VadConfig, VoiceActivityDetector, ring_size,
};

/// Drives one user through listen, think and speak cycles
pub struct Conversation {
    state: ConversationState,
    generation: Generation,
    vad: VoiceActivityDetector,
    pipeline: CapturePipeline,
    device: Box<dyn CaptureDevice>,
    playback: Box<dyn PlaybackSink>,
    transport: Arc<dyn TurnTransport>,
    device_acquired: bool,
    silence_timer: Option<JoinHandle<()>>,
    tx: EventSender,
    rx: mpsc::UnboundedReceiver<Event>,
    status: watch::Sender<Status>,
    turns_completed: u64,
}

impl Conversation {
    /// Create an idle conversation
    #[must_use]
    pub fn new(
        vad: VadConfig,
        device: Box<dyn CaptureDevice>,
        playback: Box<dyn PlaybackSink>,
        transport: Arc<dyn TurnTransport>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(Status::default());
        let pipeline = CapturePipeline::new(device.format());

        Self {
            state: ConversationState::Idle,
            generation: Generation::default(),
            vad: VoiceActivityDetector::new(vad),
            pipeline,
            device,
            playback,
            transport,
            device_acquired: false,
            silence_timer: None,
            tx,
            rx,
            status,
            turns_completed: 0,
        }
    }

    /// Control surface for this conversation
    #[must_use]
    pub fn handle(&self) -> ConversationHandle {
        ConversationHandle::new(self.tx.clone())
    }

    /// Observe published status
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Latest published status
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ConversationState {
        self.state
    }

    /// Current generation
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Voice activity detector for the current listening phase
    #[must_use]
    pub const fn vad(&self) -> &VoiceActivityDetector {
        &self.vad
    }

    /// Capture pipeline for the current turn
    #[must_use]
    pub const fn pipeline(&self) -> &CapturePipeline {
        &self.pipeline
    }

    /// Turns whose response played to the end
    #[must_use]
    pub const fn turns_completed(&self) -> u64 {
        self.turns_completed
    }

    /// Wait for the next queued event
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take a queued event without waiting
    pub fn try_next_event(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Process events until shutdown, then leave the conversation idle
    pub async fn run(mut self) {
        tracing::info!(transport = self.transport.name(), "conversation loop started");

        while let Some(event) = self.rx.recv().await {
            if !self.dispatch(event, Instant::now()) {
                break;
            }
        }

        tracing::info!(turns = self.turns_completed, "conversation loop stopped");
    }

    /// Apply one event observed at `now`
    ///
    /// Returns false once the loop should stop.
    pub fn dispatch(&mut self, event: Event, now: Instant) -> bool {
        if let Some(generation) = event.generation() {
            if generation != self.generation {
                tracing::trace!(
                    event = ?EventKind(&event),
                    event_generation = %generation,
                    current = %self.generation,
                    "dropping stale event"
                );
                return true;
            }
        }

        match (self.state, event) {
            (_, Event::Shutdown) => {
                self.enter_idle(None);
                return false;
            }

            (ConversationState::Idle, Event::Toggle | Event::Start) => self.start(),
            (_, Event::Toggle | Event::Interrupt) => self.interrupt(),

            (ConversationState::Listening, Event::Level { level, .. }) => {
                self.on_level(level, now);
            }
            (ConversationState::Listening, Event::Chunk { bytes, .. }) => {
                self.pipeline.append_chunk(bytes);
            }
            (ConversationState::Listening, Event::SilenceCheck { .. }) => {
                if self.vad.check(now) {
                    self.end_of_turn();
                }
            }

            (ConversationState::Thinking, Event::TransportDone { result, .. }) => match result {
                Ok(response) => self.begin_speaking(response),
                Err(fault) => self.enter_idle(Some(fault)),
            },

            (ConversationState::Speaking, Event::PlaybackFinished { .. }) => {
                self.turns_completed += 1;
                tracing::info!(turns = self.turns_completed, "turn completed");
                self.playback.stop();
                self.begin_listening();
            }

            (
                ConversationState::Listening
                | ConversationState::Thinking
                | ConversationState::Speaking,
                Event::Fault { fault, .. },
            ) => self.enter_idle(Some(fault)),

            (state, event) => {
                tracing::trace!(%state, event = ?EventKind(&event), "ignoring event");
            }
        }

        true
    }

    fn start(&mut self) {
        if let Err(e) = self.device.acquire() {
            let fault = Fault::Device(e.detail());
            tracing::warn!(error = %fault, "could not acquire capture device");
            self.status.send_replace(Status::faulted(fault, self.turns_completed));
            return;
        }

        self.device_acquired = true;
        self.begin_listening();
    }

    fn interrupt(&mut self) {
        if self.state == ConversationState::Idle {
            tracing::trace!("interrupt while idle");
            return;
        }

        tracing::info!(state = %self.state, "interrupted");
        self.enter_idle(None);
    }

    fn begin_listening(&mut self) {
        self.advance(ConversationState::Listening);
        self.pipeline.open();
        self.vad.reset();

        let sink = CaptureSink::new(self.generation, self.tx.clone());
        if let Err(e) = self.device.start(sink) {
            self.enter_idle(Some(Fault::Device(e.detail())));
            return;
        }

        self.spawn_silence_timer();
    }

    fn on_level(&mut self, level: f32, now: Instant) {
        let speaking = self.vad.on_sample(level, now);

        self.status.send_if_modified(|status| {
            let ring = ring_size(level);
            let detail = if speaking { HEARING } else { "" };
            if status.detail == detail && (status.ring_size - ring).abs() < f32::EPSILON {
                return false;
            }
            status.ring_size = ring;
            detail.clone_into(&mut status.detail);
            true
        });
    }

    fn end_of_turn(&mut self) {
        self.cancel_silence_timer();
        self.device.stop();

        let payload = match self.pipeline.seal() {
            Ok(payload) => payload,
            Err(e) => {
                self.enter_idle(Some(Fault::Transport(e.detail())));
                return;
            }
        };

        self.advance(ConversationState::Thinking);

        let generation = self.generation;
        let tx = self.tx.clone();
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            let result = transport
                .send(payload)
                .await
                .map_err(|e| Fault::Transport(e.detail()));
            let _ = tx.send(Event::TransportDone { generation, result });
        });
    }

    fn begin_speaking(&mut self, response: AudioResponse) {
        self.advance(ConversationState::Speaking);

        let done = PlaybackDone::new(self.generation, self.tx.clone());
        if let Err(e) = self.playback.play(response, done) {
            self.enter_idle(Some(Fault::Playback(e.detail())));
        }
    }

    /// Tear everything down and go idle, optionally surfacing a fault
    fn enter_idle(&mut self, fault: Option<Fault>) {
        self.cancel_silence_timer();
        self.device.stop();
        if self.device_acquired {
            self.device.release();
            self.device_acquired = false;
        }
        self.playback.stop();
        self.pipeline.discard();

        if self.state != ConversationState::Idle {
            self.advance(ConversationState::Idle);
        }

        if let Some(fault) = fault {
            tracing::warn!(error = %fault, "turn ended by fault");
            self.status.send_replace(Status::faulted(fault, self.turns_completed));
        }
    }

    fn advance(&mut self, to: ConversationState) {
        let from = self.state;
        self.state = to;
        self.generation = self.generation.next();

        tracing::info!(%from, %to, generation = %self.generation, "conversation transition");
        self.status.send_replace(Status::for_state(to, self.turns_completed));
    }

    fn spawn_silence_timer(&mut self) {
        self.cancel_silence_timer();

        let period = self.vad.config().check_interval.max(Duration::from_millis(1));
        let generation = self.generation;
        let tx = self.tx.clone();

        self.silence_timer = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if tx.send(Event::SilenceCheck { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_silence_timer(&mut self) {
        if let Some(timer) = self.silence_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.cancel_silence_timer();
    }
}

/// Event name for logs, without chunk or response payloads
struct EventKind<'a>(&'a Event);

impl std::fmt::Debug for EventKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            Event::Toggle => "toggle",
            Event::Start => "start",
            Event::Interrupt => "interrupt",
            Event::Shutdown => "shutdown",
            Event::Level { .. } => "level",
            Event::Chunk { .. } => "chunk",
            Event::SilenceCheck { .. } => "silence_check",
            Event::TransportDone { .. } => "transport_done",
            Event::PlaybackFinished { .. } => "playback_finished",
            Event::Fault { .. } => "fault",
        };
        f.write_str(name)
    }
}
