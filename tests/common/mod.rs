//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley::conversation::{CaptureSink, Conversation, Event, PlaybackDone};
use parley::transport::{AudioResponse, EchoTransport, TurnTransport};
use parley::voice::{CaptureDevice, ChunkFormat, PlaybackSink, TurnPayload, VadConfig};
use parley::{Error, Result};
use tokio::sync::Notify;

/// VAD settings whose timer never fires on its own during a test
pub fn manual_vad() -> VadConfig {
    VadConfig {
        check_interval: Duration::from_secs(3600),
        ..VadConfig::default()
    }
}

/// Shared view into a `MockDevice`
#[derive(Clone, Default)]
pub struct DeviceProbe {
    calls: Arc<Mutex<Vec<&'static str>>>,
    sink: Arc<Mutex<Option<CaptureSink>>>,
}

impl DeviceProbe {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    /// Sink handed to the most recent `start`
    pub fn sink(&self) -> CaptureSink {
        self.sink
            .lock()
            .unwrap()
            .clone()
            .expect("device was never started")
    }
}

/// Capture device that records calls and exposes its sink
pub struct MockDevice {
    probe: DeviceProbe,
    fail_acquire: bool,
}

impl MockDevice {
    pub fn new() -> (Self, DeviceProbe) {
        let probe = DeviceProbe::default();
        (
            Self {
                probe: probe.clone(),
                fail_acquire: false,
            },
            probe,
        )
    }

    pub fn denied() -> (Self, DeviceProbe) {
        let (mut device, probe) = Self::new();
        device.fail_acquire = true;
        (device, probe)
    }
}

impl CaptureDevice for MockDevice {
    fn acquire(&mut self) -> Result<()> {
        self.probe.calls.lock().unwrap().push("acquire");
        if self.fail_acquire {
            return Err(Error::Device("permission denied".to_string()));
        }
        Ok(())
    }

    fn start(&mut self, sink: CaptureSink) -> Result<()> {
        self.probe.calls.lock().unwrap().push("start");
        *self.probe.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.calls.lock().unwrap().push("stop");
    }

    fn release(&mut self) {
        self.probe.calls.lock().unwrap().push("release");
    }

    fn format(&self) -> ChunkFormat {
        ChunkFormat::Encoded {
            content_type: "audio/webm".to_string(),
            file_name: "input.webm".to_string(),
        }
    }
}

/// Shared view into a `MockPlayback`
#[derive(Clone, Default)]
pub struct PlaybackProbe {
    played: Arc<Mutex<Vec<AudioResponse>>>,
    stops: Arc<Mutex<usize>>,
    done: Arc<Mutex<Option<PlaybackDone>>>,
}

impl PlaybackProbe {
    pub fn played(&self) -> Vec<AudioResponse> {
        self.played.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        *self.stops.lock().unwrap()
    }

    /// Report the natural end of the current playback
    ///
    /// Returns false if nothing is playing.
    pub fn finish(&self) -> bool {
        let done = self.done.lock().unwrap().take();
        done.map(PlaybackDone::finished).is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.done.lock().unwrap().is_some()
    }
}

/// Playback sink that records responses and completes on demand
pub struct MockPlayback {
    probe: PlaybackProbe,
    reject: bool,
}

impl MockPlayback {
    pub fn new() -> (Self, PlaybackProbe) {
        let probe = PlaybackProbe::default();
        (
            Self {
                probe: probe.clone(),
                reject: false,
            },
            probe,
        )
    }

    pub fn rejecting() -> (Self, PlaybackProbe) {
        let (mut playback, probe) = Self::new();
        playback.reject = true;
        (playback, probe)
    }
}

impl PlaybackSink for MockPlayback {
    fn play(&mut self, response: AudioResponse, done: PlaybackDone) -> Result<()> {
        if self.reject {
            return Err(Error::Playback("unsupported format".to_string()));
        }
        self.probe.played.lock().unwrap().push(response);
        *self.probe.done.lock().unwrap() = Some(done);
        Ok(())
    }

    fn stop(&mut self) {
        *self.probe.stops.lock().unwrap() += 1;
        self.probe.done.lock().unwrap().take();
    }
}

/// Transport with a scripted outcome, optionally held until released
pub struct ScriptedTransport {
    outcome: std::result::Result<AudioResponse, String>,
    gate: Option<Arc<Notify>>,
    sent: Arc<Mutex<Vec<TurnPayload>>>,
}

impl ScriptedTransport {
    pub fn failing(message: &str) -> (Arc<Self>, Arc<Mutex<Vec<TurnPayload>>>) {
        Self::build(Err(message.to_string()), None)
    }

    pub fn responding(bytes: Vec<u8>) -> (Arc<Self>, Arc<Mutex<Vec<TurnPayload>>>) {
        Self::build(
            Ok(AudioResponse {
                bytes,
                content_type: "audio/mpeg".to_string(),
            }),
            None,
        )
    }

    /// Responds only after `gate` is notified
    pub fn gated(
        bytes: Vec<u8>,
        gate: Arc<Notify>,
    ) -> (Arc<Self>, Arc<Mutex<Vec<TurnPayload>>>) {
        Self::build(
            Ok(AudioResponse {
                bytes,
                content_type: "audio/mpeg".to_string(),
            }),
            Some(gate),
        )
    }

    fn build(
        outcome: std::result::Result<AudioResponse, String>,
        gate: Option<Arc<Notify>>,
    ) -> (Arc<Self>, Arc<Mutex<Vec<TurnPayload>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(Self {
            outcome,
            gate,
            sent: sent.clone(),
        });
        (transport, sent)
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    async fn send(&self, payload: TurnPayload) -> Result<AudioResponse> {
        self.sent.lock().unwrap().push(payload);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcome.clone().map_err(Error::Transport)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// A conversation over mocks, with probes into each collaborator
pub struct Harness {
    pub conversation: Conversation,
    pub device: DeviceProbe,
    pub playback: PlaybackProbe,
}

impl Harness {
    pub fn new(transport: Arc<dyn TurnTransport>) -> Self {
        let (device, device_probe) = MockDevice::new();
        let (playback, playback_probe) = MockPlayback::new();
        Self::with_parts(
            Box::new(device),
            device_probe,
            Box::new(playback),
            playback_probe,
            transport,
        )
    }

    pub fn echo() -> Self {
        Self::new(Arc::new(EchoTransport))
    }

    pub fn with_parts(
        device: Box<dyn CaptureDevice>,
        device_probe: DeviceProbe,
        playback: Box<dyn PlaybackSink>,
        playback_probe: PlaybackProbe,
        transport: Arc<dyn TurnTransport>,
    ) -> Self {
        Self {
            conversation: Conversation::new(manual_vad(), device, playback, transport),
            device: device_probe,
            playback: playback_probe,
        }
    }

    /// Wait for the next queued event, failing the test after two seconds
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(2), self.conversation.next_event())
            .await
            .expect("timed out waiting for an event")
            .expect("event queue closed")
    }

    /// Dispatch every event already queued, all observed at `now`
    pub fn drain(&mut self, now: std::time::Instant) -> usize {
        let mut dispatched = 0;
        while let Some(event) = self.conversation.try_next_event() {
            self.conversation.dispatch(event, now);
            dispatched += 1;
        }
        dispatched
    }

    /// Wait for one event and dispatch it at `now`
    pub async fn step(&mut self, now: std::time::Instant) {
        let event = self.next_event().await;
        self.conversation.dispatch(event, now);
    }
}
