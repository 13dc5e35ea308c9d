//! Voice processing module
//!
//! Handles audio capture, loudness metering, voice activity detection,
//! per-turn buffering and playback.

mod capture;
mod level;
mod pipeline;
mod playback;
mod vad;

pub use capture::{AudioCapture, CaptureConfig, CaptureDevice, ChunkEncoder, SAMPLE_RATE};
pub use level::{LevelMeter, LevelSampler, MAX_DECIBELS, MIN_DECIBELS, ring_size};
pub use pipeline::{CapturePipeline, ChunkFormat, PipelineState, TurnPayload, pcm16_to_wav};
pub use playback::{
    AudioPlayback, DecodedAudio, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, PlaybackSink, decode, resample,
};
pub use vad::{
    DEFAULT_CHECK_INTERVAL, DEFAULT_SILENCE, DEFAULT_THRESHOLD, VadConfig, VadPhase,
    VoiceActivityDetector,
};
