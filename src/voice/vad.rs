//! Voice activity detection
//!
//! Decides when the user has finished speaking: once any sample crosses the
//! threshold, a sustained run of sub-threshold samples ends the turn. Silence
//! alone, without prior speech, never ends a turn.

use std::time::{Duration, Instant};

/// Default level above which a sample counts as speech
pub const DEFAULT_THRESHOLD: f32 = 0.02;

/// Default silence after speech that ends a turn
pub const DEFAULT_SILENCE: Duration = Duration::from_millis(1500);

/// Default cadence of the periodic silence check
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Level in `[0, 1]` above which a sample counts as speech
    pub threshold: f32,
    /// Silence after speech that ends a turn
    pub silence: Duration,
    /// Cadence of the periodic silence check
    pub check_interval: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            silence: DEFAULT_SILENCE,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

/// Phase of the detector within one listening phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadPhase {
    /// Nothing above threshold heard yet
    WaitingForSpeech,
    /// Speech heard; tracking the silence that follows
    SpeechDetected,
    /// End of turn already reported
    Ended,
}

/// Tracks speech and silence across level samples
///
/// Both fields are only ever written by the single owner, so a sample update
/// and a silence check can never observe a torn pair.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    is_speaking: bool,
    silence_started_at: Option<Instant>,
    ended: bool,
}

impl VoiceActivityDetector {
    /// Create a detector in the waiting state
    #[must_use]
    pub const fn new(config: VadConfig) -> Self {
        Self {
            config,
            is_speaking: false,
            silence_started_at: None,
            ended: false,
        }
    }

    /// Clear all state; call once when a listening phase begins
    pub const fn reset(&mut self) {
        self.is_speaking = false;
        self.silence_started_at = None;
        self.ended = false;
    }

    /// Record one level sample
    ///
    /// Returns true if the sample counts as speech.
    pub fn on_sample(&mut self, level: f32, now: Instant) -> bool {
        if level > self.config.threshold {
            self.is_speaking = true;
            self.silence_started_at = Some(now);
            tracing::trace!(level, "speech sample");
            return true;
        }
        false
    }

    /// Periodic silence check
    ///
    /// Returns true exactly once per listening phase, when speech has been
    /// heard and the silence since the last speech sample exceeds the
    /// configured duration.
    pub fn check(&mut self, now: Instant) -> bool {
        if self.ended || !self.is_speaking {
            return false;
        }

        let Some(started) = self.silence_started_at else {
            return false;
        };

        let silent_for = now.saturating_duration_since(started);
        if silent_for > self.config.silence {
            self.ended = true;
            tracing::debug!(silent_ms = silent_for.as_millis(), "end of turn detected");
            return true;
        }

        false
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> VadPhase {
        if self.ended {
            VadPhase::Ended
        } else if self.is_speaking {
            VadPhase::SpeechDetected
        } else {
            VadPhase::WaitingForSpeech
        }
    }

    /// Whether speech has been heard in this phase
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// When the latest speech sample arrived
    #[must_use]
    pub const fn silence_started_at(&self) -> Option<Instant> {
        self.silence_started_at
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &VadConfig {
        &self.config
    }
}
