//! Audio level metering
//!
//! Reduces the capture stream to one loudness value per hop, the way a
//! browser analyser node does: windowed FFT, temporally smoothed magnitudes
//! in decibels mapped onto a byte scale, averaged over all bins.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Decibel value mapped to level byte 0
pub const MIN_DECIBELS: f32 = -100.0;

/// Decibel value mapped to level byte 255
pub const MAX_DECIBELS: f32 = -30.0;

/// Computes a normalized loudness value from a block of samples
pub struct LevelMeter {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    smoothing: f32,
    scratch: Vec<Complex<f32>>,
}

impl LevelMeter {
    /// Create a meter over `fft_size` samples
    ///
    /// `smoothing` blends each bin with its previous value (0 = none).
    #[must_use]
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        Self {
            fft,
            window: blackman_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            smoothing,
            scratch: Vec::with_capacity(fft_size),
        }
    }

    /// Number of samples analysed per measurement
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Measure the most recent `fft_size` samples of `samples`
    ///
    /// Shorter input is zero-padded at the front. Returns a value in `[0, 1]`.
    #[allow(clippy::cast_precision_loss)]
    pub fn measure(&mut self, samples: &[f32]) -> f32 {
        let n = self.window.len();
        let tail = &samples[samples.len().saturating_sub(n)..];
        let pad = n - tail.len();

        self.scratch.clear();
        self.scratch.resize(pad, Complex::new(0.0, 0.0));
        self.scratch.extend(
            tail.iter()
                .zip(&self.window[pad..])
                .map(|(s, w)| Complex::new(s * w, 0.0)),
        );
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / n as f32;
        let byte_per_db = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
        let mut total = 0.0f32;

        for (bin, prev) in self.scratch.iter().zip(self.smoothed.iter_mut()) {
            let magnitude = bin.norm() * scale;
            *prev = self.smoothing.mul_add(*prev, (1.0 - self.smoothing) * magnitude);

            if *prev > 0.0 {
                let db = 20.0 * prev.log10();
                total += (byte_per_db * (db - MIN_DECIBELS)).clamp(0.0, 255.0).floor();
            }
        }

        if self.smoothed.is_empty() {
            return 0.0;
        }

        (total / self.smoothed.len() as f32 / 255.0).clamp(0.0, 1.0)
    }
}

/// Emits one level per `hop` input samples, measured over the latest window
///
/// One sampler belongs to one capture stream; a new stream gets a new sampler.
pub struct LevelSampler {
    meter: LevelMeter,
    history: Vec<f32>,
    hop: usize,
    pending: usize,
}

impl LevelSampler {
    /// Create a sampler emitting every `hop` samples
    #[must_use]
    pub fn new(meter: LevelMeter, hop: usize) -> Self {
        let capacity = meter.fft_size();
        Self {
            meter,
            history: Vec::with_capacity(capacity * 2),
            hop: hop.max(1),
            pending: 0,
        }
    }

    /// Feed captured samples, calling `emit` for every level produced
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(f32)) {
        let window = self.meter.fft_size();

        while !samples.is_empty() {
            let take = (self.hop - self.pending).min(samples.len());
            let (head, rest) = samples.split_at(take);
            samples = rest;

            self.history.extend_from_slice(head);
            let excess = self.history.len().saturating_sub(window);
            self.history.drain(..excess);

            self.pending += take;
            if self.pending == self.hop {
                self.pending = 0;
                emit(self.meter.measure(&self.history));
            }
        }
    }
}

/// Visual feedback size for a level, in pixels
#[must_use]
pub fn ring_size(level: f32) -> f32 {
    level.clamp(0.0, 1.0).mul_add(100.0, 150.0)
}

#[allow(clippy::cast_precision_loss)]
fn blackman_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }

    let denom = n as f32;
    (0..n)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / denom;
            0.08f32.mul_add((2.0 * x).cos(), 0.5f32.mul_add(-x.cos(), 0.42))
        })
        .collect()
}
