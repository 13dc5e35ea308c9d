//! Audio capture from microphone

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::level::{LevelMeter, LevelSampler};
use super::pipeline::ChunkFormat;
use crate::conversation::CaptureSink;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Capture stream settings
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Requested input sample rate in Hz
    pub sample_rate: u32,
    /// Audio per encoded chunk
    pub chunk: Duration,
    /// Samples analysed per level measurement
    pub fft_size: usize,
    /// Samples between level measurements
    pub hop: usize,
    /// Per-bin smoothing of the level meter
    pub smoothing: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            chunk: Duration::from_millis(100),
            fft_size: 1024,
            hop: 512,
            smoothing: 0.8,
        }
    }
}

impl CaptureConfig {
    /// Samples per encoded chunk at the configured rate
    #[must_use]
    pub fn chunk_samples(&self) -> usize {
        let samples = u128::from(self.sample_rate) * self.chunk.as_millis() / 1000;
        usize::try_from(samples).unwrap_or(usize::MAX).max(1)
    }

    /// Level sampler for one stream
    #[must_use]
    pub fn sampler(&self) -> LevelSampler {
        LevelSampler::new(LevelMeter::new(self.fft_size, self.smoothing), self.hop)
    }
}

/// An input device the conversation drives
///
/// The device is acquired once when a conversation starts, streamed once per
/// listening phase, and released when the conversation goes idle.
pub trait CaptureDevice {
    /// Open the input device
    ///
    /// # Errors
    ///
    /// Returns error if no usable input device is available
    fn acquire(&mut self) -> Result<()>;

    /// Start streaming levels and chunks into `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be started
    fn start(&mut self, sink: CaptureSink) -> Result<()>;

    /// Stop the stream, keeping the device
    fn stop(&mut self);

    /// Stop and release the device
    fn release(&mut self);

    /// Encoding of the chunks this device emits
    fn format(&self) -> ChunkFormat;
}

/// Captures audio from the default input device
pub struct AudioCapture {
    settings: CaptureConfig,
    device: Option<Device>,
    config: Option<StreamConfig>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a capture instance; the device is opened on `acquire`
    #[must_use]
    pub const fn new(settings: CaptureConfig) -> Self {
        Self {
            settings,
            device: None,
            config: None,
            stream: None,
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }
}

impl CaptureDevice for AudioCapture {
    fn acquire(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let rate = SampleRate(self.settings.sample_rate);
        let supports = |c: &cpal::SupportedStreamConfigRange| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        };

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| c.channels() == 1 && supports(c))
            .or_else(|| {
                // Fallback: any channel count, downmixed in the callback
                device.supported_input_configs().ok()?.find(supports)
            })
            .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.settings.sample_rate,
            channels = config.channels,
            "audio capture acquired"
        );

        self.device = Some(device);
        self.config = Some(config);
        Ok(())
    }

    fn start(&mut self, sink: CaptureSink) -> Result<()> {
        self.stop();

        let (Some(device), Some(config)) = (&self.device, &self.config) else {
            return Err(Error::Device("capture device not acquired".to_string()));
        };

        let channels = usize::from(config.channels);
        let mut sampler = self.settings.sampler();
        let mut encoder = ChunkEncoder::new(self.settings.chunk_samples());
        let mut mono = Vec::new();
        let data_sink = sink.clone();

        let stream = device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = downmix(data, channels, &mut mono);
                    sampler.push(samples, |level| data_sink.level(level));
                    encoder.push(samples, |chunk| data_sink.chunk(chunk));
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    sink.fault(err.to_string());
                },
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn release(&mut self) {
        self.stop();
        if self.device.take().is_some() {
            self.config = None;
            tracing::debug!("audio capture released");
        }
    }

    fn format(&self) -> ChunkFormat {
        ChunkFormat::Pcm16 {
            sample_rate: self.settings.sample_rate,
        }
    }
}

/// Average interleaved frames into mono, reusing `scratch`
fn downmix<'a>(data: &'a [f32], channels: usize, scratch: &'a mut Vec<f32>) -> &'a [f32] {
    if channels <= 1 {
        return data;
    }

    scratch.clear();
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    scratch.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
    scratch
}

/// Groups captured samples into fixed-size 16-bit PCM chunks
pub struct ChunkEncoder {
    chunk_bytes: usize,
    buf: Vec<u8>,
}

impl ChunkEncoder {
    /// Create an encoder emitting every `chunk_samples` samples
    #[must_use]
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_bytes = chunk_samples.max(1) * 2;
        Self {
            chunk_bytes,
            buf: Vec::with_capacity(chunk_bytes),
        }
    }

    /// Encode samples, calling `emit` with each completed chunk
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<u8>)) {
        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            self.buf.extend_from_slice(&sample_i16.to_le_bytes());

            if self.buf.len() >= self.chunk_bytes {
                let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_bytes));
                emit(chunk);
            }
        }
    }
}
