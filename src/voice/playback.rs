//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use rubato::{FftFixedInOut, Resampler};

use crate::conversation::PlaybackDone;
use crate::transport::AudioResponse;
use crate::{Error, Result};

/// Lowest response sample rate accepted for playback
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest response sample rate accepted for playback
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// An output sink the conversation hands responses to
pub trait PlaybackSink {
    /// Start playing `response`; call `done.finished()` at its natural end
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded or the sink cannot play
    fn play(&mut self, response: AudioResponse, done: PlaybackDone) -> Result<()>;

    /// Truncate playback without reporting completion
    fn stop(&mut self);
}

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in `[-1, 1]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    stream: Option<Stream>,
    done: Arc<Mutex<Option<PlaybackDone>>>,
}

impl AudioPlayback {
    /// Create a playback instance; the device is opened per response
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: None,
            done: Arc::new(Mutex::new(None)),
        }
    }

    /// Check if a response is currently playing
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the default output device with an f32 configuration
    fn open_output() -> Result<(cpal::Device, StreamConfig)> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let supported = device
            .default_output_config()
            .ok()
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .or_else(|| {
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| c.sample_format() == cpal::SampleFormat::F32)
                    .map(cpal::SupportedStreamConfigRange::with_max_sample_rate)
            })
            .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

        let config = supported.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback opened"
        );

        Ok((device, config))
    }
}

impl Default for AudioPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for AudioPlayback {
    fn play(&mut self, response: AudioResponse, done: PlaybackDone) -> Result<()> {
        self.stop();

        let decoded = decode(&response)?;
        let (device, config) = Self::open_output()?;
        let samples = resample(&decoded.samples, decoded.sample_rate, config.sample_rate.0)?;
        let channels = usize::from(config.channels);
        let total = samples.len();

        if let Ok(mut slot) = self.done.lock() {
            *slot = Some(done);
        }

        let position = Arc::new(AtomicUsize::new(0));
        let done_slot = Arc::clone(&self.done);
        let error_slot = Arc::clone(&self.done);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);

                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }

                    position.store(pos, Ordering::Relaxed);

                    if pos >= samples.len() {
                        let finished = done_slot.lock().ok().and_then(|mut slot| slot.take());
                        if let Some(done) = finished {
                            done.finished();
                        }
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    let pending = error_slot.lock().ok().and_then(|mut slot| slot.take());
                    if let Some(done) = pending {
                        done.failed(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(samples = total, content_type = %response.content_type, "playback started");
        Ok(())
    }

    fn stop(&mut self) {
        // Drop the notifier first so a racing callback cannot report completion
        if let Ok(mut slot) = self.done.lock() {
            slot.take();
        }

        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("playback stopped");
        }
    }
}

/// Decode a response into mono samples
///
/// WAV is recognised by its RIFF header; everything else is tried as MP3.
///
/// # Errors
///
/// Returns error if the payload holds no decodable audio, or its sample rate
/// is outside [`MIN_SAMPLE_RATE`]..=[`MAX_SAMPLE_RATE`]
pub fn decode(response: &AudioResponse) -> Result<DecodedAudio> {
    let decoded = if response.bytes.starts_with(b"RIFF") {
        decode_wav(&response.bytes)?
    } else {
        decode_mp3(&response.bytes)?
    };

    if decoded.samples.is_empty() {
        return Err(Error::Playback(format!(
            "no decodable audio in {} response",
            response.content_type
        )));
    }

    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&decoded.sample_rate) {
        return Err(Error::Playback(format!(
            "unsupported sample rate {} Hz in {} response",
            decoded.sample_rate, response.content_type
        )));
    }

    Ok(decoded)
}

/// Decode WAV bytes to mono f32 samples
fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    #[allow(clippy::cast_precision_loss)]
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }

                // Convert i16 samples to f32 and handle stereo to mono
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 && !samples.is_empty() {
        return Err(Error::Playback("MP3 stream without sample rate".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Resample mono audio between rates
///
/// The resampler's output delay is trimmed from the front and its tail is
/// flushed, so the result lines up with the input.
///
/// # Errors
///
/// Returns error if the resampler cannot be built for the rate pair
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedInOut::<f32>::new(from as usize, to as usize, 1024, 1)
        .map_err(|e| Error::Playback(format!("resampler error: {e}")))?;
    let chunk = resampler.input_frames_next();
    let delay = resampler.output_delay();

    let scaled = (samples.len() as u64 * u64::from(to)).div_ceil(u64::from(from));
    let expected = usize::try_from(scaled)
        .map_err(|_| Error::Playback("resampled output too large".to_string()))?;
    let mut out = Vec::with_capacity(delay + expected + resampler.output_frames_max());

    let mut blocks = samples.chunks(chunk);
    while out.len() < delay + expected {
        let mut input = blocks.next().map_or_else(Vec::new, <[f32]>::to_vec);
        input.resize(chunk, 0.0);
        let frames = resampler
            .process(&[input], None)
            .map_err(|e| Error::Playback(format!("resampler error: {e}")))?;
        match frames.first() {
            Some(mono) if !mono.is_empty() => out.extend_from_slice(mono),
            _ => break,
        }
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}
