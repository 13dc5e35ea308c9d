//! Per-turn capture buffering
//!
//! Chunks arrive from the capture device while a turn is open and are sealed
//! into one payload when the turn ends. A sealed pipeline rejects everything
//! until it is opened again.

use crate::{Error, Result};

/// Encoding of the chunks a capture device emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFormat {
    /// Raw little-endian 16-bit mono PCM, sealed into a WAV container
    Pcm16 {
        /// Sample rate in Hz
        sample_rate: u32,
    },
    /// Already-encoded container bytes, sealed by concatenation
    Encoded {
        /// MIME type of the container (e.g. `audio/webm`)
        content_type: String,
        /// File name sent alongside the upload
        file_name: String,
    },
}

impl ChunkFormat {
    /// MIME type of the sealed payload
    #[must_use]
    pub fn content_type(&self) -> &str {
        match self {
            Self::Pcm16 { .. } => "audio/wav",
            Self::Encoded { content_type, .. } => content_type,
        }
    }

    /// File name of the sealed payload
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self {
            Self::Pcm16 { .. } => "input.wav",
            Self::Encoded { file_name, .. } => file_name,
        }
    }
}

/// A finalized utterance ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnPayload {
    /// Encoded audio
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`
    pub content_type: String,
    /// File name for the multipart upload
    pub file_name: String,
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Never opened, or discarded
    Closed,
    /// Accepting chunks
    Open,
    /// Payload produced; inert until reopened
    Sealed,
}

/// Buffers the encoded chunks of one turn
#[derive(Debug)]
pub struct CapturePipeline {
    format: ChunkFormat,
    chunks: Vec<Vec<u8>>,
    state: PipelineState,
    rejected: usize,
}

impl CapturePipeline {
    /// Create a closed pipeline for chunks of `format`
    #[must_use]
    pub const fn new(format: ChunkFormat) -> Self {
        Self {
            format,
            chunks: Vec::new(),
            state: PipelineState::Closed,
            rejected: 0,
        }
    }

    /// Start a new turn, dropping anything left from a prior cycle
    pub fn open(&mut self) {
        if !self.chunks.is_empty() {
            tracing::debug!(stale_chunks = self.chunks.len(), "discarding leftover chunks");
        }
        self.chunks.clear();
        self.rejected = 0;
        self.state = PipelineState::Open;
    }

    /// Append one chunk in arrival order
    ///
    /// Returns false, and logs, if the pipeline is not open.
    pub fn append_chunk(&mut self, chunk: Vec<u8>) -> bool {
        if self.state != PipelineState::Open {
            self.rejected += 1;
            tracing::warn!(
                state = ?self.state,
                bytes = chunk.len(),
                "rejected chunk outside an open turn"
            );
            return false;
        }

        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        true
    }

    /// Concatenate all chunks into a payload and stop accepting chunks
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline is not open, or WAV encoding fails
    pub fn seal(&mut self) -> Result<TurnPayload> {
        if self.state != PipelineState::Open {
            return Err(Error::Pipeline(format!(
                "cannot seal a pipeline in state {:?}",
                self.state
            )));
        }
        self.state = PipelineState::Sealed;

        let raw = std::mem::take(&mut self.chunks).concat();
        let bytes = match self.format {
            ChunkFormat::Pcm16 { sample_rate } => pcm16_to_wav(&raw, sample_rate)?,
            ChunkFormat::Encoded { .. } => raw,
        };

        tracing::debug!(
            bytes = bytes.len(),
            content_type = self.format.content_type(),
            "turn sealed"
        );

        Ok(TurnPayload {
            bytes,
            content_type: self.format.content_type().to_string(),
            file_name: self.format.file_name().to_string(),
        })
    }

    /// Drop the current turn without producing a payload
    pub fn discard(&mut self) {
        self.chunks.clear();
        self.state = PipelineState::Closed;
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of chunks buffered in the open turn
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks rejected since the last `open`
    #[must_use]
    pub const fn rejected(&self) -> usize {
        self.rejected
    }

    /// Chunk format this pipeline seals
    #[must_use]
    pub const fn format(&self) -> &ChunkFormat {
        &self.format
    }
}

/// Wrap little-endian 16-bit mono PCM in a WAV container
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Pipeline(e.to_string()))?;

        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Pipeline(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Pipeline(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
