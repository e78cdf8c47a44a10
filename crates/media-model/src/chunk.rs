//! Encoded output segments and the assembled job result.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::format::OutputFormat;

/// One periodically flushed unit of encoded output.
///
/// Concatenating the chunks of a cleanly stopped session in arrival order
/// yields a complete container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Zero-based emission index within the session.
    pub sequence: u64,
    pub data: Bytes,
}

impl EncodedChunk {
    pub fn new(sequence: u64, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Concatenate chunks in the order given.
pub fn concat_chunks(chunks: &[EncodedChunk]) -> Bytes {
    let total = chunks.iter().map(EncodedChunk::len).sum();
    let mut payload = BytesMut::with_capacity(total);
    for chunk in chunks {
        payload.extend_from_slice(&chunk.data);
    }
    payload.freeze()
}

/// A non-fatal problem a job recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// The audio track could not be decoded; the output has no audio.
    AudioDecode { message: String },
}

/// Result of a completed processing job.
#[derive(Debug, Clone)]
pub struct ProcessingOutput {
    pub payload: Bytes,
    pub format: OutputFormat,
    pub chunk_count: usize,
    pub frames_drawn: u64,
    pub has_audio: bool,
    pub warnings: Vec<Degradation>,
}

impl ProcessingOutput {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn file_extension(&self) -> &'static str {
        self.format.file_extension()
    }

    /// Default name for saving the output.
    pub fn suggested_file_name(&self) -> String {
        format!("markfree_processed_video.{}", self.file_extension())
    }
}
