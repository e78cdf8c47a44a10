//! Error types shared across MarkFree crates.

use std::fmt;

/// Top-level error type for MarkFree operations.
///
/// Every message is shown to the user verbatim by the calling UI, so they
/// are phrased as complete, human-readable sentences.
#[derive(Debug, thiserror::Error)]
pub enum MarkfreeError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Audio decode failed: {message}")]
    AudioDecode { message: String },

    #[error("Video playback error: {message}")]
    Playback { message: String },

    #[error("Draw frame error: {message}")]
    Draw { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("No video data captured")]
    NoDataCaptured,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MarkfreeError.
pub type MarkfreeResult<T> = Result<T, MarkfreeError>;

/// Failure taxonomy of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidInput,
    AudioDecodeDegraded,
    PlaybackFailure,
    DrawFailure,
    EncoderFailure,
    NoDataCaptured,
    /// Errors raised outside a job (config, I/O, unsupported platform).
    Environment,
}

impl FailureKind {
    /// Whether this kind aborts a job. Audio degradation never does.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FailureKind::AudioDecodeDegraded)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::InvalidInput => "invalid-input",
            FailureKind::AudioDecodeDegraded => "audio-decode-degraded",
            FailureKind::PlaybackFailure => "playback-failure",
            FailureKind::DrawFailure => "draw-failure",
            FailureKind::EncoderFailure => "encoder-failure",
            FailureKind::NoDataCaptured => "no-data-captured",
            FailureKind::Environment => "environment",
        };
        f.write_str(name)
    }
}

impl MarkfreeError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn audio_decode(msg: impl Into<String>) -> Self {
        Self::AudioDecode {
            message: msg.into(),
        }
    }

    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback {
            message: msg.into(),
        }
    }

    pub fn draw(msg: impl Into<String>) -> Self {
        Self::Draw {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Classify this error into the job failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput { .. } => FailureKind::InvalidInput,
            Self::AudioDecode { .. } => FailureKind::AudioDecodeDegraded,
            Self::Playback { .. } => FailureKind::PlaybackFailure,
            Self::Draw { .. } => FailureKind::DrawFailure,
            Self::Encoder { .. } => FailureKind::EncoderFailure,
            Self::NoDataCaptured => FailureKind::NoDataCaptured,
            Self::Config { .. }
            | Self::Unsupported { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => FailureKind::Environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            MarkfreeError::invalid_input("Invalid video duration").kind(),
            FailureKind::InvalidInput
        );
        assert_eq!(
            MarkfreeError::encoder("boom").kind(),
            FailureKind::EncoderFailure
        );
        assert_eq!(
            MarkfreeError::NoDataCaptured.kind(),
            FailureKind::NoDataCaptured
        );
    }

    #[test]
    fn only_audio_degradation_is_non_fatal() {
        assert!(!FailureKind::AudioDecodeDegraded.is_fatal());
        assert!(FailureKind::DrawFailure.is_fatal());
        assert!(FailureKind::NoDataCaptured.is_fatal());
    }

    #[test]
    fn messages_are_human_readable() {
        let err = MarkfreeError::playback("source stalled");
        assert_eq!(err.to_string(), "Video playback error: source stalled");
        assert_eq!(
            MarkfreeError::NoDataCaptured.to_string(),
            "No video data captured"
        );
    }
}
