//! Output container/codec formats and capability-based negotiation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Container family of an output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
}

/// An output format the muxer can be asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// MP4 with H.264 Constrained Baseline video and AAC-LC audio.
    Mp4AvcAac,
    /// MP4 with whatever codecs the encoder picks.
    Mp4,
    /// WebM, the baseline every encoder is expected to support.
    Webm,
}

/// Formats tried in order before falling back to [`OutputFormat::BASELINE`].
pub const DEFAULT_FORMAT_PREFERENCE: [OutputFormat; 2] =
    [OutputFormat::Mp4AvcAac, OutputFormat::Mp4];

impl OutputFormat {
    /// Universally supported fallback.
    pub const BASELINE: OutputFormat = OutputFormat::Webm;

    /// MIME type used for capability probing and reported in the result.
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4AvcAac => r#"video/mp4; codecs="avc1.42E01E, mp4a.40.2""#,
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self.container() {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    pub fn container(&self) -> Container {
        match self {
            OutputFormat::Mp4AvcAac | OutputFormat::Mp4 => Container::Mp4,
            OutputFormat::Webm => Container::Webm,
        }
    }

    /// Pick the first format in `preference` the probe accepts, else the
    /// baseline.
    ///
    /// The baseline is returned without probing: it is the last resort and
    /// any encoder failure on it surfaces when the muxer starts.
    pub fn negotiate<F>(preference: &[OutputFormat], mut is_supported: F) -> OutputFormat
    where
        F: FnMut(&str) -> bool,
    {
        preference
            .iter()
            .copied()
            .find(|format| is_supported(format.mime_type()))
            .unwrap_or(OutputFormat::BASELINE)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_codec_qualified_mp4() {
        let chosen = OutputFormat::negotiate(&DEFAULT_FORMAT_PREFERENCE, |_| true);
        assert_eq!(chosen, OutputFormat::Mp4AvcAac);
        assert_eq!(chosen.file_extension(), "mp4");
    }

    #[test]
    fn falls_back_to_generic_mp4() {
        let chosen =
            OutputFormat::negotiate(&DEFAULT_FORMAT_PREFERENCE, |mime| mime == "video/mp4");
        assert_eq!(chosen, OutputFormat::Mp4);
    }

    #[test]
    fn falls_back_to_webm_baseline() {
        let chosen = OutputFormat::negotiate(&DEFAULT_FORMAT_PREFERENCE, |_| false);
        assert_eq!(chosen, OutputFormat::Webm);
        assert_eq!(chosen.file_extension(), "webm");
        assert_eq!(chosen.mime_type(), "video/webm");
    }

    #[test]
    fn negotiation_is_deterministic() {
        let probe = |mime: &str| mime.starts_with("video/mp4;");
        let first = OutputFormat::negotiate(&DEFAULT_FORMAT_PREFERENCE, probe);
        for _ in 0..16 {
            assert_eq!(OutputFormat::negotiate(&DEFAULT_FORMAT_PREFERENCE, probe), first);
        }
    }
}
