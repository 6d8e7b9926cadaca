use crate::{
    error::Result,
    progress::ProgressSender,
    utils::{MediaKind, format_duration},
};
use serde::Deserialize;
use std::{fmt::Write, path::PathBuf};
use tokio_util::sync::CancellationToken;

/// Metadata reported by the extractor, either from a dry run or alongside a
/// finished download.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatInfo {
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
}

impl MediaInfo {
    #[must_use]
    pub fn has_video(&self) -> bool {
        self.formats.iter().any(|f| f.vcodec.as_deref() != Some("none"))
    }

    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.formats.iter().any(|f| f.acodec.as_deref() != Some("none"))
    }

    /// Summary shown before the user picks a type.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut text = String::from("Video info:\n");
        let _ = writeln!(text, "Title: {}", self.title.as_deref().unwrap_or("Unknown"));
        let duration = self
            .duration
            .filter(|d| *d > 0.0)
            .map_or_else(|| "Unknown".to_string(), format_duration);
        let _ = writeln!(text, "Duration: {duration}");
        let _ = write!(
            text,
            "Has video: {}, Has audio: {}",
            self.has_video(),
            self.has_audio()
        );
        text
    }
}

/// Which streams to ask the extractor for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    pub kind: MediaKind,
    pub selector: String,
    /// Merge separate video and audio streams into an mp4 container.
    pub merge_mp4: bool,
    /// Convert the downloaded audio to mp3.
    pub extract_mp3: bool,
}

impl FormatSpec {
    /// The format asked for first, derived from the kind and the user's quality hint
    /// (`best`, `mp3`, or a height such as `720p`).
    #[must_use]
    pub fn preferred(kind: MediaKind, quality: &str) -> Self {
        match kind {
            MediaKind::Audio => Self {
                kind,
                selector: "bestaudio/best".into(),
                merge_mp4: false,
                extract_mp3: quality.eq_ignore_ascii_case("mp3"),
            },
            MediaKind::Video => {
                let selector = parse_height(quality).map_or_else(
                    || "bestvideo+bestaudio/best".to_string(),
                    |h| format!("bv*[height<={h}]+ba/b[height<={h}]/b"),
                );
                Self {
                    kind,
                    selector,
                    merge_mp4: true,
                    extract_mp3: false,
                }
            }
            MediaKind::Image => Self {
                kind,
                selector: "best".into(),
                merge_mp4: false,
                extract_mp3: false,
            },
        }
    }

    /// The generic format used for the single retry after "format unavailable".
    #[must_use]
    pub fn relaxed(&self) -> Self {
        let selector = match self.kind {
            MediaKind::Audio => "bestaudio",
            MediaKind::Video | MediaKind::Image => "best",
        };
        Self {
            kind: self.kind,
            selector: selector.into(),
            merge_mp4: false,
            extract_mp3: self.extract_mp3,
        }
    }

    /// Single-file fallback used when streams cannot be merged locally.
    #[must_use]
    pub fn single_file(&self) -> Self {
        Self {
            selector: "best".into(),
            merge_mp4: false,
            ..self.clone()
        }
    }
}

fn parse_height(quality: &str) -> Option<u32> {
    quality
        .trim()
        .strip_suffix('p')
        .and_then(|h| h.parse().ok())
        .filter(|h| *h > 0)
}

/// One download asked of an extractor. The extractor writes into `workdir`,
/// which belongs to the requesting operation.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub format: FormatSpec,
    pub workdir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub path: PathBuf,
    pub info: MediaInfo,
}

/// The external media extraction capability.
#[async_trait::async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Inspect `url` without downloading it.
    async fn extract_info(&self, url: &str) -> Result<MediaInfo>;

    /// Download `request.url` into `request.workdir`.
    ///
    /// Implementations report progress through `progress` and are expected to
    /// check `cancel` at their own checkpoints, returning `Error::Cancelled`
    /// once they notice it. Failures must be classified: `RequiresAuth`,
    /// `FormatUnavailable`, or `DownloadFailed`.
    async fn download(
        &self,
        request: DownloadRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Downloaded>;
}
