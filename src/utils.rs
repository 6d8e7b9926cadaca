use regex::Regex;
use std::{ffi::OsStr, fmt, path::Path, sync::OnceLock};

pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;
pub static VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "avi", "m4v", "3gp"];
pub static AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "opus", "ogg", "aac", "flac", "wav"];
pub static IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];

/// What an operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Image => "image",
        }
    }

    /// Capitalized label used in listings.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Image => "Image",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guess the kind of a file from its extension.
#[must_use]
pub fn media_kind_from_path(path: &Path) -> Option<MediaKind> {
    let ext = path.extension().and_then(OsStr::to_str)?;
    let matches = |list: &[&str]| list.iter().any(|e| e.eq_ignore_ascii_case(ext));

    if matches(VIDEO_EXTENSIONS) {
        Some(MediaKind::Video)
    } else if matches(AUDIO_EXTENSIONS) {
        Some(MediaKind::Audio)
    } else if matches(IMAGE_EXTENSIONS) {
        Some(MediaKind::Image)
    } else {
        None
    }
}

/// Pick a file extension for downloaded image bytes: magic bytes first, then
/// the subtype of the declared content type, then `jpg`.
#[must_use]
pub fn image_extension(bytes: &[u8], content_type: &str) -> String {
    if let Some(kind) = infer::get(bytes).filter(|k| k.mime_type().starts_with("image/")) {
        return kind.extension().to_string();
    }
    content_type
        .split(';')
        .next()
        .and_then(|mime| mime.trim().strip_prefix("image/"))
        .map(|sub| sub.trim_end_matches("+xml"))
        .filter(|sub| !sub.is_empty())
        .map_or_else(|| "jpg".to_string(), ToString::to_string)
}

/// Replace characters that are not allowed in file names.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("failed to compile filename regex")
    });
    re.replace_all(filename, "_").into_owned()
}

/// Format a duration in seconds as `m:ss`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Build a caption from a title and optional duration, truncated to the
/// Telegram caption limit.
#[must_use]
pub fn build_caption(title: &str, duration: Option<f64>) -> String {
    let mut caption = match duration {
        Some(d) if d > 0.0 => format!("{title} ({})", format_duration(d)),
        _ => title.to_string(),
    };

    if caption.chars().count() > TELEGRAM_CAPTION_LIMIT {
        let truncated = caption
            .chars()
            .take(TELEGRAM_CAPTION_LIMIT.saturating_sub(3))
            .collect::<String>();
        caption = format!("{truncated}...");
    }
    caption
}
