use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] tokio::io::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("rate limit exceeded ({limit} per minute)")]
    RateLimited { url: String, limit: usize },

    #[error("a download is already in progress")]
    Busy,

    #[error("content requires authentication")]
    RequiresAuth,

    #[error("file size ({size} bytes) exceeds limit ({limit} bytes)")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("requested format is not available: {0}")]
    FormatUnavailable(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("url does not point to an image (content type: {0})")]
    NotAnImage(String),

    #[error("no media found")]
    NoMediaFound,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("other: {0}")]
    Other(String),
}

const AUTH_MARKERS: &[&str] = &[
    "sign in to confirm",
    "cookies",
    "login required",
    "please sign in",
];

const FORMAT_MARKERS: &[&str] = &["requested format is not available", "unknown format code"];

impl Error {
    #[inline]
    pub fn other(text: impl Into<String>) -> Self {
        Self::Other(text.into())
    }

    /// Classify a failed yt-dlp run by its stderr.
    ///
    /// This is a substring heuristic over upstream wording and will need
    /// updating whenever yt-dlp rephrases these messages.
    #[must_use]
    pub fn ytdlp_failed(stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        let lower = stderr.to_lowercase();

        if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::RequiresAuth;
        }
        if FORMAT_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::FormatUnavailable(last_error_line(&stderr));
        }
        Self::DownloadFailed(last_error_line(&stderr))
    }

    /// Text shown to the user in the terminal status message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidUrl(_) => "Please send valid URLs.".into(),
            Self::RateLimited { url, limit } => format!(
                "Rate limit exceeded for {url}. You can send up to {limit} URLs per minute."
            ),
            Self::Busy => "You already have a download in progress. Please wait for it to complete."
                .into(),
            Self::RequiresAuth => "Error: This video requires authentication (age-restricted or bot-protected). Unable to download.".into(),
            Self::SizeExceeded { size, limit } => format!(
                "Error: File size ({:.1} MB) exceeds limit ({:.1} MB)",
                mib(*size),
                mib(*limit)
            ),
            Self::FormatUnavailable(_) | Self::DownloadFailed(_) | Self::NoMediaFound => {
                format!("Error: {self}")
            }
            Self::Cancelled => "Download cancelled.".into(),
            Self::NotAnImage(_) => "Error: URL does not point to an image".into(),
            Self::Io(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Teloxide(_)
            | Self::Join(_)
            | Self::Other(_) => "An unexpected error occurred.".into(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Pick the most telling line of a yt-dlp stderr dump.
fn last_error_line(stderr: &str) -> String {
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error"))
        .or_else(|| stderr.lines().map(str::trim).rfind(|l| !l.is_empty()))
        .unwrap_or_default();

    line.strip_prefix("ERROR:")
        .unwrap_or(line)
        .trim()
        .to_string()
}

pub type Result<T> = std::result::Result<T, Error>;
