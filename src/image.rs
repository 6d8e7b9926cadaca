use crate::{
    error::{Error, Result},
    utils::{image_extension, sanitize_filename},
};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What a `HEAD` request revealed about an image URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

impl ImageInfo {
    fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        Self { content_type, size }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn describe(&self) -> String {
        let size = self.size.map_or_else(
            || "Unknown".to_string(),
            |s| format!("{:.2} MB", s as f64 / (1024.0 * 1024.0)),
        );
        format!(
            "Image info:\nType: {}\nSize: {size}",
            self.content_type.as_deref().unwrap_or("Unknown")
        )
    }
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Fetches images over HTTP for the image path of the coordinator.
#[async_trait::async_trait]
pub trait ImageSource: Send + Sync {
    /// Best-effort metadata lookup. Never fails; unknown fields stay `None`.
    async fn head_info(&self, url: &str) -> ImageInfo;

    /// Download the image body, giving up once it is known to exceed
    /// `max_size` bytes.
    ///
    /// # Errors
    ///
    /// - `Error::Http` on transport errors or non-success status.
    /// - `Error::NotAnImage` if the response is not `image/*`.
    /// - `Error::SizeExceeded` if the declared or received size is over `max_size`.
    async fn fetch(&self, url: &str, max_size: u64) -> Result<FetchedImage>;
}

#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ImageSource for HttpImageSource {
    async fn head_info(&self, url: &str) -> ImageInfo {
        match self.client.head(url).timeout(HEAD_TIMEOUT).send().await {
            Ok(resp) => ImageInfo::from_headers(resp.headers()),
            Err(err) => {
                debug!(%err, url, "image HEAD failed");
                ImageInfo::default()
            }
        }
    }

    async fn fetch(&self, url: &str, max_size: u64) -> Result<FetchedImage> {
        let mut resp = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            warn!(url, %content_type, "refusing non-image response");
            return Err(Error::NotAnImage(content_type));
        }

        if let Some(declared) = resp.content_length() {
            within_limit(declared, max_size)?;
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            bytes.extend_from_slice(&chunk);
            within_limit(bytes.len() as u64, max_size)?;
        }
        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}

const fn within_limit(size: u64, limit: u64) -> Result<()> {
    if size > limit {
        return Err(Error::SizeExceeded { size, limit });
    }
    Ok(())
}

/// File name for a fetched image: the last path segment of `url` when it has
/// one, otherwise `image.<ext>`.
#[must_use]
pub fn image_file_name(url: &str, image: &FetchedImage) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(ToString::to_string))
        })
        .filter(|name| !name.is_empty())
        .map(|name| sanitize_filename(&name))
        .unwrap_or_else(|| {
            format!(
                "image.{}",
                image_extension(&image.bytes, &image.content_type)
            )
        })
}
