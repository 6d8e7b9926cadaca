//! URL classification for inbound text.
//!
//! Everything here is purely syntactic: no request is made to decide whether a
//! link is usable or whether it names an image.

use crate::utils::IMAGE_EXTENSIONS;
use url::Url;

/// Upper bound on URLs processed from a single message.
pub const MAX_URLS_PER_MESSAGE: usize = 5;

/// Hosts that skip format analysis and download the best video directly.
static AUTO_DOWNLOAD_HOSTS: &[&str] = &["pinterest", "pin.it"];

/// `true` iff `s` is an absolute `http`/`https` URL with a non-empty host.
#[must_use]
pub fn is_fetchable_url(s: &str) -> bool {
    Url::parse(s).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
    })
}

/// `true` iff the URL path ends in one of [`IMAGE_EXTENSIONS`].
///
/// This is an extension heuristic, not a content-type check. Extensionless
/// image URLs are classified as non-images and go down the extractor path.
#[must_use]
pub fn is_image_url(s: &str) -> bool {
    let Ok(url) = Url::parse(s) else {
        return false;
    };
    let path = url.path().to_lowercase();
    path.rsplit_once('.').is_some_and(|(_, ext)| {
        !ext.contains('/') && IMAGE_EXTENSIONS.iter().any(|allowed| *allowed == ext)
    })
}

/// `true` for hosts whose links are downloaded without asking for a type.
#[must_use]
pub fn is_auto_download_url(s: &str) -> bool {
    Url::parse(s)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
        .is_some_and(|host| AUTO_DOWNLOAD_HOSTS.iter().any(|h| host.contains(h)))
}

/// Split a message into its fetchable URLs, keeping at most
/// [`MAX_URLS_PER_MESSAGE`] in order of appearance.
#[must_use]
pub fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|candidate| is_fetchable_url(candidate))
        .take(MAX_URLS_PER_MESSAGE)
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetchable() {
        assert!(is_fetchable_url("https://example.com/video"));
        assert!(is_fetchable_url("http://example.com"));
        assert!(!is_fetchable_url("ftp://example.com/file"));
        assert!(!is_fetchable_url("example.com/video"));
        assert!(!is_fetchable_url("mailto:someone@example.com"));
        assert!(!is_fetchable_url("not a url"));
        assert!(!is_fetchable_url(""));
    }

    #[test]
    fn image_by_extension() {
        assert!(is_image_url("https://example.com/cat.JPG"));
        assert!(is_image_url("https://example.com/a/b/pic.webp?size=large"));
        assert!(is_image_url("https://example.com/logo.svg"));
        assert!(!is_image_url("https://example.com/video"));
        assert!(!is_image_url("https://example.com/clip.mp4"));
        assert!(!is_image_url("https://example.com/dir.png/page"));
        // no extension, even though it may well be an image
        assert!(!is_image_url("https://images.example.com/abc123"));
    }

    #[test]
    fn auto_download() {
        assert!(is_auto_download_url("https://www.pinterest.com/pin/123/"));
        assert!(is_auto_download_url("https://pin.it/abc"));
        assert!(!is_auto_download_url("https://youtube.com/watch?v=1"));
    }

    #[test]
    fn extract_urls_caps_and_filters() {
        let text = "look https://a.com/1 junk\nhttps://b.com/2 ftp://c.com \
                    https://c.com/3 https://d.com/4 https://e.com/5 https://f.com/6";
        let urls = extract_urls(text);
        assert_eq!(
            urls,
            vec![
                "https://a.com/1",
                "https://b.com/2",
                "https://c.com/3",
                "https://d.com/4",
                "https://e.com/5",
            ]
        );
        assert!(extract_urls("nothing to see here").is_empty());
    }
}
