use crate::error::{Error, Result};
use std::{env, fmt::Debug, path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub max_file_size: u64,
    pub rate_limit: usize,
    pub port: u16,
    pub temp_dir: PathBuf,
    pub throttle_interval: Duration,
    pub ytdlp: YtDlpConfig,
}

#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub binary: String,
    pub cookies_path: Option<PathBuf>,
}

impl Config {
    pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
    pub const DEFAULT_RATE_LIMIT: usize = 5;
    pub const DEFAULT_PORT: u16 = 8000;
    pub const DEFAULT_THROTTLE_MS: u64 = 1500;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if no bot token is set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns error if neither `BOT_TOKEN` nor `TELOXIDE_TOKEN` is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("BOT_TOKEN")
            .or_else(|| lookup("TELOXIDE_TOKEN"))
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::other("BOT_TOKEN is not set"))?;

        let throttle_ms = parse_or(&lookup, "PROGRESS_THROTTLE_MS", Self::DEFAULT_THROTTLE_MS);

        Ok(Self {
            bot_token,
            max_file_size: parse_or(&lookup, "MAX_FILE_SIZE", Self::DEFAULT_MAX_FILE_SIZE),
            rate_limit: parse_or(&lookup, "RATE_LIMIT", Self::DEFAULT_RATE_LIMIT),
            port: parse_or(&lookup, "PORT", Self::DEFAULT_PORT),
            temp_dir: lookup("TEMP_DIR").map_or_else(env::temp_dir, PathBuf::from),
            throttle_interval: Duration::from_millis(throttle_ms),
            ytdlp: YtDlpConfig::from_lookup(&lookup),
        })
    }
}

impl YtDlpConfig {
    const DEFAULT_BINARY: &'static str = "yt-dlp";

    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            binary: lookup("YTDLP_BIN").unwrap_or_else(|| Self::DEFAULT_BINARY.to_string()),
            cookies_path: lookup("YTDLP_COOKIES_PATH")
                .map(PathBuf::from)
                .filter(|p| p.is_file()),
        }
    }
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: Self::DEFAULT_BINARY.into(),
            cookies_path: None,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        warn!(key, value = %raw, ?default, "invalid config value; using default");
        default
    })
}
