//! [`MediaExtractor`] backed by the `yt-dlp` command line tool.

use crate::{
    config::YtDlpConfig,
    error::{Error, Result},
    extractor::{DownloadRequest, Downloaded, FormatSpec, MediaExtractor, MediaInfo},
    progress::{ProgressEvent, ProgressSender},
    utils::{AUDIO_EXTENSIONS, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS},
};
use futures::{StreamExt, stream};
use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
    sync::OnceLock,
};
use tokio::{
    fs::{self, read_dir},
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FORBIDDEN_EXTENSIONS: &[&str] = &["json", "txt", "log", "part", "ytdl"];
const INFO_JSON_SUFFIX: &str = ".info.json";
const FFMPEG_MISSING: &str = "ffmpeg not found, falling back to single-file download. Install ffmpeg to enable merged best video+audio.";

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    cookies_path: Option<PathBuf>,
    ffmpeg: bool,
}

impl YtDlp {
    #[must_use]
    pub fn new(config: &YtDlpConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            cookies_path: config.cookies_path.clone(),
            ffmpeg: ffmpeg_available(),
        }
    }

    #[cfg(test)]
    const fn with_ffmpeg(mut self, available: bool) -> Self {
        self.ffmpeg = available;
        self
    }

    fn cookie_args(&self) -> Vec<String> {
        self.cookies_path
            .as_ref()
            .map(|p| vec!["--cookies".to_string(), p.to_string_lossy().into_owned()])
            .unwrap_or_default()
    }

    fn download_args(&self, url: &str, format: &FormatSpec) -> Vec<String> {
        let mut args = [
            "--newline",
            "--no-playlist",
            "--no-warnings",
            "--restrict-filenames",
            "--write-info-json",
            "-o",
            "%(title)s.%(ext)s",
            "-f",
        ]
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
        args.push(format.selector.clone());

        if format.merge_mp4 {
            args.extend(["--merge-output-format".into(), "mp4".into()]);
        }
        if format.extract_mp3 {
            args.extend(
                ["-x", "--audio-format", "mp3", "--audio-quality", "192K"]
                    .iter()
                    .map(ToString::to_string),
            );
        }
        args.extend(self.cookie_args());
        args.push(url.to_string());
        args
    }
}

#[async_trait::async_trait]
impl MediaExtractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract_info(&self, url: &str) -> Result<MediaInfo> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".into(),
            "--no-warnings".into(),
        ];
        args.extend(self.cookie_args());
        args.push(url.to_string());

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::ytdlp_failed(stderr));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn download(
        &self,
        request: DownloadRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Downloaded> {
        let mut format = request.format.clone();
        if format.merge_mp4 && !self.ffmpeg {
            warn!("ffmpeg not found; using single-file format");
            progress.report(ProgressEvent::info(FFMPEG_MISSING)).await;
            format = format.single_file();
        }

        let args = self.download_args(&request.url, &format);
        info!(url = %request.url, format = %format.selector, "starting yt-dlp");

        let mut child = Command::new(&self.binary)
            .current_dir(&request.workdir)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        abort(&mut child).await;
                        return Err(Error::Cancelled);
                    }
                    line = lines.next_line() => line?,
                };
                let Some(line) = line else { break };
                debug!(line = %line, "yt-dlp");
                if let Some(event) = parse_progress_line(&line) {
                    progress.report(event).await;
                }
            }
        }

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                abort(&mut child).await;
                return Err(Error::Cancelled);
            }
            status = child.wait() => status?,
        };

        let stderr = match stderr_task {
            Some(task) => task.await?,
            None => String::new(),
        };

        if !status.success() {
            let stderr = stderr.trim();
            if stderr.is_empty() {
                return Err(Error::DownloadFailed(format!("yt-dlp exited with {status}")));
            }
            return Err(Error::ytdlp_failed(stderr));
        }

        collect_download(&request.workdir).await
    }
}

async fn abort(child: &mut Child) {
    info!("download cancelled; stopping yt-dlp");
    if let Err(err) = child.kill().await {
        warn!(%err, "failed to kill yt-dlp");
    }
}

/// Map one line of `yt-dlp --newline` output to a progress event.
///
/// ```text
/// [download]  45.2% of 10.00MiB at 500.00KiB/s ETA 00:10
/// [download] 100% of 10.00MiB in 00:00:05 at 2.00MiB/s
/// [Merger] Merging formats into "clip.mp4"
/// ```
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();

    if line.starts_with("[Merger]") {
        return Some(ProgressEvent::info("Merging video and audio..."));
    }
    if line.starts_with("[ExtractAudio] Destination") {
        return Some(ProgressEvent::info("Converting audio..."));
    }

    let rest = line.strip_prefix("[download]")?.trim_start();
    let (percent, tail) = rest.split_once('%')?;
    let percent = percent.trim().parse::<f64>().ok()?;
    let tokens = tail.split_whitespace().collect::<Vec<_>>();

    let after = |marker: &str| {
        tokens
            .iter()
            .position(|t| *t == marker)
            .and_then(|i| tokens.get(i + 1))
            .filter(|t| !t.starts_with("Unknown"))
            .map(|t| (*t).to_string())
    };

    if percent >= 100.0 && tokens.contains(&"in") {
        return Some(ProgressEvent::Finished);
    }

    Some(ProgressEvent::Downloading {
        percent,
        speed: after("at").unwrap_or_else(|| "N/A".into()),
        eta: after("ETA").unwrap_or_else(|| "N/A".into()),
    })
}

/// Pick the artifact out of a finished working directory: the largest media
/// file, with metadata from yt-dlp's `.info.json` when present.
///
/// # Errors
///
/// - `Error::Io` if the directory cannot be read.
/// - `Error::NoMediaFound` if no media file was produced.
pub async fn collect_download(dir: &Path) -> Result<Downloaded> {
    let mut rd = read_dir(dir).await?;
    let mut media = Vec::new();
    let mut info_json = None;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if is_info_json(&path) {
            info_json = Some(path);
        } else if is_potential_media_file(&path) {
            media.push(path);
        }
    }

    info!(files = media.len(), "collected files from workdir");

    let sized = stream::iter(media)
        .map(|path| async move {
            let len = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            (path, len)
        })
        .buffer_unordered(8)
        .collect::<Vec<_>>()
        .await;

    let Some((path, _)) = sized
        .into_iter()
        .filter(|(_, len)| *len > 0)
        .max_by(|(p1, l1), (p2, l2)| l1.cmp(l2).then_with(|| p2.cmp(p1)))
    else {
        warn!(dir = %dir.display(), "no media files found in workdir");
        return Err(Error::NoMediaFound);
    };

    let info = match info_json {
        Some(p) => read_info(&p).await,
        None => MediaInfo::default(),
    };

    Ok(Downloaded { path, info })
}

async fn read_info(path: &Path) -> MediaInfo {
    let parsed = fs::read(path)
        .await
        .map_err(Error::from)
        .and_then(|bytes| serde_json::from_slice::<MediaInfo>(&bytes).map_err(Error::from));
    parsed.unwrap_or_else(|err| {
        warn!(%err, path = %path.display(), "unreadable info json");
        MediaInfo::default()
    })
}

fn is_info_json(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.ends_with(INFO_JSON_SUFFIX))
}

/// Filter function to determine if a file is potentially media based on name/extension.
fn is_potential_media_file(path: &Path) -> bool {
    if let Some(filename) = path.file_name().and_then(OsStr::to_str) {
        if filename.starts_with('.') || filename.to_lowercase().contains("metadata") {
            return false;
        }
    }

    let Some(ext) = path.extension().and_then(OsStr::to_str) else {
        return false;
    };

    if FORBIDDEN_EXTENSIONS
        .iter()
        .any(|forbidden| forbidden.eq_ignore_ascii_case(ext))
    {
        return false;
    }

    VIDEO_EXTENSIONS
        .iter()
        .chain(AUDIO_EXTENSIONS)
        .chain(IMAGE_EXTENSIONS)
        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
}

/// Whether an `ffmpeg` executable is on `PATH`. Checked once per process.
fn ffmpeg_available() -> bool {
    static FFMPEG: OnceLock<bool> = OnceLock::new();
    *FFMPEG.get_or_init(|| {
        let Some(paths) = env::var_os("PATH") else {
            return false;
        };
        env::split_paths(&paths).any(|dir| {
            ["ffmpeg", "ffmpeg.exe"]
                .iter()
                .any(|name| dir.join(name).is_file())
        })
    })
}
