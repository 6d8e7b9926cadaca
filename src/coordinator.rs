//! Single-flight download operations.
//!
//! Every user owns at most one live [`OperationHandle`]. The lifecycle is
//! `begin` → `run` → `end`, with `cancel` allowed at any point in between.
//! `end` runs exactly once per handle no matter how the operation finished;
//! [`Coordinator::execute`] drives the whole sequence for the bot.

use crate::{
    config::Config,
    error::{Error, Result},
    extractor::{DownloadRequest, FormatSpec, MediaExtractor, MediaInfo},
    history::HistoryEntry,
    image::{ImageInfo, ImageSource, image_file_name},
    progress::{self, ProgressThrottle, forward_progress},
    session::{ActiveSlot, SessionRegistry, UserKey},
    sink::{FileSender, StatusSink},
    utils::{MediaKind, build_caption, media_kind_from_path},
};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WORKDIR_PREFIX: &str = "tg-fetch-";

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub max_file_size: u64,
    pub throttle_interval: Duration,
    /// Parent of the per-operation working directories.
    pub temp_dir: PathBuf,
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_file_size: config.max_file_size,
            throttle_interval: config.throttle_interval,
            temp_dir: config.temp_dir.clone(),
        }
    }
}

/// A finished file, owned by the operation that produced it.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
    pub title: Option<String>,
    pub duration: Option<f64>,
}

impl Artifact {
    #[must_use]
    pub fn caption(&self) -> Option<String> {
        match self.kind {
            MediaKind::Image => self.title.as_deref().map(|t| build_caption(t, None)),
            MediaKind::Video | MediaKind::Audio => Some(build_caption(
                self.title.as_deref().unwrap_or("Downloaded video"),
                self.duration,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug)]
struct Operation {
    id: u64,
    user: UserKey,
    url: String,
    kind: MediaKind,
    quality: String,
    cancel: CancellationToken,
    workdir: Mutex<Option<TempDir>>,
    ended: AtomicBool,
}

/// Shared handle to one live operation.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    inner: Arc<Operation>,
}

impl OperationHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn user(&self) -> UserKey {
        self.inner.user
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    #[must_use]
    pub fn quality(&self) -> &str {
        &self.inner.quality
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    #[cfg(test)]
    fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    fn set_workdir(&self, dir: TempDir) {
        let mut slot = self
            .inner
            .workdir
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(dir);
    }

    fn take_workdir(&self) -> Option<TempDir> {
        self.inner
            .workdir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub struct Coordinator {
    sessions: SessionRegistry,
    extractor: Arc<dyn MediaExtractor>,
    images: Arc<dyn ImageSource>,
    settings: CoordinatorSettings,
    next_id: AtomicU64,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        sessions: SessionRegistry,
        extractor: Arc<dyn MediaExtractor>,
        images: Arc<dyn ImageSource>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            sessions,
            extractor,
            images,
            settings,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Register a new operation for `user`.
    ///
    /// The check and the registration happen under the user's session lock,
    /// so concurrent calls for one user cannot both succeed. An existing
    /// operation is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if `user` already has a live operation.
    pub fn begin(
        &self,
        user: UserKey,
        url: impl Into<String>,
        kind: MediaKind,
        quality: impl Into<String>,
    ) -> Result<OperationHandle> {
        let url = url.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        self.sessions.with_session(user, |session| {
            if session.active.is_some() {
                return Err(Error::Busy);
            }
            session.active = Some(ActiveSlot {
                op_id: id,
                url: url.clone(),
                kind,
                cancel: cancel.clone(),
            });
            Ok(())
        })?;

        info!(op = id, user = %user, url = %url, kind = %kind, "operation started");
        Ok(OperationHandle {
            inner: Arc::new(Operation {
                id,
                user,
                url,
                kind,
                quality: quality.into(),
                cancel,
                workdir: Mutex::new(None),
                ended: AtomicBool::new(false),
            }),
        })
    }

    /// Produce the artifact for `handle`, reporting progress to `status`.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` if the operation was cancelled.
    /// - `Error::SizeExceeded` if the file is larger than the configured
    ///   maximum. The file is deleted first.
    /// - `Error::RequiresAuth` when the source needs authentication.
    /// - `Error::DownloadFailed` for other extractor failures, including a
    ///   format that stays unavailable after one relaxed retry.
    /// - `Error::NotAnImage`/`Error::Http` from the image path.
    pub async fn run(
        &self,
        handle: &OperationHandle,
        status: Arc<dyn StatusSink>,
    ) -> Result<Artifact> {
        if handle.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let workdir = self.prepare_workdir(handle).await?;
        let artifact = match handle.kind() {
            MediaKind::Image => self.fetch_image(handle, &workdir).await?,
            MediaKind::Video | MediaKind::Audio => {
                self.download_media(handle, &workdir, status).await?
            }
        };

        if handle.is_cancelled() {
            remove_artifact(&artifact.path).await;
            return Err(Error::Cancelled);
        }

        if artifact.size > self.settings.max_file_size {
            warn!(
                op = handle.id(),
                size = artifact.size,
                limit = self.settings.max_file_size,
                "artifact too large"
            );
            remove_artifact(&artifact.path).await;
            return Err(Error::SizeExceeded {
                size: artifact.size,
                limit: self.settings.max_file_size,
            });
        }

        info!(op = handle.id(), path = %artifact.path.display(), size = artifact.size, "artifact ready");
        Ok(artifact)
    }

    /// Cancel `user`'s live operation, if any.
    ///
    /// The slot is freed immediately so the user can start something else;
    /// the operation itself stops at its next checkpoint.
    pub fn cancel(&self, user: UserKey) -> bool {
        let Some(slot) = self.sessions.with_session(user, |s| s.active.take()) else {
            return false;
        };
        slot.cancel.cancel();
        info!(op = slot.op_id, user = %user, "operation cancelled");
        true
    }

    /// Release everything `handle` holds. Only the first call has an effect.
    ///
    /// The session slot is cleared only if it still belongs to `handle`, and
    /// a history entry is recorded only for a completed, uncancelled run.
    pub fn end(&self, handle: &OperationHandle, outcome: Outcome) {
        if handle.inner.ended.swap(true, Ordering::AcqRel) {
            debug!(op = handle.id(), "operation already ended");
            return;
        }

        let record = outcome == Outcome::Completed && !handle.is_cancelled();
        self.sessions.with_session(handle.user(), |session| {
            if session
                .active
                .as_ref()
                .is_some_and(|slot| slot.op_id == handle.id())
            {
                session.active = None;
            }
            if record {
                session
                    .history
                    .record(HistoryEntry::new(handle.url(), handle.kind()));
            }
        });

        if let Some(dir) = handle.take_workdir() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(%err, path = %path.display(), "failed to remove workdir");
            }
        }

        info!(op = handle.id(), ?outcome, "operation ended");
    }

    /// Run `handle` to completion: produce the artifact, send it, write the
    /// terminal status and end the operation.
    ///
    /// A cancelled operation leaves the status alone; whoever cancelled it
    /// reports that.
    pub async fn execute(
        &self,
        handle: OperationHandle,
        status: Arc<dyn StatusSink>,
        sender: &dyn FileSender,
    ) -> Outcome {
        let outcome = match self.run(&handle, Arc::clone(&status)).await {
            Ok(artifact) => self.deliver(&handle, &artifact, status.as_ref(), sender).await,
            Err(Error::Cancelled) => Outcome::Cancelled,
            Err(err) => {
                warn!(op = handle.id(), %err, "operation failed");
                finish(status.as_ref(), &err.user_message()).await;
                Outcome::Failed
            }
        };
        self.end(&handle, outcome);
        outcome
    }

    /// Inspect a media URL without downloading it.
    ///
    /// # Errors
    ///
    /// Propagates the extractor's classified error.
    pub async fn analyze(&self, url: &str) -> Result<MediaInfo> {
        debug!(url, extractor = self.extractor.name(), "analyzing");
        self.extractor.extract_info(url).await
    }

    pub async fn head_image(&self, url: &str) -> ImageInfo {
        self.images.head_info(url).await
    }

    #[must_use]
    pub fn recent(&self, user: UserKey, n: usize) -> Vec<HistoryEntry> {
        self.sessions.recent(user, n)
    }

    #[must_use]
    pub fn is_busy(&self, user: UserKey) -> bool {
        self.sessions.is_busy(user)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.active_count()
    }

    async fn deliver(
        &self,
        handle: &OperationHandle,
        artifact: &Artifact,
        status: &dyn StatusSink,
        sender: &dyn FileSender,
    ) -> Outcome {
        let cancel = handle.cancel_token();
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Cancelled,
            sent = sender.send_file(artifact) => sent,
        };
        // a cancel that lands as the upload completes already wrote its own status
        if handle.is_cancelled() {
            return Outcome::Cancelled;
        }
        match sent {
            Ok(()) => {
                let text = match artifact.kind {
                    MediaKind::Image => "Image downloaded!",
                    MediaKind::Video | MediaKind::Audio => "Download complete! File sent above.",
                };
                finish(status, text).await;
                Outcome::Completed
            }
            Err(err) => {
                warn!(op = handle.id(), %err, "failed to send artifact");
                finish(status, &err.user_message()).await;
                Outcome::Failed
            }
        }
    }

    async fn prepare_workdir(&self, handle: &OperationHandle) -> Result<PathBuf> {
        fs::create_dir_all(&self.settings.temp_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(&self.settings.temp_dir)?;
        let path = dir.path().to_path_buf();
        handle.set_workdir(dir);
        Ok(path)
    }

    async fn fetch_image(&self, handle: &OperationHandle, workdir: &Path) -> Result<Artifact> {
        let cancel = handle.cancel_token();
        let image = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            image = self.images.fetch(handle.url(), self.settings.max_file_size) => image?,
        };

        let path = workdir.join(image_file_name(handle.url(), &image));
        fs::write(&path, &image.bytes).await?;

        Ok(Artifact {
            path,
            kind: MediaKind::Image,
            size: image.bytes.len() as u64,
            title: None,
            duration: None,
        })
    }

    async fn download_media(
        &self,
        handle: &OperationHandle,
        workdir: &Path,
        status: Arc<dyn StatusSink>,
    ) -> Result<Artifact> {
        let format = FormatSpec::preferred(handle.kind(), handle.quality());
        match self
            .download_with_progress(handle, &format, workdir, Arc::clone(&status))
            .await
        {
            Err(Error::FormatUnavailable(reason)) => {
                let relaxed = format.relaxed();
                warn!(
                    op = handle.id(),
                    %reason,
                    retry = %relaxed.selector,
                    "format unavailable; retrying once"
                );
                self.download_with_progress(handle, &relaxed, workdir, status)
                    .await
                    .map_err(|err| match err {
                        Error::Cancelled => Error::Cancelled,
                        Error::FormatUnavailable(msg) | Error::DownloadFailed(msg) => {
                            Error::DownloadFailed(msg)
                        }
                        other => Error::DownloadFailed(other.to_string()),
                    })
            }
            result => result,
        }
    }

    async fn download_with_progress(
        &self,
        handle: &OperationHandle,
        format: &FormatSpec,
        workdir: &Path,
        status: Arc<dyn StatusSink>,
    ) -> Result<Artifact> {
        let (tx, rx) = progress::channel();
        let throttle = ProgressThrottle::new(self.settings.throttle_interval, Instant::now());
        let pump = tokio::spawn(forward_progress(rx, throttle, status, handle.cancel_token()));

        let request = DownloadRequest {
            url: handle.url().to_string(),
            format: format.clone(),
            workdir: workdir.to_path_buf(),
        };
        let result = self
            .extractor
            .download(request, tx, handle.cancel_token())
            .await;

        // The sender is gone once the extractor returns, so the pump drains
        // what is queued and stops.
        match pump.await {
            Ok(edits) => debug!(op = handle.id(), edits, "progress forwarding done"),
            Err(err) => warn!(op = handle.id(), %err, "progress forwarding failed"),
        }

        let downloaded = result?;
        let size = fs::metadata(&downloaded.path).await?.len();
        let kind = media_kind_from_path(&downloaded.path).unwrap_or_else(|| handle.kind());

        Ok(Artifact {
            path: downloaded.path,
            kind,
            size,
            title: downloaded.info.title,
            duration: downloaded.info.duration,
        })
    }
}

async fn finish(status: &dyn StatusSink, text: &str) {
    if let Err(err) = status.finish(text).await {
        debug!(%err, "failed to write final status");
    }
}

async fn remove_artifact(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        warn!(%err, path = %path.display(), "failed to remove artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extractor::Downloaded,
        image::FetchedImage,
        progress::{ProgressEvent, ProgressSender},
    };
    use std::sync::{Barrier, atomic::AtomicUsize};
    use tokio::sync::Notify;

    const USER: UserKey = UserKey(42);

    enum Behavior {
        Succeed { events: Vec<ProgressEvent>, size: usize },
        FormatUnavailable { then_ok: bool },
        RequiresAuth,
        WaitForCancel,
    }

    struct FakeExtractor {
        behavior: Behavior,
        calls: AtomicUsize,
        selectors: Mutex<Vec<String>>,
        last_path: Mutex<Option<PathBuf>>,
        started: Notify,
    }

    impl FakeExtractor {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                selectors: Mutex::new(Vec::new()),
                last_path: Mutex::new(None),
                started: Notify::new(),
            })
        }

        async fn write_file(&self, workdir: &Path, size: usize) -> Result<Downloaded> {
            let path = workdir.join("clip.mp4");
            fs::write(&path, vec![0u8; size]).await?;
            *self.last_path.lock().unwrap() = Some(path.clone());
            Ok(Downloaded {
                path,
                info: MediaInfo {
                    title: Some("Clip".into()),
                    duration: Some(65.0),
                    formats: Vec::new(),
                },
            })
        }
    }

    #[async_trait::async_trait]
    impl MediaExtractor for FakeExtractor {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn extract_info(&self, _url: &str) -> Result<MediaInfo> {
            Ok(MediaInfo::default())
        }

        async fn download(
            &self,
            request: DownloadRequest,
            progress: ProgressSender,
            cancel: CancellationToken,
        ) -> Result<Downloaded> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.selectors
                .lock()
                .unwrap()
                .push(request.format.selector.clone());
            self.started.notify_one();

            match &self.behavior {
                Behavior::Succeed { events, size } => {
                    for event in events {
                        progress.report(event.clone()).await;
                    }
                    self.write_file(&request.workdir, *size).await
                }
                Behavior::FormatUnavailable { then_ok } => {
                    if call == 0 || !then_ok {
                        return Err(Error::FormatUnavailable("no such format".into()));
                    }
                    self.write_file(&request.workdir, 16).await
                }
                Behavior::RequiresAuth => Err(Error::RequiresAuth),
                Behavior::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(Error::Cancelled)
                }
            }
        }
    }

    struct FakeImages;

    #[async_trait::async_trait]
    impl ImageSource for FakeImages {
        async fn head_info(&self, _url: &str) -> ImageInfo {
            ImageInfo {
                content_type: Some("image/png".into()),
                size: Some(4),
            }
        }

        async fn fetch(&self, _url: &str, max_size: u64) -> Result<FetchedImage> {
            if max_size < 4 {
                return Err(Error::SizeExceeded {
                    size: 4,
                    limit: max_size,
                });
            }
            Ok(FetchedImage {
                bytes: vec![1, 2, 3, 4],
                content_type: "image/png".into(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        edits: Mutex<Vec<String>>,
        finished: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl StatusSink for Recorder {
        async fn edit(&self, text: &str) -> Result<()> {
            self.edits.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn finish(&self, text: &str) -> Result<()> {
            self.finished.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSender {
        sent: Mutex<Vec<PathBuf>>,
    }

    #[async_trait::async_trait]
    impl FileSender for FakeSender {
        async fn send_file(&self, artifact: &Artifact) -> Result<()> {
            assert!(artifact.path.exists());
            self.sent.lock().unwrap().push(artifact.path.clone());
            Ok(())
        }
    }

    /// Holds the upload open until released.
    #[derive(Default)]
    struct StalledSender {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl FileSender for StalledSender {
        async fn send_file(&self, _artifact: &Artifact) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn coordinator(extractor: Arc<FakeExtractor>, root: &Path, max_file_size: u64) -> Coordinator {
        Coordinator::new(
            SessionRegistry::new(),
            extractor,
            Arc::new(FakeImages),
            CoordinatorSettings {
                max_file_size,
                throttle_interval: Duration::from_millis(1500),
                temp_dir: root.to_path_buf(),
            },
        )
    }

    fn succeed(size: usize) -> Behavior {
        Behavior::Succeed {
            events: vec![
                ProgressEvent::downloading(10.0),
                ProgressEvent::downloading(55.0),
                ProgressEvent::Finished,
            ],
            size,
        }
    }

    #[test]
    fn concurrent_begin_is_single_flight() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(1)), root.path(), 100);
        let barrier = Barrier::new(16);

        let wins = std::thread::scope(|scope| {
            let workers = (0..16)
                .map(|i| {
                    let coord = &coord;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        coord.begin(USER, format!("https://example.com/{i}"), MediaKind::Video, "best")
                    })
                })
                .collect::<Vec<_>>();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(Result::is_ok)
                .count()
        });

        assert_eq!(wins, 1);
        assert_eq!(coord.active_count(), 1);
    }

    #[test]
    fn begin_while_busy_keeps_existing_operation() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(1)), root.path(), 100);
        let first = coord.begin(USER, "https://a.com", MediaKind::Video, "best").unwrap();
        assert!(matches!(
            coord.begin(USER, "https://b.com", MediaKind::Audio, "mp3"),
            Err(Error::Busy)
        ));
        assert!(!first.is_cancelled());
        assert!(coord.begin(UserKey(7), "https://b.com", MediaKind::Audio, "mp3").is_ok());
    }

    #[test]
    fn end_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(1)), root.path(), 100);
        let handle = coord.begin(USER, "https://a.com", MediaKind::Video, "best").unwrap();

        coord.end(&handle, Outcome::Completed);
        coord.end(&handle, Outcome::Completed);

        assert!(handle.is_ended());
        assert!(!coord.is_busy(USER));
        assert_eq!(coord.recent(USER, 10).len(), 1);
    }

    #[test]
    fn failures_are_not_recorded() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(1)), root.path(), 100);
        let handle = coord.begin(USER, "https://a.com", MediaKind::Video, "best").unwrap();
        coord.end(&handle, Outcome::Failed);
        assert!(coord.recent(USER, 10).is_empty());
        assert!(!coord.is_busy(USER));
    }

    #[tokio::test]
    async fn download_scenario_records_history() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(32)), root.path(), 100);
        let status = Arc::new(Recorder::default());

        let handle = coord
            .begin(USER, "https://example.com/video", MediaKind::Video, "best")
            .unwrap();
        let artifact = coord.run(&handle, status.clone()).await.unwrap();
        assert_eq!(artifact.size, 32);
        assert_eq!(artifact.kind, MediaKind::Video);
        assert_eq!(artifact.caption().as_deref(), Some("Clip (1:05)"));

        let edits = status.edits.lock().unwrap().clone();
        let bars = edits.iter().filter(|e| e.contains("Downloading")).count();
        assert_eq!(bars, 2);
        assert_eq!(edits.last(), Some(&ProgressEvent::Finished.render()));

        coord.end(&handle, Outcome::Completed);
        let history = coord.recent(USER, 5);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].url, "https://example.com/video");
        assert!(!artifact.path.exists());
    }

    #[tokio::test]
    async fn oversized_artifact_is_deleted() {
        let root = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(succeed(200));
        let coord = coordinator(extractor.clone(), root.path(), 100);
        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Video, "best").unwrap();

        let err = coord
            .run(&handle, Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SizeExceeded { size: 200, limit: 100 }));

        let path = extractor.last_path.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
        coord.end(&handle, Outcome::Failed);
        assert!(coord.recent(USER, 5).is_empty());
    }

    #[tokio::test]
    async fn format_unavailable_retries_once_with_relaxed_format() {
        let root = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(Behavior::FormatUnavailable { then_ok: true });
        let coord = coordinator(extractor.clone(), root.path(), 100);
        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Video, "720p").unwrap();

        assert!(coord.run(&handle, Arc::new(Recorder::default())).await.is_ok());
        let selectors = extractor.selectors.lock().unwrap().clone();
        assert_eq!(selectors.len(), 2);
        assert_eq!(selectors[1], "best");
    }

    #[tokio::test]
    async fn format_unavailable_twice_is_download_failed() {
        let root = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(Behavior::FormatUnavailable { then_ok: false });
        let coord = coordinator(extractor.clone(), root.path(), 100);
        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Audio, "mp3").unwrap();

        let err = coord
            .run(&handle, Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailed(_)));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn requires_auth_is_not_retried() {
        let root = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(Behavior::RequiresAuth);
        let coord = coordinator(extractor.clone(), root.path(), 100);
        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Video, "best").unwrap();

        let err = coord
            .run(&handle, Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequiresAuth));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_frees_the_slot_immediately() {
        let root = tempfile::tempdir().unwrap();
        let extractor = FakeExtractor::new(Behavior::WaitForCancel);
        let coord = Arc::new(coordinator(extractor.clone(), root.path(), 100));

        let first = coord.begin(USER, "https://a.com/v", MediaKind::Video, "best").unwrap();
        let task = tokio::spawn({
            let coord = Arc::clone(&coord);
            let first = first.clone();
            async move { coord.run(&first, Arc::new(Recorder::default())).await }
        });
        extractor.started.notified().await;

        assert!(coord.cancel(USER));
        assert!(!coord.is_busy(USER));
        assert!(!coord.cancel(USER));

        let second = coord.begin(USER, "https://b.com/v", MediaKind::Video, "best").unwrap();

        assert!(matches!(task.await.unwrap(), Err(Error::Cancelled)));
        coord.end(&first, Outcome::Cancelled);
        assert!(coord.is_busy(USER), "ending the first operation freed the second");

        coord.end(&second, Outcome::Completed);
        assert!(!coord.is_busy(USER));
        assert_eq!(coord.recent(USER, 5).len(), 1);
    }

    #[test]
    fn cancelled_completion_is_not_recorded() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(1)), root.path(), 100);
        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Video, "best").unwrap();
        assert!(coord.cancel(USER));
        coord.end(&handle, Outcome::Completed);
        assert!(coord.recent(USER, 5).is_empty());
    }

    #[tokio::test]
    async fn execute_sends_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(8)), root.path(), 100);
        let status = Arc::new(Recorder::default());
        let sender = FakeSender::default();

        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Video, "best").unwrap();
        let outcome = coord.execute(handle.clone(), status.clone(), &sender).await;

        assert_eq!(outcome, Outcome::Completed);
        assert!(handle.is_ended());
        assert_eq!(
            status.finished.lock().unwrap().as_slice(),
            ["Download complete! File sent above.".to_string()]
        );
        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].exists());
        assert_eq!(coord.recent(USER, 5).len(), 1);
    }

    #[tokio::test]
    async fn execute_reports_failure() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(Behavior::RequiresAuth), root.path(), 100);
        let status = Arc::new(Recorder::default());

        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Video, "best").unwrap();
        let outcome = coord
            .execute(handle, status.clone(), &FakeSender::default())
            .await;

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(
            status.finished.lock().unwrap().as_slice(),
            [Error::RequiresAuth.user_message()]
        );
        assert!(!coord.is_busy(USER));
        assert!(coord.recent(USER, 5).is_empty());
    }

    #[tokio::test]
    async fn image_path_writes_named_file() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(1)), root.path(), 100);
        let handle = coord
            .begin(USER, "https://example.com/pics/cat.png", MediaKind::Image, "best")
            .unwrap();

        let artifact = coord.run(&handle, Arc::new(Recorder::default())).await.unwrap();
        assert_eq!(artifact.kind, MediaKind::Image);
        assert_eq!(artifact.size, 4);
        assert!(artifact.path.ends_with("cat.png"));
        assert_eq!(artifact.caption(), None);

        coord.end(&handle, Outcome::Completed);
        assert!(!artifact.path.exists());
        assert_eq!(coord.recent(USER, 5)[0].kind, MediaKind::Image);
    }

    #[tokio::test]
    async fn cancel_during_upload_leaves_one_terminal_status() {
        let root = tempfile::tempdir().unwrap();
        let coord = Arc::new(coordinator(FakeExtractor::new(succeed(8)), root.path(), 100));
        let status = Arc::new(Recorder::default());
        let sender = Arc::new(StalledSender::default());

        let handle = coord.begin(USER, "https://a.com/v", MediaKind::Video, "best").unwrap();
        let task = tokio::spawn({
            let coord = Arc::clone(&coord);
            let status = Arc::clone(&status);
            let sender = Arc::clone(&sender);
            async move { coord.execute(handle, status, sender.as_ref()).await }
        });

        sender.entered.notified().await;
        assert!(coord.cancel(USER));
        sender.release.notify_one();

        assert_eq!(task.await.unwrap(), Outcome::Cancelled);
        assert!(status.finished.lock().unwrap().is_empty());
        assert!(coord.recent(USER, 5).is_empty());
    }

    #[tokio::test]
    async fn oversized_image_is_never_written() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(1)), root.path(), 2);
        let handle = coord
            .begin(USER, "https://example.com/pics/cat.png", MediaKind::Image, "best")
            .unwrap();

        let err = coord
            .run(&handle, Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SizeExceeded { size: 4, limit: 2 }));
        coord.end(&handle, Outcome::Failed);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn awaited_downloads_of_one_user_run_back_to_back() {
        let root = tempfile::tempdir().unwrap();
        let coord = coordinator(FakeExtractor::new(succeed(8)), root.path(), 100);
        let sender = FakeSender::default();

        for url in ["https://example.com/one.png", "https://example.com/two.png"] {
            let handle = coord.begin(USER, url, MediaKind::Image, "best").unwrap();
            let outcome = coord
                .execute(handle, Arc::new(Recorder::default()), &sender)
                .await;
            assert_eq!(outcome, Outcome::Completed);
            assert!(!coord.is_busy(USER));
        }

        assert_eq!(sender.sent.lock().unwrap().len(), 2);
        let urls = coord
            .recent(USER, 5)
            .into_iter()
            .map(|entry| entry.url)
            .collect::<Vec<_>>();
        assert_eq!(urls.len(), 2);
        assert!(urls.contains(&"https://example.com/two.png".to_string()));
    }
}
