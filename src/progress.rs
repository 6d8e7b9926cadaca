//! Progress events, their rendering, and the throttle between a chatty
//! downloader and a rate-limited chat.
//!
//! The downloader pushes [`ProgressEvent`]s into a bounded channel through a
//! [`ProgressSender`]; [`forward_progress`] drains it on the UI side, asks the
//! [`ProgressThrottle`] which events deserve an edit and applies them to a
//! [`StatusSink`] in order.

use crate::sink::StatusSink;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(1500);
pub const BAR_CELLS: usize = 25;
pub const CHANNEL_CAPACITY: usize = 64;

/// Smallest percent change that is shown regardless of elapsed time.
const PERCENT_STEP: f64 = 1.0;
const FILLED: char = '▰';
const EMPTY: char = '▱';

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Downloading {
        percent: f64,
        speed: String,
        eta: String,
    },
    Finished,
    Info {
        message: String,
    },
}

impl ProgressEvent {
    pub fn downloading(percent: f64) -> Self {
        Self::Downloading {
            percent,
            speed: "N/A".into(),
            eta: "N/A".into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    /// Status text for this event.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Downloading {
                percent,
                speed,
                eta,
            } => {
                let p = percent.clamp(0.0, 100.0);
                format!(
                    "📥 Downloading: [{}] {p:5.1}% | ⚡ Speed: {speed} | ⏱️ ETA: {eta}",
                    render_bar(p)
                )
            }
            Self::Finished => "✅ Download finished, processing...".into(),
            Self::Info { message } => format!("ℹ️ {message}"),
        }
    }
}

/// A [`BAR_CELLS`]-wide bar filled in proportion to `percent` (clamped to 0..=100).
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn render_bar(percent: f64) -> String {
    let p = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };
    let filled = ((p / 100.0) * BAR_CELLS as f64) as usize;
    let filled = filled.min(BAR_CELLS);

    let mut bar = String::with_capacity(BAR_CELLS * FILLED.len_utf8());
    bar.extend(std::iter::repeat_n(FILLED, filled));
    bar.extend(std::iter::repeat_n(EMPTY, BAR_CELLS - filled));
    bar
}

/// Decides which progress events become UI updates.
///
/// A `Downloading` event passes if at least `interval` has elapsed since the
/// last emitted update or the percentage moved by at least one point.
/// `Finished` and `Info` always pass. The state starts as if a 0% update had
/// been shown at construction time, which is what the initial status message
/// displays.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Instant,
    last_percent: f64,
}

impl ProgressThrottle {
    #[must_use]
    pub const fn new(interval: Duration, started: Instant) -> Self {
        Self {
            interval,
            last_emit: started,
            last_percent: 0.0,
        }
    }

    /// Returns the text to show for `event`, or `None` if it is suppressed.
    pub fn on_event(&mut self, event: &ProgressEvent, now: Instant) -> Option<String> {
        match event {
            ProgressEvent::Downloading { percent, .. } => {
                let elapsed = now.saturating_duration_since(self.last_emit);
                let moved = (percent - self.last_percent).abs();
                if elapsed < self.interval && moved < PERCENT_STEP {
                    return None;
                }
                self.last_emit = now;
                self.last_percent = *percent;
            }
            ProgressEvent::Finished => {
                self.last_emit = now;
                self.last_percent = 100.0;
            }
            ProgressEvent::Info { .. } => {
                self.last_emit = now;
            }
        }
        Some(event.render())
    }
}

/// Producer half handed to a downloader.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Queue an event for the UI.
    ///
    /// `Downloading` events are dropped when the queue is full, since a later
    /// one supersedes them; `Finished` and `Info` wait for room.
    pub async fn report(&self, event: ProgressEvent) {
        if matches!(event, ProgressEvent::Downloading { .. }) {
            if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
                trace!(?event, "progress queue full; dropping update");
            }
            return;
        }
        if let Err(err) = self.tx.send(event).await {
            trace!(event = ?err.0, "progress receiver gone; dropping update");
        }
    }
}

/// Bounded channel between a downloader and [`forward_progress`].
#[must_use]
pub fn channel() -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (ProgressSender { tx }, rx)
}

/// Drain `rx` through `throttle` into `sink` until every sender is dropped or
/// `cancel` fires. Returns the number of edits attempted.
pub async fn forward_progress(
    mut rx: mpsc::Receiver<ProgressEvent>,
    mut throttle: ProgressThrottle,
    sink: Arc<dyn StatusSink>,
    cancel: CancellationToken,
) -> usize {
    let mut edits = 0;
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(text) = throttle.on_event(&event, Instant::now()) else {
            continue;
        };
        edits += 1;

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = sink.edit(&text) => {
                if let Err(err) = result {
                    debug!(%err, "progress edit failed");
                }
            }
        }
    }
    edits
}
