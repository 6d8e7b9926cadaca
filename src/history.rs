use crate::utils::MediaKind;
use std::{
    collections::VecDeque,
    fmt::Write,
    time::{Duration, SystemTime},
};

/// Entries kept per user.
pub const HISTORY_CAPACITY: usize = 10;
/// Entries shown by `/history`.
pub const HISTORY_VISIBLE: usize = 5;

const URL_PREVIEW_CHARS: usize = 50;

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub url: String,
    pub kind: MediaKind,
    pub completed_at: SystemTime,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            kind,
            completed_at: SystemTime::now(),
        }
    }
}

/// Fixed-capacity log that drops its oldest entry on overflow.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryRing {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The last `n` entries, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

/// `"12m ago"` under an hour, `"3h ago"` otherwise.
#[must_use]
pub fn format_ago(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

/// Render the `/history` listing for `entries` (oldest first).
#[must_use]
pub fn format_history(entries: &[HistoryEntry], now: SystemTime) -> String {
    let mut text = format!("Your recent downloads (last {HISTORY_VISIBLE}):\n");
    for (i, entry) in entries.iter().enumerate() {
        let elapsed = now.duration_since(entry.completed_at).unwrap_or_default();
        let preview = entry.url.chars().take(URL_PREVIEW_CHARS).collect::<String>();
        let _ = writeln!(
            text,
            "{}. {}: {preview}... ({})",
            i + 1,
            entry.kind.label(),
            format_ago(elapsed)
        );
    }
    text
}
