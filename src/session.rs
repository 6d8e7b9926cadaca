//! Process-wide per-user state.
//!
//! Sessions are created on first touch and never removed; each one holds a
//! handful of bounded fields. The map is sharded (`DashMap`), so two users only
//! contend when they hash to the same shard. Closures passed to
//! [`SessionRegistry::with_session`] run under the shard lock and must not
//! touch the registry again or await.

use crate::{
    history::{HistoryEntry, HistoryRing},
    rate_limit::RateWindow,
    utils::MediaKind,
};
use dashmap::DashMap;
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Identity of a chat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserKey(pub u64);

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<teloxide::types::UserId> for UserKey {
    fn from(id: teloxide::types::UserId) -> Self {
        Self(id.0)
    }
}

/// The registration of a live operation inside its owner's session.
#[derive(Debug, Clone)]
pub struct ActiveSlot {
    pub op_id: u64,
    pub url: String,
    pub kind: MediaKind,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct UserSession {
    pub active: Option<ActiveSlot>,
    pub rate_window: RateWindow,
    pub history: HistoryRing,
    /// URL analysed and waiting for the user to pick video or audio.
    pub pending: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<UserKey, UserSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to `user`'s session, creating it if needed.
    pub fn with_session<R>(&self, user: UserKey, f: impl FnOnce(&mut UserSession) -> R) -> R {
        let mut session = self.inner.entry(user).or_default();
        f(&mut session)
    }

    /// Read `user`'s session without creating it.
    pub fn peek<R>(&self, user: UserKey, f: impl FnOnce(&UserSession) -> R) -> Option<R> {
        self.inner.get(&user).map(|session| f(&session))
    }

    #[cfg(test)]
    fn record(&self, user: UserKey, entry: HistoryEntry) {
        self.with_session(user, |s| s.history.record(entry));
    }

    /// The last `n` history entries of `user`, oldest first.
    #[must_use]
    pub fn recent(&self, user: UserKey, n: usize) -> Vec<HistoryEntry> {
        self.peek(user, |s| s.history.recent(n)).unwrap_or_default()
    }

    pub fn set_pending(&self, user: UserKey, url: impl Into<String>) {
        let url = url.into();
        self.with_session(user, |s| s.pending = Some(url));
    }

    #[must_use]
    pub fn take_pending(&self, user: UserKey) -> Option<String> {
        self.with_session(user, |s| s.pending.take())
    }

    #[must_use]
    pub fn is_busy(&self, user: UserKey) -> bool {
        self.peek(user, |s| s.active.is_some()).unwrap_or(false)
    }

    /// Number of users with a live operation.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.iter().filter(|s| s.active.is_some()).count()
    }
}
