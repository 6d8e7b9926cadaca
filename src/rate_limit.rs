use crate::session::{SessionRegistry, UserKey};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Length of the sliding window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Timestamps of accepted requests inside the current window, oldest first.
#[derive(Debug, Default, Clone)]
pub struct RateWindow {
    hits: VecDeque<Instant>,
}

impl RateWindow {
    /// Drop expired hits, then record `now` if fewer than `limit` remain.
    /// A rejected attempt leaves the window untouched.
    pub fn try_acquire(&mut self, now: Instant, limit: usize, window: Duration) -> bool {
        while self
            .hits
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            self.hits.pop_front();
        }

        if self.hits.len() >= limit {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Verdict on one incoming URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// The user already has an operation running; nothing was charged.
    Busy,
    Limited,
}

/// Per-user sliding-window limiter backed by the session registry.
///
/// Windows live in memory only; a restart resets every user.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    sessions: SessionRegistry,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(sessions: SessionRegistry, limit: usize) -> Self {
        Self {
            sessions,
            limit,
            window: RATE_WINDOW,
        }
    }

    #[inline]
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Whether `user` may start another request at `now`.
    pub fn allow(&self, user: UserKey, now: Instant) -> bool {
        let (limit, window) = (self.limit, self.window);
        self.sessions
            .with_session(user, |session| session.rate_window.try_acquire(now, limit, window))
    }

    /// [`allow`](Self::allow), unless `user` already has an operation
    /// running. A busy user is turned away without taking a slot.
    pub fn admit(&self, user: UserKey, now: Instant) -> Admission {
        if self.sessions.is_busy(user) {
            Admission::Busy
        } else if self.allow(user, now) {
            Admission::Accepted
        } else {
            Admission::Limited
        }
    }
}
