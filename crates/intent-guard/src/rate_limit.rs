//! Sliding-window rate limiting, per caller identity and global.
//!
//! Each admission appends `now` to the window before counting, so rejected
//! attempts still occupy the window until they age out.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

/// Upper bound on timestamps retained by the global window.
pub const GLOBAL_WINDOW_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: usize, window_secs: i64) -> Self {
        Self {
            max_requests,
            window: Duration::seconds(window_secs),
        }
    }
}

/// Ordered timestamps within one trailing window.
#[derive(Debug, Default, Clone)]
pub struct RateWindow {
    hits: VecDeque<DateTime<Utc>>,
    capacity: Option<usize>,
}

impl RateWindow {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            hits: VecDeque::with_capacity(capacity.min(64)),
            capacity: Some(capacity),
        }
    }

    /// Record a hit at `now`, evict aged entries, return the retained count.
    pub fn record(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        if let Some(cap) = self.capacity {
            while self.hits.len() >= cap {
                self.hits.pop_front();
            }
        }
        self.hits.push_back(now);
        self.evict(now, window);
        self.hits.len()
    }

    fn evict(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(oldest) = self.hits.front() {
            if now - *oldest > window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.hits.front().copied()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    per_identity: RateLimit,
    global: RateLimit,
    identities: HashMap<String, RateWindow>,
    global_window: RateWindow,
}

impl RateLimiter {
    pub fn new(per_identity: RateLimit, global: RateLimit) -> Self {
        Self {
            per_identity,
            global,
            identities: HashMap::new(),
            global_window: RateWindow::bounded(GLOBAL_WINDOW_CAPACITY),
        }
    }

    /// Admit one request from `identity` at `now`.
    pub fn admit(&mut self, identity: &str, now: DateTime<Utc>) -> bool {
        let window = self.per_identity.window;
        let count = self
            .identities
            .entry(identity.to_string())
            .or_default()
            .record(now, window);
        count <= self.per_identity.max_requests
    }

    /// Admit one request against the process-wide window.
    pub fn admit_global(&mut self, now: DateTime<Utc>) -> bool {
        let count = self.global_window.record(now, self.global.window);
        count <= self.global.max_requests
    }

    /// Drop identities whose windows have fully aged out.
    pub fn prune_idle(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.per_identity.window;
        let before = self.identities.len();
        self.identities.retain(|_, w| {
            w.evict(now, window);
            !w.is_empty()
        });
        before - self.identities.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.identities.len()
    }

    pub fn window_len(&self, identity: &str) -> usize {
        self.identities.get(identity).map_or(0, RateWindow::len)
    }

    pub fn global_len(&self) -> usize {
        self.global_window.len()
    }
}
