use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

pub const IDEMPOTENCY_HEADERS: [&str; 2] = ["idempotency-key", "x-idempotency-key"];

/// Idempotency key -> expiry.
///
/// A key may be claimed once per TTL; a second claim inside the TTL is a
/// duplicate, never an overwrite.
#[derive(Debug, Clone)]
pub struct IdempotencyCache {
    ttl: Duration,
    entries: HashMap<String, DateTime<Utc>>,
}

impl IdempotencyCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            entries: HashMap::new(),
        }
    }

    /// Returns true the first time `key` is seen within its TTL.
    pub fn claim(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        self.purge(now);
        if self.entries.contains_key(key) {
            return false;
        }
        let expiry = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.insert(key.to_string(), expiry);
        true
    }

    pub fn purge(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, expiry| *expiry > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
