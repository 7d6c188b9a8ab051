//! Suppression of persistently failing upstream requests.
//!
//! When a request exhausts its retries its URL is recorded for a configurable
//! window. While the record is live, callers skip the request entirely.
//! Records are keyed by a SHA-256 of the URL so credentials embedded in it are
//! never held in memory in clear.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Default suppression window.
pub const DEFAULT_SUPPRESSION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub detail: String,
    pub first_failure: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FailureRecord {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub struct FailureTracker {
    records: DashMap<String, FailureRecord>,
    ttl: RwLock<Duration>,
}

impl FailureTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl: RwLock::new(ttl),
        }
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    /// Applies to failures recorded from now on.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    fn key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    /// Live record for `url`, dropping it if it has expired.
    pub fn get(&self, url: &str) -> Option<FailureRecord> {
        let key = Self::key(url);
        let entry = self.records.get(&key)?;
        if entry.is_expired() {
            drop(entry);
            self.records.remove_if(&key, |_, record| record.is_expired());
            return None;
        }
        Some(entry.value().clone())
    }

    pub fn is_known_failure(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    /// Record (or refresh) a failure. The first-failure time of a still-live
    /// record is kept.
    pub fn record_failure(&self, url: &str, detail: &str) {
        let now = Utc::now();
        let ttl = TimeDelta::from_std(self.ttl()).unwrap_or(TimeDelta::MAX);
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let key = Self::key(url);
        let first_failure = self
            .records
            .get(&key)
            .filter(|r| !r.is_expired())
            .map(|r| r.first_failure)
            .unwrap_or(now);

        debug!(key = &key[..12], %expires_at, "Recording request failure");
        self.records.insert(
            key,
            FailureRecord {
                detail: detail.to_string(),
                first_failure,
                expires_at,
            },
        );
    }

    /// Number of stored records, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSION)
    }
}
