use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::sync::Cache;

use super::{CacheValue, KeyValueCache};

#[derive(Clone)]
struct Slot {
    value: CacheValue,
    expires_at: DateTime<Utc>,
}

impl Slot {
    fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Expire each entry at its own absolute deadline.
struct AbsoluteExpiry;

impl Expiry<String, Slot> for AbsoluteExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Slot,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining())
    }
}

/// In-process [`KeyValueCache`] on top of `moka`.
pub struct MemoryCache {
    inner: Cache<String, Slot>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(AbsoluteExpiry)
            .build();
        Self { inner }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl KeyValueCache for MemoryCache {
    fn set(&self, key: &str, value: CacheValue, expires_at: DateTime<Utc>) {
        self.inner.insert(key.to_string(), Slot { value, expires_at });
    }

    fn try_get(&self, key: &str) -> Option<CacheValue> {
        let slot = self.inner.get(key)?;
        // moka evicts lazily; never hand out an entry past its deadline.
        if slot.expires_at <= Utc::now() {
            self.inner.invalidate(key);
            return None;
        }
        Some(slot.value)
    }
}
