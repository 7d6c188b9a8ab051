//! Minimum spacing between upstream requests.
//!
//! Worker count and request pacing are separate knobs: any number of workers
//! may be in flight, but each upstream call first takes a slot here, and slots
//! are handed out at least `min_interval` apart.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::catalog::CatalogError;

#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Mutex<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval: Mutex::new(min_interval),
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        *self.min_interval.lock()
    }

    pub fn set_min_interval(&self, interval: Duration) {
        *self.min_interval.lock() = interval;
    }

    /// Wait for the next request slot.
    ///
    /// The slot is reserved before sleeping, so concurrent callers queue up
    /// behind each other without holding a lock across the wait.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), CatalogError> {
        let interval = self.min_interval();
        if interval.is_zero() {
            return if cancel.is_cancelled() {
                Err(CatalogError::Cancelled)
            } else {
                Ok(())
            };
        }

        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.lock();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + interval);
            slot
        };

        if slot > now {
            trace!(wait_ms = (slot - now).as_millis() as u64, "Throttling request");
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CatalogError::Cancelled),
            _ = tokio::time::sleep_until(slot) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn spaces_out_concurrent_callers() {
        let throttle = Arc::new(RequestThrottle::new(Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let throttle = Arc::clone(&throttle);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                throttle.acquire(&cancel).await.unwrap();
                Instant::now()
            }));
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap() - started);
        }
        times.sort();

        assert_eq!(times[0], Duration::ZERO);
        assert!(times[3] >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_waits() {
        let throttle = RequestThrottle::new(Duration::ZERO);
        let started = Instant::now();
        for _ in 0..10 {
            throttle.acquire(&CancellationToken::new()).await.unwrap();
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_cancellable() {
        let throttle = RequestThrottle::new(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        throttle.acquire(&cancel).await.unwrap();

        cancel.cancel();
        assert!(matches!(
            throttle.acquire(&cancel).await,
            Err(CatalogError::Cancelled)
        ));
    }
}
