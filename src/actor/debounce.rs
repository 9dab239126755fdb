//! Keyed debouncing of refresh work.
//!
//! `debounce(key, op)` replaces whatever is pending under `key` and arms a
//! fresh delay; the operation runs only if nothing replaces it first. Work
//! that has already started is never cancelled by a replacement: a
//! mid-flight scan is nearly done and its result still improves the cache.
//! The key namespace partitions by intent, so a burst of title changes for
//! one pid collapses into a single refresh without a space change being
//! able to cancel it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::common::collections::HashMap;

pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

struct PendingOp {
    generation: u64,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct Debouncer {
    pending: Arc<Mutex<HashMap<String, PendingOp>>>,
    generations: Arc<AtomicU64>,
    delay: Duration,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::with_delay(DEBOUNCE_DELAY)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Debouncer {
            pending: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
            delay,
        }
    }

    /// Schedules `op` to run after the delay, cancelling any operation
    /// still pending under the same key.
    pub fn debounce<F, Fut>(&self, key: impl Into<String>, op: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let key = key.into();
        let token = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock();
            let entry = PendingOp { generation, token: token.clone() };
            if let Some(previous) = pending.insert(key.clone(), entry) {
                trace!(key, "Replacing pending debounced operation");
                previous.token.cancel();
            }
        }

        let pending = self.pending.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
            // Past this point the operation is in flight and runs to
            // completion even if the key is re-debounced.
            {
                let mut pending = pending.lock();
                if pending.get(&key).is_some_and(|current| current.generation == generation) {
                    pending.remove(&key);
                }
            }
            op().await;
        });
    }

    /// Cancels everything still pending. In-flight operations finish.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock();
        for (key, op) in pending.drain() {
            trace!(key, "Cancelling pending debounced operation");
            op.token.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replacement_cancels_pending_work() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = runs.clone();
            debouncer.debounce("refresh-42", move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(20)).await;
        }
        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_do_not_interfere() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for key in ["refresh-1", "refresh-2", "space-change"] {
            let runs = runs.clone();
            debouncer.debounce(key, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_pending_operations() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counted = runs.clone();
        debouncer.debounce("refresh-1", move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel_all();

        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_runs_before_the_delay_elapses() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counted = runs.clone();
        debouncer.debounce("refresh-1", move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
