//! An exclusive, FIFO, cancellable lock with a stuck-lock watchdog. Built on
//! a single-permit [`tokio::sync::Semaphore`], whose `acquire` is documented FIFO
//! and cancellation-safe — a logged exclusive lock with queue-length diagnostics,
//! rather than hand-rolling a wait queue.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use roomsync_lib::RoomId;
use tokio::sync::{AcquireError, Semaphore};

use crate::error::TurnLockClosed;

pub struct TurnLock {
    room_id: RoomId,
    semaphore: Semaphore,
    queue_len: AtomicUsize,
}

/// Held while the caller's critical section runs; releases the permit on drop,
/// including on panic or cancellation, so the lock is never left stuck by a
/// caller that errors out early.
pub struct TurnLockGuard<'a> {
    lock: &'a TurnLock,
    _permit: tokio::sync::SemaphorePermit<'a>,
}

impl Drop for TurnLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.queue_len.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TurnLock {
    pub fn new(room_id: RoomId) -> Self {
        TurnLock {
            room_id,
            semaphore: Semaphore::new(1),
            queue_len: AtomicUsize::new(0),
        }
    }

    /// Number of callers currently holding or waiting for the lock.
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::SeqCst)
    }

    /// Rejects all future `acquire`/`with_lock` calls with [`TurnLockClosed`].
    /// Waiters already queued when this is called are woken with an error too;
    /// the lock is never forcibly released out from under a running critical
    /// section, it just stops admitting new ones.
    pub fn shut_down(&self) {
        self.semaphore.close();
    }

    async fn acquire(&self) -> Result<TurnLockGuard<'_>, TurnLockClosed> {
        self.queue_len.fetch_add(1, Ordering::SeqCst);
        match self.semaphore.acquire().await {
            Ok(permit) => Ok(TurnLockGuard {
                lock: self,
                _permit: permit,
            }),
            Err(AcquireError { .. }) => {
                self.queue_len.fetch_sub(1, Ordering::SeqCst);
                Err(TurnLockClosed)
            }
        }
    }

    /// Runs `f` with the lock held. Logs a warning if `f` is still running after
    /// `1.5 * expected_max_ms`; the lock is never forcibly released, the warning
    /// is purely diagnostic.
    pub async fn with_lock<F, T>(&self, name: &str, expected_max: Duration, f: F) -> Result<T, TurnLockClosed>
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire().await?;
        let watchdog_after = expected_max.mul_f64(1.5);
        let room_id = self.room_id.clone();
        let name = name.to_owned();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(watchdog_after).await;
            tracing::warn!(room_id = %room_id, lock_holder = %name, "turn lock held longer than expected");
        });
        let result = f.await;
        watchdog.abort();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomsync_lib::RoomId;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[tokio::test]
    async fn serializes_concurrent_callers() {
        let lock = Arc::new(TurnLock::new(RoomId::from("r1")));
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                lock.with_lock("test", Duration::from_millis(50), async {
                    let before = counter.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    assert_eq!(counter.load(Ordering::SeqCst), before + 1);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_waiters() {
        let lock = TurnLock::new(RoomId::from("r1"));
        lock.shut_down();
        let result = lock.with_lock("test", Duration::from_millis(10), async {}).await;
        assert!(result.is_err());
    }
}
