//! Counting barrier used to sequence type workers

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a barrier wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierAbort {
    /// The run deadline passed before every expected signal arrived
    DeadlineExceeded,
    /// The run was cancelled
    Cancelled,
}

impl std::fmt::Display for BarrierAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarrierAbort::DeadlineExceeded => write!(f, "run deadline exceeded"),
            BarrierAbort::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Releases a waiter once it has received one signal from each expected
/// neighbor.
///
/// Backed by a semaphore that starts with zero permits; every signal adds a
/// permit and the waiter acquires `capacity` of them at once.
#[derive(Debug)]
pub struct Barrier {
    capacity: usize,
    signals: AtomicUsize,
    semaphore: Semaphore,
}

impl Barrier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            signals: AtomicUsize::new(0),
            semaphore: Semaphore::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of signals received so far.
    pub fn received(&self) -> usize {
        self.signals.load(Ordering::Acquire)
    }

    /// Deliver one "clear" signal.
    pub fn signal(&self) {
        let received = self.signals.fetch_add(1, Ordering::AcqRel) + 1;
        if received > self.capacity {
            tracing::warn!(
                capacity = self.capacity,
                received,
                "Barrier signalled more often than its capacity"
            );
        }
        self.semaphore.add_permits(1);
    }

    /// Wait until `capacity` signals have arrived, the deadline passes, or
    /// the token is cancelled. A zero-capacity barrier is always open.
    pub async fn wait(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), BarrierAbort> {
        if self.capacity == 0 {
            return Ok(());
        }

        let needed = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        tokio::select! {
            acquired = tokio::time::timeout_at(deadline, self.semaphore.acquire_many(needed)) => {
                match acquired {
                    // The semaphore is never closed, so an acquire error
                    // cannot happen; treat it like an open barrier.
                    Ok(permits) => {
                        if let Ok(permits) = permits {
                            permits.forget();
                        }
                        Ok(())
                    }
                    Err(_) => Err(BarrierAbort::DeadlineExceeded),
                }
            }
            _ = cancel.cancelled() => Err(BarrierAbort::Cancelled),
        }
    }
}
