use crate::error::LimiterError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting semaphore that caps how many handlers bound to it run at once.
///
/// Clones share the same slots, so one limiter can be threaded through
/// several workflows (for example an outer document workflow and every
/// per-page sub-workflow it spawns) to enforce a single global cap.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `max` slots.
    pub fn new(max: usize) -> Result<Self, LimiterError> {
        if max == 0 {
            return Err(LimiterError::ZeroCapacity);
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max)),
            capacity: max,
        })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    ///
    /// Returns [`LimiterError::Cancelled`] without taking a slot if `cancel`
    /// fires first. The slot is held until the returned permit is dropped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<LimiterPermit, LimiterError> {
        if cancel.is_cancelled() {
            return Err(LimiterError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LimiterError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.map_err(|_| LimiterError::Closed)?;
                Ok(LimiterPermit { _permit: permit })
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<LimiterPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| LimiterPermit { _permit: permit })
    }
}

/// A held limiter slot. Released exactly once, when dropped.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl LimiterPermit {
    /// Release the slot now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }
}
