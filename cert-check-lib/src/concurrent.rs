//! Concurrency limiting for certificate probes.
//!
//! A [`Limiter`] is a counting gate shared by every probe of a run. Slots are
//! handed out as [`LimiterPermit`] guards and returned when the guard drops, so
//! a slot is released exactly once on every exit path.

use crate::error::CertCheckError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many probes run at the same time.
///
/// Cloning a `Limiter` gives another handle to the same gate. Capacity is fixed
/// at construction.
#[derive(Debug, Clone)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One held slot. Dropping it frees the slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

impl Limiter {
    /// Create a limiter with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is zero or larger than the
    /// semaphore can represent.
    pub fn new(capacity: usize) -> Result<Self, CertCheckError> {
        if capacity == 0 {
            return Err(CertCheckError::config(
                "Concurrency limit must be at least 1",
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(CertCheckError::config(format!(
                "Concurrency limit {} exceeds the maximum of {}",
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Create a limiter sized with [`Limiter::default_capacity`].
    pub fn with_default_capacity() -> Self {
        let capacity = Self::default_capacity();
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Available parallelism x 2, falling back to 2 when it can't be queried.
    pub fn default_capacity() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            * 2
    }

    /// Wait for a free slot.
    ///
    /// Suspends the calling task while all slots are held.
    pub async fn acquire(&self) -> Result<LimiterPermit, CertCheckError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CertCheckError::internal("Concurrency limiter was closed"))?;

        Ok(LimiterPermit { _permit: permit })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
