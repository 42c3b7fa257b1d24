//! Run progress shared with whoever renders it.
//!
//! The orchestrator is the only writer. Readers may poll at any time from any
//! thread; the fraction they see never decreases within a run and stays below
//! 1.0 until [`ProgressHandle::finish`] marks the run (merge included) done.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::time::Instant;

/// Highest fraction reported while a run is still in flight.
pub const IN_FLIGHT_CAP: f64 = 0.99;

/// A point-in-time view of a run, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    /// Chunks finished, successfully or not.
    pub chunks_completed: usize,
    /// Chunks in the run.
    pub chunks_total: usize,
    /// Reported fraction in `[0, 1]`.
    pub fraction: f64,
    /// Time since the run started (milliseconds).
    pub elapsed_ms: u64,
}

impl ChunkProgress {
    /// Completion percentage (0.0 to 100.0).
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        self.fraction * 100.0
    }

    /// Whether the run has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }

    /// Estimated time remaining in milliseconds, if computable.
    #[must_use]
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        if self.chunks_completed == 0 || self.chunks_completed >= self.chunks_total {
            return None;
        }
        let remaining = (self.chunks_total - self.chunks_completed) as u64;
        let ms_per_chunk = self.elapsed_ms / self.chunks_completed as u64;
        Some(remaining * ms_per_chunk)
    }
}

/// Cloneable, thread-safe progress cell.
///
/// ```rust
/// use lexiq_pipeline::ProgressHandle;
///
/// let progress = ProgressHandle::new();
/// let reader = progress.clone();
/// progress.start(2);
/// progress.advance(2);
/// assert!(reader.fraction() < 1.0);
/// progress.finish();
/// assert_eq!(reader.fraction(), 1.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    fraction_bits: AtomicU64,
    completed: AtomicUsize,
    total: AtomicUsize,
    started: Mutex<Option<Instant>>,
}

impl ProgressHandle {
    /// A handle at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported fraction in `[0, 1]`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.inner.fraction_bits.load(Ordering::Acquire))
    }

    /// Snapshot for display.
    #[must_use]
    pub fn snapshot(&self) -> ChunkProgress {
        let started = *self
            .inner
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ChunkProgress {
            chunks_completed: self.inner.completed.load(Ordering::Acquire),
            chunks_total: self.inner.total.load(Ordering::Acquire),
            fraction: self.fraction(),
            elapsed_ms: started.map_or(0, |t| t.elapsed().as_millis() as u64),
        }
    }

    /// Begin a run of `total` chunks, resetting the fraction to zero.
    pub fn start(&self, total: usize) {
        *self
            .inner
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.inner.completed.store(0, Ordering::Release);
        self.inner.total.store(total, Ordering::Release);
        self.inner.fraction_bits.store(0f64.to_bits(), Ordering::Release);
    }

    /// Record that `completed` of the run's chunks are done.
    pub fn advance(&self, completed: usize) {
        let total = self.inner.total.load(Ordering::Acquire).max(1);
        self.inner.completed.fetch_max(completed, Ordering::AcqRel);
        self.raise((completed as f64 / total as f64).min(IN_FLIGHT_CAP));
    }

    /// Raise the fraction to `fraction` (capped in flight) if it is higher.
    pub fn raise(&self, fraction: f64) {
        let target = fraction.clamp(0.0, IN_FLIGHT_CAP);
        let _ = self
            .inner
            .fraction_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (target > f64::from_bits(bits)).then_some(target.to_bits())
            });
    }

    /// Mark the run complete.
    pub fn finish(&self) {
        let total = self.inner.total.load(Ordering::Acquire);
        self.inner.completed.store(total, Ordering::Release);
        self.inner.fraction_bits.store(1f64.to_bits(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_is_monotonic_and_capped() {
        let progress = ProgressHandle::new();
        progress.start(4);

        progress.advance(2);
        assert!((progress.fraction() - 0.5).abs() < 1e-9);

        progress.advance(1);
        assert!((progress.fraction() - 0.5).abs() < 1e-9);

        progress.advance(4);
        assert!((progress.fraction() - IN_FLIGHT_CAP).abs() < 1e-9);

        progress.finish();
        assert!((progress.fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_start_resets() {
        let progress = ProgressHandle::new();
        progress.start(1);
        progress.finish();
        progress.start(3);
        assert!(progress.fraction().abs() < f64::EPSILON);
        assert_eq!(progress.snapshot().chunks_total, 3);
    }

    #[test]
    fn test_estimated_remaining() {
        let snapshot = ChunkProgress {
            chunks_completed: 2,
            chunks_total: 6,
            fraction: 2.0 / 6.0,
            elapsed_ms: 1000,
        };
        // 500ms per chunk, 4 to go.
        assert_eq!(snapshot.estimated_remaining_ms(), Some(2000));
        assert!(!snapshot.is_complete());
    }
}
