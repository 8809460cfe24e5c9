//! Epoch and response-index state shared between the engine and the
//! playback sequencer.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters coupling the engine to the sequencer.
///
/// `reset()` is the barge-in cancellation point: it advances the epoch and
/// restarts response indices at zero. In-flight streaming loops observe the
/// epoch change and stop emitting; stale-epoch allocations fail.
#[derive(Debug, Default)]
pub struct EngineShared {
    epoch: AtomicU64,
    next_index: AtomicU64,
}

impl EngineShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Allocate the next response index, unless `expected_epoch` has been
    /// superseded by a reset.
    pub fn allocate(&self, expected_epoch: u64) -> Option<u64> {
        if self.epoch.load(Ordering::SeqCst) != expected_epoch {
            return None;
        }
        Some(self.next_index.fetch_add(1, Ordering::SeqCst))
    }

    /// Advance the epoch and restart indices. Idempotent in effect: a second
    /// reset with nothing in flight changes observable state the same way.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.next_index.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_monotonic() {
        let shared = EngineShared::new();
        let epoch = shared.epoch();
        assert_eq!(shared.allocate(epoch), Some(0));
        assert_eq!(shared.allocate(epoch), Some(1));
        assert_eq!(shared.allocate(epoch), Some(2));
    }

    #[test]
    fn test_reset_bumps_epoch_and_restarts_indices() {
        let shared = EngineShared::new();
        let old_epoch = shared.epoch();
        shared.allocate(old_epoch);
        shared.allocate(old_epoch);

        shared.reset();
        assert_eq!(shared.epoch(), old_epoch + 1);

        // Stale epoch can no longer allocate.
        assert_eq!(shared.allocate(old_epoch), None);

        // The new epoch restarts at index 0.
        assert_eq!(shared.allocate(shared.epoch()), Some(0));
    }

    #[test]
    fn test_double_reset_behaves_like_one() {
        let shared = EngineShared::new();
        shared.reset();
        let after_one = shared.allocate(shared.epoch());
        let shared2 = EngineShared::new();
        shared2.reset();
        shared2.reset();
        let after_two = shared2.allocate(shared2.epoch());
        assert_eq!(after_one, after_two);
    }
}
