//! Player-side callback surface notified for each drained batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Receives position bookkeeping from the delivery thread.
///
/// Called once per batch, in queue order, right before the batch is written to the device.
pub trait PlaybackController: Send + Sync {
    fn music_delivered(&self, sample_rate: u32, num_frames: usize);
}

impl<T: PlaybackController + ?Sized> PlaybackController for Arc<T> {
    fn music_delivered(&self, sample_rate: u32, num_frames: usize) {
        (**self).music_delivered(sample_rate, num_frames)
    }
}

/// Tracks how much audio has been handed to the device.
///
/// Elapsed time is accumulated in nanoseconds per batch so a mid-track rate change
/// (which the device never follows) does not rescale what was already counted.
#[derive(Debug, Default)]
pub struct PositionTracker {
    elapsed_nanos: AtomicU64,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Playback position so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::Relaxed))
    }
}

impl PlaybackController for PositionTracker {
    fn music_delivered(&self, sample_rate: u32, num_frames: usize) {
        if sample_rate == 0 {
            return;
        }
        let nanos = (num_frames as u128 * 1_000_000_000) / u128::from(sample_rate);
        self.elapsed_nanos
            .fetch_add(u64::try_from(nanos).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_accumulates_seconds() {
        let t = PositionTracker::new();
        t.music_delivered(44_100, 22_050);
        t.music_delivered(44_100, 22_050);
        assert_eq!(t.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn rate_change_does_not_rescale_counted_time() {
        let t = PositionTracker::new();
        t.music_delivered(48_000, 24_000);
        t.music_delivered(24_000, 24_000);
        assert_eq!(t.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn tracker_ignores_zero_rate() {
        let t = PositionTracker::new();
        t.music_delivered(0, 100);
        assert_eq!(t.elapsed(), Duration::ZERO);
    }

    #[test]
    fn shared_tracker_counts_through_arc() {
        let t = Arc::new(PositionTracker::new());
        let as_controller: &dyn PlaybackController = &t;
        as_controller.music_delivered(8_000, 4_000);
        assert_eq!(t.elapsed(), Duration::from_millis(500));
    }
}
