//! Bounded sample buffer between blocking device writes and the real-time output callback.
//!
//! - delivery thread → [`PcmRing::push_blocking`] (waits while full)
//! - cpal callback → [`PcmRing::pop_into`] (never waits)
//!
//! `close()` releases a blocked writer so the device can be torn down deterministically.
//! Waits are sliced by [`WAIT_SLICE`] so a raised cancel flag is noticed even when the
//! callback has stopped pulling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Longest single condvar wait before the cancel flag is re-checked.
pub const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Thread-safe bounded queue of interleaved `i16` samples.
///
/// ## Design
/// - A `closed` flag is stored *under the same mutex* as the samples to avoid races.
/// - A single [`Condvar`] signals "space freed or closed".
pub struct PcmRing {
    channels: usize,
    inner: Mutex<RingInner>,
    cv: Condvar,
    max_samples: usize,
    underrun_samples: AtomicU64,
}

struct RingInner {
    samples: VecDeque<i16>,
    closed: bool,
}

impl PcmRing {
    /// Create a ring holding at most `max_samples` samples (at least one frame).
    pub fn new(channels: usize, max_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(RingInner {
                samples: VecDeque::with_capacity(max_samples),
                closed: false,
            }),
            cv: Condvar::new(),
            max_samples: max_samples.max(channels),
            underrun_samples: AtomicU64::new(0),
        }
    }

    /// Buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.inner.lock().unwrap().samples.len() / self.channels
    }

    /// Samples the callback had to replace with silence so far.
    pub fn underrun_samples(&self) -> u64 {
        self.underrun_samples.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Refuse further writes and wake a blocked writer. Idempotent.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Append samples, waiting for space while the ring is full.
    ///
    /// Returns how many samples were accepted; fewer than `samples.len()` only if the ring was
    /// closed or `cancel` was raised while waiting.
    pub fn push_blocking(&self, samples: &[i16], cancel: &AtomicBool) -> usize {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock().unwrap();

            while g.samples.len() >= self.max_samples && !g.closed {
                if cancel.load(Ordering::Acquire) {
                    return offset;
                }
                g = self.cv.wait_timeout(g, WAIT_SLICE).unwrap().0;
            }
            if g.closed {
                return offset;
            }

            let room = self.max_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
        }

        offset
    }

    /// Wait until the callback has consumed everything buffered.
    ///
    /// Returns `false` if the ring was closed or `cancel` was raised with samples still pending.
    pub fn wait_drained(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.inner.lock().unwrap();
        while !g.samples.is_empty() {
            if g.closed || cancel.load(Ordering::Acquire) {
                return false;
            }
            g = self.cv.wait_timeout(g, WAIT_SLICE).unwrap().0;
        }
        true
    }

    /// Fill `out` from the ring without waiting; the unfilled tail is set to silence.
    ///
    /// Returns the number of samples taken from the ring.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut g = self.inner.lock().unwrap();
        let take = g.samples.len().min(out.len());
        for (dst, src) in out.iter_mut().zip(g.samples.drain(..take)) {
            *dst = src;
        }
        drop(g);
        self.cv.notify_all();

        if take < out.len() {
            out[take..].fill(0);
            self.underrun_samples
                .fetch_add((out.len() - take) as u64, Ordering::Relaxed);
        }
        take
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn never() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn pop_into_pads_with_silence() {
        let ring = PcmRing::new(2, 16);
        ring.push_blocking(&[1, 2, 3, 4], &never());
        let mut out = [9i16; 6];
        assert_eq!(ring.pop_into(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4, 0, 0]);
        assert_eq!(ring.underrun_samples(), 2);
    }

    #[test]
    fn push_blocking_waits_for_reader() {
        let ring = Arc::new(PcmRing::new(1, 4));
        let writer = ring.clone();

        let handle =
            thread::spawn(move || writer.push_blocking(&[1, 2, 3, 4, 5, 6, 7, 8], &never()));

        let mut collected = Vec::new();
        let mut buf = [0i16; 2];
        while collected.len() < 8 {
            let n = ring.pop_into(&mut buf);
            collected.extend_from_slice(&buf[..n]);
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(handle.join().unwrap(), 8);
        assert_eq!(collected, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn close_releases_blocked_writer_with_partial_count() {
        let ring = Arc::new(PcmRing::new(2, 4));
        let writer = ring.clone();

        let handle = thread::spawn(move || writer.push_blocking(&[0; 10], &never()));

        while ring.len_frames() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        ring.close();
        assert_eq!(handle.join().unwrap(), 4);
        assert!(ring.is_closed());
    }

    #[test]
    fn push_after_close_accepts_nothing() {
        let ring = PcmRing::new(2, 8);
        ring.close();
        assert_eq!(ring.push_blocking(&[1, 2], &never()), 0);
    }

    #[test]
    fn cancel_releases_writer_when_nobody_reads() {
        let ring = Arc::new(PcmRing::new(2, 4));
        let cancel = Arc::new(AtomicBool::new(false));
        let (writer, writer_cancel) = (ring.clone(), cancel.clone());

        let handle = thread::spawn(move || writer.push_blocking(&[0; 100], &writer_cancel));

        while ring.len_frames() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        let start = Instant::now();
        cancel.store(true, Ordering::Release);
        assert_eq!(handle.join().unwrap(), 4);
        assert!(start.elapsed() < WAIT_SLICE * 10);
        assert!(!ring.is_closed());
    }

    #[test]
    fn wait_drained_returns_once_reader_catches_up() {
        let ring = Arc::new(PcmRing::new(1, 8));
        ring.push_blocking(&[1, 2, 3, 4], &never());
        let reader = ring.clone();

        let handle = thread::spawn(move || {
            let mut buf = [0i16; 1];
            while reader.len_frames() > 0 {
                reader.pop_into(&mut buf);
                thread::sleep(Duration::from_millis(2));
            }
        });

        assert!(ring.wait_drained(&never()));
        assert_eq!(ring.len_frames(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn wait_drained_gives_up_on_cancel_or_close() {
        let ring = PcmRing::new(1, 8);
        ring.push_blocking(&[1, 2], &never());
        assert!(!ring.wait_drained(&AtomicBool::new(true)));

        ring.close();
        assert!(!ring.wait_drained(&never()));
        assert!(PcmRing::new(1, 8).wait_drained(&never()));
    }
}
