//! Audio delivery thread.
//!
//! Bridges the decoder's callback thread to the blocking hardware sink:
//! - the producer calls [`DeliveryHandle::on_music_delivery`], which only snapshots and queues
//! - a dedicated worker drains the queue in FIFO order while playing
//! - `pause()` / `play()` gate draining, `clear()` discards what is queued
//! - the shared shutdown flag stops the worker, which discards the remaining queue
//! - `finish()` instead plays out the queue and the device buffer before stopping
//!
//! Every wait in the worker is bounded, so a shutdown is observed within one
//! `dequeue_timeout` (or one `pause_poll` while paused). The same flag interrupts a device
//! write that is stuck because the output stream stopped consuming.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::controller::PlaybackController;
use crate::device::PcmBackend;
use crate::error::{Error, Result};
use crate::format::{AudioFormat, DeliveredFormat};
use crate::queue::{AudioBatch, BatchQueue, PushOutcome};
use crate::settings::{Settings, SettingsCell};
use crate::sink::HardwareSink;
use crate::timing::calculate_duration;

/// Observable state of the delivery thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Playing,
    Paused,
    /// The worker observed shutdown (or failed) and exited. Terminal.
    Stopped,
}

/// Counters accumulated over the pipeline's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Batches handed to the sink.
    pub batches_written: u64,
    /// Frames offered to the sink.
    pub frames_requested: u64,
    /// Frames the device reported as accepted.
    pub frames_written: u64,
    /// Writes where the device accepted fewer frames than offered.
    pub partial_writes: u64,
    /// Incoming batches refused because the queue was full.
    pub rejected_batches: u64,
    /// Queued batches evicted to make room for newer ones.
    pub dropped_batches: u64,
    /// Batches discarded by `clear()` or shutdown.
    pub flushed_batches: u64,
    /// Sum of the nominal per-batch duration derived from the captured settings.
    pub nominal_duration: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    batches_written: AtomicU64,
    frames_requested: AtomicU64,
    frames_written: AtomicU64,
    partial_writes: AtomicU64,
    rejected_batches: AtomicU64,
    dropped_batches: AtomicU64,
    flushed_batches: AtomicU64,
    nominal_nanos: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            frames_requested: self.frames_requested.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            partial_writes: self.partial_writes.load(Ordering::Relaxed),
            rejected_batches: self.rejected_batches.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            nominal_duration: Duration::from_nanos(self.nominal_nanos.load(Ordering::Relaxed)),
        }
    }
}

struct Shared<S> {
    queue: BatchQueue<AudioBatch<S>>,
    playing: AtomicBool,
    stopped: AtomicBool,
    finishing: AtomicBool,
    shutdown: Arc<AtomicBool>,
    settings: SettingsCell,
    counters: Counters,
}

impl<S> Shared<S> {
    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    fn is_finishing(&self) -> bool {
        self.finishing.load(Ordering::Acquire)
    }

    fn flush(&self) -> usize {
        let n = self.queue.drain();
        self.counters
            .flushed_batches
            .fetch_add(n as u64, Ordering::Relaxed);
        n
    }
}

/// Cloneable control and producer handle for a running delivery thread.
pub struct DeliveryHandle<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for DeliveryHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S> DeliveryHandle<S> {
    /// Resume draining. No-op when already playing.
    pub fn play(&self) {
        if !self.shared.playing.swap(true, Ordering::AcqRel) {
            tracing::debug!("delivery resumed");
        }
    }

    /// Stop draining; queued batches are kept. No-op when already paused.
    pub fn pause(&self) {
        if self.shared.playing.swap(false, Ordering::AcqRel) {
            tracing::debug!("delivery paused");
        }
    }

    /// Discard every queued batch without writing it (seek/skip). Never waits for new batches.
    pub fn clear(&self) -> usize {
        let n = self.shared.flush();
        tracing::debug!(batches = n, "delivery queue cleared");
        n
    }

    pub fn state(&self) -> DeliveryState {
        if self.shared.stopped.load(Ordering::Acquire) {
            DeliveryState::Stopped
        } else if self.shared.is_playing() {
            DeliveryState::Playing
        } else {
            DeliveryState::Paused
        }
    }

    /// Settings captured from the first batch, if one arrived.
    pub fn settings(&self) -> Option<Settings> {
        self.shared.settings.get()
    }

    pub fn queued_batches(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.shared.counters.snapshot()
    }

    /// Raise the shared shutdown signal and wake the worker.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue.wake_all();
    }

    /// Producer entry point, called on the decoder's delivery thread.
    ///
    /// Snapshots `format`, copies `frames`, and queues the batch without waiting. Returns the
    /// number of frames accepted: `num_frames`, or `0` when nothing was queued (empty batch,
    /// full queue under [`crate::queue::OverflowPolicy::DropNewest`], pipeline finishing or shut
    /// down) so the decoder can deliver the same frames again later.
    pub fn on_music_delivery<F>(
        &self,
        session: S,
        format: &F,
        frames: &[u8],
        num_frames: usize,
    ) -> usize
    where
        F: DeliveredFormat + ?Sized,
    {
        if num_frames == 0
            || self.shared.shutdown_requested()
            || self.shared.is_finishing()
            || self.shared.stopped.load(Ordering::Acquire)
        {
            return 0;
        }

        self.shared.settings.capture(format.sample_rate(), num_frames);

        let format = AudioFormat::snapshot(format);
        let len = format.bytes_for_frames(num_frames).min(frames.len());
        let batch = AudioBatch {
            session,
            format,
            frames: frames[..len].to_vec(),
            num_frames,
        };

        match self.shared.queue.push(batch) {
            PushOutcome::Queued => num_frames,
            PushOutcome::DroppedOldest(old) => {
                self.shared
                    .counters
                    .dropped_batches
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    dropped_frames = old.num_frames,
                    "delivery queue full; dropped oldest batch"
                );
                num_frames
            }
            PushOutcome::Rejected(_) => {
                self.shared
                    .counters
                    .rejected_batches
                    .fetch_add(1, Ordering::Relaxed);
                tracing::trace!(num_frames, "delivery queue full; batch refused");
                0
            }
        }
    }
}

/// The dedicated worker draining queued batches into a [`HardwareSink`].
///
/// Starts in [`DeliveryState::Playing`]. Dereferences to its [`DeliveryHandle`].
pub struct AudioDeliveryThread<S> {
    handle: DeliveryHandle<S>,
    join: JoinHandle<Result<()>>,
}

impl<S: Send + 'static> AudioDeliveryThread<S> {
    /// Spawn the worker.
    ///
    /// The sink (and with it the device) is created on the worker thread, so `B::Device` does
    /// not need to be `Send`. `shutdown` is the process-wide stop signal.
    pub fn spawn<B, C>(
        config: DeliveryConfig,
        backend: B,
        controller: C,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self>
    where
        B: PcmBackend + Send + 'static,
        C: PlaybackController + 'static,
    {
        let shared = Arc::new(Shared {
            queue: BatchQueue::new(config.max_queued_batches, config.overflow),
            playing: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            finishing: AtomicBool::new(false),
            shutdown,
            settings: SettingsCell::new(),
            counters: Counters::default(),
        });

        let shared_for_thread = shared.clone();
        let join = thread::Builder::new()
            .name("audio-delivery".into())
            .spawn(move || {
                let worker = Worker {
                    sink: HardwareSink::new(config.device_name.clone(), backend)
                        .with_cancel(shared_for_thread.shutdown.clone()),
                    shared: shared_for_thread,
                    controller,
                    config,
                };
                worker.run()
            })
            .map_err(Error::Spawn)?;

        Ok(Self {
            handle: DeliveryHandle { shared },
            join,
        })
    }

    pub fn handle(&self) -> DeliveryHandle<S> {
        self.handle.clone()
    }

    /// Wait for the worker to exit. Does not raise the shutdown signal itself.
    ///
    /// Returns the final counters, or the error that ended the pipeline.
    pub fn join(self) -> Result<DeliveryStats> {
        match self.join.join() {
            Ok(Ok(())) => Ok(self.handle.stats()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::WorkerPanicked),
        }
    }

    /// Raise the shutdown signal and wait for the worker to exit.
    pub fn stop(self) -> Result<DeliveryStats> {
        self.handle.shutdown();
        self.join()
    }

    /// End of stream: refuse new batches, resume if paused, write everything still queued,
    /// wait for the device to play it out, then exit.
    ///
    /// The shared shutdown signal still cuts this short.
    pub fn finish(self) -> Result<DeliveryStats> {
        self.handle.shared.finishing.store(true, Ordering::Release);
        self.handle.play();
        self.handle.shared.queue.wake_all();
        self.join()
    }
}

impl<S> Deref for AudioDeliveryThread<S> {
    type Target = DeliveryHandle<S>;

    fn deref(&self) -> &DeliveryHandle<S> {
        &self.handle
    }
}

/// Marks the pipeline stopped however the worker exits, panics included.
struct StopGuard<'a>(&'a AtomicBool);

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

struct Worker<S, B: PcmBackend, C> {
    shared: Arc<Shared<S>>,
    sink: HardwareSink<B>,
    controller: C,
    config: DeliveryConfig,
}

impl<S, B: PcmBackend, C: PlaybackController> Worker<S, B, C> {
    fn run(mut self) -> Result<()> {
        let shared = self.shared.clone();
        let _stopped = StopGuard(&shared.stopped);
        tracing::info!(device = %self.sink.device_name(), "audio delivery thread started");

        let result = self.drain_loop();

        shared.stopped.store(true, Ordering::Release);
        let flushed = shared.flush();
        self.sink.close();
        match &result {
            Ok(()) => tracing::info!(flushed_batches = flushed, "audio delivery thread stopped"),
            Err(e) => tracing::error!(flushed_batches = flushed, "audio delivery thread failed: {e}"),
        }
        result
    }

    fn drain_loop(&mut self) -> Result<()> {
        let shared = self.shared.clone();

        while !shared.shutdown_requested() {
            while !shared.is_playing() && !shared.shutdown_requested() {
                thread::sleep(self.config.pause_poll);
            }
            if shared.shutdown_requested() {
                break;
            }
            if shared.is_finishing() && shared.queue.is_empty() {
                self.sink.drain();
                tracing::debug!("delivery finished");
                break;
            }

            let Some(batch) = shared.queue.pop_timeout(self.config.dequeue_timeout) else {
                continue;
            };

            if shared.shutdown_requested() {
                shared
                    .counters
                    .flushed_batches
                    .fetch_add(1, Ordering::Relaxed);
                break;
            }
            if !shared.is_playing() {
                // Paused while we were waiting; hand it back in order.
                shared.queue.push_front(batch);
                continue;
            }

            self.write_batch(batch)?;
        }

        Ok(())
    }

    fn write_batch(&mut self, batch: AudioBatch<S>) -> Result<()> {
        let counters = &self.shared.counters;
        let settings = self
            .shared
            .settings
            .capture(batch.format.sample_rate, batch.num_frames);
        let frame_duration = calculate_duration(settings.num_frames, settings.sample_rate)?;

        tracing::trace!(
            num_frames = batch.num_frames,
            rate_hz = batch.format.sample_rate,
            frame_duration_ms = frame_duration.as_secs_f64() * 1000.0,
            "delivering batch"
        );

        self.controller
            .music_delivered(batch.format.sample_rate, batch.num_frames);
        let written = self
            .sink
            .deliver(&batch.format, &batch.frames, batch.num_frames)?;

        counters.batches_written.fetch_add(1, Ordering::Relaxed);
        counters
            .frames_requested
            .fetch_add(batch.num_frames as u64, Ordering::Relaxed);
        counters
            .frames_written
            .fetch_add(written as u64, Ordering::Relaxed);
        counters.nominal_nanos.fetch_add(
            u64::try_from(frame_duration.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if written < batch.num_frames {
            counters.partial_writes.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(requested = batch.num_frames, written, "partial device write");
        }
        Ok(())
    }
}
