//! In-memory backend and controller that record what the pipeline did, in order.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::controller::PlaybackController;
use crate::device::{DeviceParams, PcmBackend, PcmDevice};
use crate::error::{Error, Result};
use crate::ring::PcmRing;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Delivered { sample_rate: u32, num_frames: usize },
    Wrote(Vec<u8>),
    Drained,
}

#[derive(Default)]
struct LogInner {
    opened: Vec<DeviceParams>,
    events: Vec<Event>,
    closed: usize,
}

/// Shared, ordered record of device and controller activity.
#[derive(Clone, Default)]
pub(crate) struct RecordingLog {
    inner: Arc<Mutex<LogInner>>,
}

impl RecordingLog {
    pub(crate) fn opened(&self) -> Vec<DeviceParams> {
        self.inner.lock().unwrap().opened.clone()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Wrote(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn closed(&self) -> usize {
        self.inner.lock().unwrap().closed
    }

    /// Poll until at least `n` writes were recorded or `timeout` passes.
    pub(crate) fn wait_for_writes(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.writes().len() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.writes().len() >= n
    }

    fn push(&self, event: Event) {
        self.inner.lock().unwrap().events.push(event);
    }
}

pub(crate) struct RecordingBackend {
    log: RecordingLog,
    accept_frames: Option<usize>,
    fail_open: bool,
}

impl RecordingBackend {
    pub(crate) fn new() -> Self {
        Self::with_log(RecordingLog::default())
    }

    pub(crate) fn with_log(log: RecordingLog) -> Self {
        Self {
            log,
            accept_frames: None,
            fail_open: false,
        }
    }

    /// Devices accept at most `frames` frames per write.
    pub(crate) fn accepting_at_most(mut self, frames: usize) -> Self {
        self.accept_frames = Some(frames);
        self
    }

    pub(crate) fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn log(&self) -> RecordingLog {
        self.log.clone()
    }
}

impl PcmBackend for RecordingBackend {
    type Device = RecordingDevice;

    fn open(
        &mut self,
        params: &DeviceParams,
        _cancel: Arc<AtomicBool>,
    ) -> Result<RecordingDevice> {
        if self.fail_open {
            return Err(Error::DeviceConfiguration(format!(
                "no output device matched: {}",
                params.device_name
            )));
        }
        self.log.inner.lock().unwrap().opened.push(params.clone());
        Ok(RecordingDevice {
            log: self.log.clone(),
            frame_bytes: 2 * usize::from(params.channels.max(1)),
            accept_frames: self.accept_frames,
            closed: false,
        })
    }
}

pub(crate) struct RecordingDevice {
    log: RecordingLog,
    frame_bytes: usize,
    accept_frames: Option<usize>,
    closed: bool,
}

impl PcmDevice for RecordingDevice {
    fn write(&mut self, frames: &[u8]) -> usize {
        self.log.push(Event::Wrote(frames.to_vec()));
        let offered = frames.len() / self.frame_bytes;
        match self.accept_frames {
            Some(max) => offered.min(max),
            None => offered,
        }
    }

    fn drain(&mut self) {
        self.log.push(Event::Drained);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.inner.lock().unwrap().closed += 1;
        }
    }
}

/// Backend whose devices buffer a few frames and then never get read, like a stream whose
/// callback stopped firing.
pub(crate) struct StalledBackend;

impl PcmBackend for StalledBackend {
    type Device = StalledDevice;

    fn open(&mut self, params: &DeviceParams, cancel: Arc<AtomicBool>) -> Result<StalledDevice> {
        let channels = usize::from(params.channels.max(1));
        Ok(StalledDevice {
            ring: PcmRing::new(channels, channels * 16),
            channels,
            cancel,
        })
    }
}

pub(crate) struct StalledDevice {
    ring: PcmRing,
    channels: usize,
    cancel: Arc<AtomicBool>,
}

impl PcmDevice for StalledDevice {
    fn write(&mut self, frames: &[u8]) -> usize {
        let samples: Vec<i16> = frames
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        self.ring.push_blocking(&samples, &self.cancel) / self.channels
    }

    fn drain(&mut self) {
        self.ring.wait_drained(&self.cancel);
    }

    fn close(&mut self) {
        self.ring.close();
    }
}

/// Controller that appends [`Event::Delivered`] to the same log the device writes to.
pub(crate) struct RecordingController {
    log: RecordingLog,
}

impl RecordingController {
    pub(crate) fn new(log: RecordingLog) -> Self {
        Self { log }
    }
}

impl PlaybackController for RecordingController {
    fn music_delivered(&self, sample_rate: u32, num_frames: usize) {
        self.log.push(Event::Delivered {
            sample_rate,
            num_frames,
        });
    }
}
