//! Stream settings captured from the first delivered batch.

use std::sync::OnceLock;

/// Rate and batch size of the first batch; the unit for position and duration bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub sample_rate: u32,
    pub num_frames: usize,
}

/// First-assignment-wins holder shared by the producer and the delivery thread.
///
/// Either side may race to capture; whichever gets there first fixes the value for good.
#[derive(Debug, Default)]
pub struct SettingsCell {
    inner: OnceLock<Settings>,
}

impl SettingsCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Settings> {
        self.inner.get().copied()
    }

    /// Store `(sample_rate, num_frames)` if nothing is stored yet; return the winning value.
    pub fn capture(&self, sample_rate: u32, num_frames: usize) -> Settings {
        *self.inner.get_or_init(|| {
            tracing::debug!(sample_rate, num_frames, "stream settings captured");
            Settings {
                sample_rate,
                num_frames,
            }
        })
    }
}
