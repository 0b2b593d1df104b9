//! Audio delivery pipeline for a terminal music client.
//!
//! A streaming decoder hands over PCM batches from its own callback thread; a dedicated
//! worker drains them into a blocking hardware sink.
//!
//! ## Pipeline
//! 1. **Producer**: [`delivery::DeliveryHandle::on_music_delivery`] snapshots the format,
//!    copies the frames, and pushes an [`queue::AudioBatch`] without touching the device.
//! 2. **Delivery thread**: pops batches in FIFO order, notifies the
//!    [`controller::PlaybackController`], then writes them through [`sink::HardwareSink`].
//! 3. **Sink**: opens the hardware device once, from the first batch's format.

pub mod config;
pub mod controller;
pub mod delivery;
pub mod device;
pub mod error;
pub mod format;
pub mod queue;
pub mod ring;
pub mod settings;
pub mod sink;
pub mod timing;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
