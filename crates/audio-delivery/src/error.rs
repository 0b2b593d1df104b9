//! Error types for the delivery pipeline.
//!
//! Timeouts on the batch queue and partial device writes are routine flow control and never
//! show up here. A batch with an unsupported sample encoding is a producer bug and panics
//! inside the sink instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A value that must be positive (sample rate, channel count, frame size) was not.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The hardware device could not be opened or configured with the first batch's format.
    #[error("device configuration failed: {0}")]
    DeviceConfiguration(String),

    /// The delivery worker thread could not be started.
    #[error("failed to spawn delivery thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The delivery worker died from a panic (e.g. a contract violation in the sink).
    #[error("delivery thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;
