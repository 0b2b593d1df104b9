use std::path::PathBuf;

use audio_delivery::queue::OverflowPolicy;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

#[derive(Parser, Debug, Default)]
#[command(name = "player-cli", version)]
pub struct Args {
    /// Path to the audio file to play
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Output device ("default" or a substring of the device name)
    #[arg(long)]
    pub device: Option<String>,

    /// TOML file with player settings; flags given here take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum number of decoded batches waiting for the device
    #[arg(long)]
    pub max_queued_batches: Option<usize>,

    /// Never limit the pending batch queue
    #[arg(long, conflicts_with = "max_queued_batches")]
    pub unbounded_queue: bool,

    /// What to do with a batch that arrives while the queue is full
    #[arg(long, value_enum)]
    pub overflow: Option<Overflow>,

    /// Device periods buffered in front of the output stream
    #[arg(long)]
    pub buffer_periods: Option<usize>,

    /// Poll interval while paused (ms)
    #[arg(long)]
    pub pause_poll_ms: Option<u64>,

    /// Bounded wait for the next batch (ms); also bounds shutdown latency
    #[arg(long)]
    pub dequeue_timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Overflow {
    /// Evict the oldest queued batch
    DropOldest,
    /// Refuse the new batch; the decoder retries it
    DropNewest,
}

impl From<Overflow> for OverflowPolicy {
    fn from(value: Overflow) -> Self {
        match value {
            Overflow::DropOldest => OverflowPolicy::DropOldest,
            Overflow::DropNewest => OverflowPolicy::DropNewest,
        }
    }
}
