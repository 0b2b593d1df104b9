//! Player settings: an optional TOML file layered under command-line flags.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use audio_delivery::config::DeliveryConfig;
use serde::Deserialize;

use crate::cli::{Args, Overflow};

const DEFAULT_BUFFER_PERIODS: usize = 4;

/// Contents of the `--config` file. Every key is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub device: Option<String>,
    pub max_queued_batches: Option<usize>,
    pub unbounded_queue: Option<bool>,
    pub overflow: Option<Overflow>,
    pub buffer_periods: Option<usize>,
    pub pause_poll_ms: Option<u64>,
    pub dequeue_timeout_ms: Option<u64>,
}

/// Effective settings after layering defaults, file, and flags.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub delivery: DeliveryConfig,
    pub buffer_periods: usize,
}

pub fn load(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    parse(&raw).with_context(|| format!("parse {:?}", path))
}

fn parse(raw: &str) -> Result<FileConfig> {
    Ok(toml::from_str(raw)?)
}

/// Flags win over the file, the file wins over built-in defaults.
pub fn resolve(args: &Args, file: FileConfig) -> PlayerConfig {
    let mut delivery = DeliveryConfig::default();

    if let Some(device) = args.device.clone().or(file.device) {
        delivery.device_name = device;
    }

    let unbounded = args.unbounded_queue
        || (args.max_queued_batches.is_none() && file.unbounded_queue.unwrap_or(false));
    delivery.max_queued_batches = if unbounded {
        None
    } else {
        args.max_queued_batches
            .or(file.max_queued_batches)
            .or(delivery.max_queued_batches)
    };

    if let Some(overflow) = args.overflow.or(file.overflow) {
        delivery.overflow = overflow.into();
    }
    if let Some(ms) = args.pause_poll_ms.or(file.pause_poll_ms) {
        delivery.pause_poll = Duration::from_millis(ms.max(1));
    }
    if let Some(ms) = args.dequeue_timeout_ms.or(file.dequeue_timeout_ms) {
        delivery.dequeue_timeout = Duration::from_millis(ms.max(1));
    }

    PlayerConfig {
        delivery,
        buffer_periods: args
            .buffer_periods
            .or(file.buffer_periods)
            .unwrap_or(DEFAULT_BUFFER_PERIODS),
    }
}
