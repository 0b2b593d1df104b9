use std::time::Duration;

use crate::error::{Error, Result};

/// Playback duration of `num_frames` frames at `sample_rate` Hz.
///
/// Returns [`Error::InvalidConfiguration`] for a zero sample rate instead of an infinite value.
pub fn calculate_duration(num_frames: usize, sample_rate: u32) -> Result<Duration> {
    if sample_rate == 0 {
        return Err(Error::InvalidConfiguration(
            "sample rate must be positive".to_string(),
        ));
    }
    let rate = u64::from(sample_rate);
    let frames = num_frames as u64;
    let secs = frames / rate;
    let rem = frames % rate;
    let nanos = rem * 1_000_000_000 / rate;
    Ok(Duration::new(secs, nanos as u32))
}
