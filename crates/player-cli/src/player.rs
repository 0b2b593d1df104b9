use std::time::Duration;

use audio_delivery::controller::{PlaybackController, PositionTracker};
use audio_delivery::delivery::{DeliveryHandle, DeliveryState};

use crate::decode::SourceInfo;

/// Player-side bookkeeping for the current track.
pub struct Player {
    title: String,
    position: PositionTracker,
}

impl Player {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            position: PositionTracker::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.position.elapsed()
    }

    /// One-line status: state, position/duration, and queue depth.
    pub fn status_line<S>(&self, info: &SourceInfo, pipeline: &DeliveryHandle<S>) -> String {
        let state = match pipeline.state() {
            DeliveryState::Playing => "playing",
            DeliveryState::Paused => "paused",
            DeliveryState::Stopped => "stopped",
        };
        let total = info
            .duration
            .map(format_position)
            .unwrap_or_else(|| "?".to_string());
        format!(
            "{state} {} [{} / {}] {} Hz, {} ch, {} queued",
            self.title,
            format_position(self.elapsed()),
            total,
            info.sample_rate,
            info.channels,
            pipeline.queued_batches()
        )
    }
}

impl PlaybackController for Player {
    fn music_delivered(&self, sample_rate: u32, num_frames: usize) {
        self.position.music_delivered(sample_rate, num_frames);
    }
}

/// `m:ss` rendering of a playback position.
pub fn format_position(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_position_pads_seconds() {
        assert_eq!(format_position(Duration::from_secs(0)), "0:00");
        assert_eq!(format_position(Duration::from_secs(65)), "1:05");
        assert_eq!(format_position(Duration::from_millis(3_599_999)), "59:59");
    }

    #[test]
    fn delivered_frames_advance_position() {
        let player = Player::new("track.flac");
        player.music_delivered(44_100, 44_100);
        player.music_delivered(44_100, 22_050);
        assert_eq!(player.elapsed(), Duration::from_millis(1500));
    }
}
