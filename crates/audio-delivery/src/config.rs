use std::time::Duration;

use crate::queue::OverflowPolicy;

/// Device name that resolves to the host's default output device.
pub const DEFAULT_DEVICE_NAME: &str = "default";

/// Tuning parameters for the delivery thread and its queue.
#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    /// Output device name; [`DEFAULT_DEVICE_NAME`] or a case-insensitive substring.
    pub device_name: String,
    /// Sleep increment while paused. Bounds resume latency.
    pub pause_poll: Duration,
    /// Bounded wait for the next batch. Bounds shutdown latency when the producer is idle.
    pub dequeue_timeout: Duration,
    /// Cap on pending batches; `None` leaves the queue unbounded.
    pub max_queued_batches: Option<usize>,
    /// What to do with a batch that arrives while the queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            pause_poll: Duration::from_millis(100),
            dequeue_timeout: Duration::from_millis(500),
            max_queued_batches: Some(512),
            overflow: OverflowPolicy::DropNewest,
        }
    }
}
