//! Hardware sink: owns the single device handle and performs blocking PCM writes.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::device::{ByteOrder, DeviceParams, PcmBackend, PcmDevice};
use crate::error::Result;
use crate::format::{AudioFormat, SampleType};

/// Lazily opened output device.
///
/// The device is configured from the first delivered batch and kept for the sink's lifetime;
/// later batches with a different format are written as-is without reconfiguring it.
pub struct HardwareSink<B: PcmBackend> {
    device_name: String,
    backend: B,
    cancel: Arc<AtomicBool>,
    device: Option<B::Device>,
    params: Option<DeviceParams>,
}

impl<B: PcmBackend> HardwareSink<B> {
    pub fn new(device_name: impl Into<String>, backend: B) -> Self {
        Self {
            device_name: device_name.into(),
            backend,
            cancel: Arc::new(AtomicBool::new(false)),
            device: None,
            params: None,
        }
    }

    /// Flag that interrupts blocking device writes and drains when raised.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Parameters the device was opened with, once it has been.
    pub fn params(&self) -> Option<&DeviceParams> {
        self.params.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Write `num_frames` frames of `format` and return how many frames the device accepted.
    ///
    /// Opens the device on first use. A short write is returned as-is; it is not retried.
    ///
    /// # Panics
    /// If `format` is not 16-bit native-endian PCM. That is a producer bug, not a runtime
    /// condition.
    pub fn deliver(
        &mut self,
        format: &AudioFormat,
        frames: &[u8],
        num_frames: usize,
    ) -> Result<usize> {
        assert_eq!(
            format.sample_type,
            SampleType::Int16NativeEndian,
            "sink only accepts 16-bit native-endian PCM"
        );

        if self.device.is_none() {
            let params = DeviceParams {
                device_name: self.device_name.clone(),
                byte_order: ByteOrder::native(),
                sample_rate: format.sample_rate,
                channels: format.channels,
                period_bytes: format.bytes_for_frames(num_frames),
            };
            let device = self.backend.open(&params, self.cancel.clone())?;
            self.params = Some(params);
            self.device = Some(device);
        } else if let Some(params) = &self.params {
            if params.sample_rate != format.sample_rate || params.channels != format.channels {
                tracing::debug!(
                    configured_rate = params.sample_rate,
                    configured_channels = params.channels,
                    batch_rate = format.sample_rate,
                    batch_channels = format.channels,
                    "format change not applied to open device"
                );
            }
        }

        let len = format.bytes_for_frames(num_frames).min(frames.len());
        Ok(self
            .device
            .as_mut()
            .map(|device| device.write(&frames[..len]))
            .unwrap_or(0))
    }

    /// Wait for the open device to play out what it holds. No-op when nothing was opened.
    pub fn drain(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.drain();
        }
    }

    /// Release the device. Further deliveries would open a fresh one.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.params = None;
    }
}

impl<B: PcmBackend> Drop for HardwareSink<B> {
    fn drop(&mut self) {
        self.close();
    }
}
