//! Hardware output devices.
//!
//! [`PcmBackend`] / [`PcmDevice`] are the open-once/write seam the sink talks to.
//! [`CpalBackend`] implements it on top of CPAL:
//! - selecting the default device or a device by substring match
//! - picking an output config with the exact rate/channels of the stream (no resampling)
//! - turning CPAL's pull callback into blocking writes via [`PcmRing`]

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::DEFAULT_DEVICE_NAME;
use crate::error::{Error, Result};
use crate::ring::PcmRing;

/// Byte order of the 16-bit samples handed to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of this machine, i.e. what "native endian" PCM uses.
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

/// Everything needed to open and configure the device once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceParams {
    pub device_name: String,
    pub byte_order: ByteOrder,
    pub sample_rate: u32,
    pub channels: u16,
    /// Block size in bytes the device is asked to consume per write.
    pub period_bytes: usize,
}

impl DeviceParams {
    /// Period size in frames (16-bit samples).
    pub fn period_frames(&self) -> usize {
        let frame_bytes = 2 * usize::from(self.channels.max(1));
        (self.period_bytes / frame_bytes).max(1)
    }
}

/// Opens hardware devices.
pub trait PcmBackend {
    type Device: PcmDevice;

    /// Open and configure a device. Once `cancel` is raised, blocking calls on the returned
    /// device must return promptly.
    fn open(&mut self, params: &DeviceParams, cancel: Arc<AtomicBool>) -> Result<Self::Device>;
}

/// An open device accepting interleaved 16-bit PCM.
pub trait PcmDevice {
    /// Blocking write of whole frames; returns how many frames the device accepted.
    ///
    /// Short when the device went away or the open-time cancel flag was raised.
    fn write(&mut self, frames: &[u8]) -> usize;

    /// Block until everything written so far has been played (or cancel is raised).
    fn drain(&mut self);

    /// Stop output and release the hardware. Must be idempotent.
    fn close(&mut self);
}

/// CPAL-backed [`PcmBackend`].
pub struct CpalBackend {
    host: cpal::Host,
    buffer_periods: usize,
}

impl CpalBackend {
    pub fn new(host: cpal::Host) -> Self {
        Self {
            host,
            buffer_periods: 4,
        }
    }

    /// How many periods the software buffer in front of the stream holds (minimum 2).
    pub fn with_buffer_periods(mut self, periods: usize) -> Self {
        self.buffer_periods = periods.max(2);
        self
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new(cpal::default_host())
    }
}

impl PcmBackend for CpalBackend {
    type Device = CpalDevice;

    fn open(&mut self, params: &DeviceParams, cancel: Arc<AtomicBool>) -> Result<CpalDevice> {
        let device = pick_device(&self.host, &params.device_name)?;
        let supported = pick_output_config(&device, params.sample_rate, params.channels)?;
        let mut stream_config: cpal::StreamConfig = supported.config();
        if let Some(buf) = pick_buffer_size(&supported, params.period_frames()) {
            stream_config.buffer_size = buf;
        }

        let channels = usize::from(params.channels);
        let ring_samples = params
            .period_frames()
            .saturating_mul(channels)
            .saturating_mul(self.buffer_periods);
        let ring = Arc::new(PcmRing::new(channels, ring_samples));

        let stream = build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            ring.clone(),
        )?;
        stream
            .play()
            .map_err(|e| Error::DeviceConfiguration(format!("start stream: {e}")))?;

        tracing::info!(
            device = %describe(&device),
            rate_hz = params.sample_rate,
            channels = params.channels,
            period_frames = params.period_frames(),
            sample_format = ?supported.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "output device opened"
        );

        Ok(CpalDevice {
            byte_order: params.byte_order,
            channels,
            ring,
            cancel,
            stream: Some(stream),
            scratch: Vec::new(),
        })
    }
}

/// An open CPAL output stream fed through a bounded [`PcmRing`].
pub struct CpalDevice {
    byte_order: ByteOrder,
    channels: usize,
    ring: Arc<PcmRing>,
    cancel: Arc<AtomicBool>,
    stream: Option<cpal::Stream>,
    scratch: Vec<i16>,
}

impl PcmDevice for CpalDevice {
    fn write(&mut self, frames: &[u8]) -> usize {
        let order = self.byte_order;
        self.scratch.clear();
        self.scratch.extend(frames.chunks_exact(2).map(|b| {
            let pair = [b[0], b[1]];
            match order {
                ByteOrder::Little => i16::from_le_bytes(pair),
                ByteOrder::Big => i16::from_be_bytes(pair),
            }
        }));
        // Whole frames only.
        let whole = self.scratch.len() - self.scratch.len() % self.channels;
        let pushed = self.ring.push_blocking(&self.scratch[..whole], &self.cancel);
        if pushed < whole && self.ring.is_closed() {
            tracing::debug!(
                dropped_samples = whole - pushed,
                "output stream gone; write cut short"
            );
        }
        pushed / self.channels
    }

    fn drain(&mut self) {
        tracing::debug!(buffered_frames = self.ring.len_frames(), "draining output buffer");
        if !self.ring.wait_drained(&self.cancel) {
            tracing::debug!("output buffer not drained");
        }
    }

    fn close(&mut self) {
        self.ring.close();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("stream pause on close failed: {e}");
            }
            tracing::info!(
                underrun_samples = self.ring.underrun_samples(),
                "output device closed"
            );
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolve `name` to an output device.
///
/// [`DEFAULT_DEVICE_NAME`] (or an empty name) selects the host default; anything else picks the
/// first output device whose name contains it (case-insensitive).
pub fn pick_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    let name = name.trim();
    if name.is_empty() || name.eq_ignore_ascii_case(DEFAULT_DEVICE_NAME) {
        return host
            .default_output_device()
            .ok_or_else(|| Error::DeviceConfiguration("no default output device".to_string()));
    }

    let mut devices = host
        .output_devices()
        .map_err(|e| Error::DeviceConfiguration(format!("no output devices: {e}")))?;
    devices
        .find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), name))
                .unwrap_or(false)
        })
        .ok_or_else(|| Error::DeviceConfiguration(format!("no output device matched: {name}")))
}

/// Pick an output config with exactly `rate` and `channels`, preferring 16-bit integer samples.
pub fn pick_output_config(
    device: &cpal::Device,
    rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceConfiguration(format!("query output configs: {e}")))?
        .collect();

    let best = ranges
        .into_iter()
        .filter(|r| {
            r.channels() == channels && r.min_sample_rate() <= rate && rate <= r.max_sample_rate()
        })
        .min_by_key(|r| sample_format_rank(r.sample_format()));

    match best {
        Some(range) => Ok(range.with_sample_rate(rate)),
        None => Err(Error::DeviceConfiguration(format!(
            "device does not support {rate} Hz with {channels} channel(s)"
        ))),
    }
}

/// Ask for a stream buffer of one period, clamped to what the device advertises.
///
/// Returns `None` when the device does not report a range, leaving CPAL's default.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    period_frames: usize,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let want = u32::try_from(period_frames).unwrap_or(u32::MAX);
            Some(cpal::BufferSize::Fixed(want.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices to stdout (`--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host
        .output_devices()
        .map_err(|e| Error::DeviceConfiguration(format!("no output devices: {e}")))?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", describe(&d));
    }
    Ok(())
}

fn describe(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<PcmRing>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, ring),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, ring),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, ring),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, ring),
        other => Err(Error::DeviceConfiguration(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

/// Stream whose callback drains `ring` without blocking and pads underruns with silence.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<PcmRing>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let mut scratch: Vec<i16> = Vec::new();
    let err_ring = ring.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        // Nothing will drain the ring any more; release the writer.
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            err_ring.close();
        }
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                scratch.resize(data.len(), 0);
                ring.pop_into(&mut scratch);
                for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = <T as cpal::Sample>::from_sample::<i16>(*src);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::DeviceConfiguration(format!("build output stream: {e}")))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(channels: u16, period_bytes: usize) -> DeviceParams {
        DeviceParams {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            byte_order: ByteOrder::native(),
            sample_rate: 44_100,
            channels,
            period_bytes,
        }
    }

    #[test]
    fn native_byte_order_matches_target() {
        let expected = if 1u16.to_ne_bytes() == 1u16.to_le_bytes() {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        };
        assert_eq!(ByteOrder::native(), expected);
    }

    #[test]
    fn period_frames_from_bytes() {
        assert_eq!(params(2, 4096).period_frames(), 1024);
        assert_eq!(params(1, 4096).period_frames(), 2048);
        assert_eq!(params(2, 0).period_frames(), 1);
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", " "));
    }

    #[test]
    fn sample_format_rank_prefers_i16() {
        assert!(sample_format_rank(cpal::SampleFormat::I16) < sample_format_rank(cpal::SampleFormat::F32));
        assert!(sample_format_rank(cpal::SampleFormat::F32) < sample_format_rank(cpal::SampleFormat::U8));
    }
}
