//! PCM format descriptors handed over by the decoder.

/// Sample encoding of a delivered batch.
///
/// Only [`SampleType::Int16NativeEndian`] can be written to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleType {
    Int16NativeEndian,
    Float32,
}

impl SampleType {
    /// Bytes per single-channel sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::Int16NativeEndian => 2,
            SampleType::Float32 => 4,
        }
    }
}

/// Read-only view of a producer's format object.
///
/// Decoders may hand out a live object that is reused (and mutated) between callbacks, so the
/// pipeline only reads it through this trait and keeps an [`AudioFormat`] snapshot.
pub trait DeliveredFormat {
    fn sample_type(&self) -> SampleType;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    /// Bytes per frame across all channels.
    fn frame_size(&self) -> usize;
}

/// Immutable format of one batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_type: SampleType,
    pub sample_rate: u32,
    /// Bytes per frame across all channels.
    pub frame_size: usize,
    pub channels: u16,
}

impl AudioFormat {
    /// Interleaved 16-bit native-endian PCM, the only encoding the sink accepts.
    pub fn s16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_type: SampleType::Int16NativeEndian,
            sample_rate,
            frame_size: SampleType::Int16NativeEndian.bytes_per_sample() * channels as usize,
            channels,
        }
    }

    /// Copy every field out of a (possibly live) producer format.
    pub fn snapshot<F: DeliveredFormat + ?Sized>(format: &F) -> Self {
        Self {
            sample_type: format.sample_type(),
            sample_rate: format.sample_rate(),
            frame_size: format.frame_size(),
            channels: format.channels(),
        }
    }

    /// Byte length of `num_frames` frames in this format (saturating).
    pub fn bytes_for_frames(&self, num_frames: usize) -> usize {
        num_frames.saturating_mul(self.frame_size)
    }
}

impl DeliveredFormat for AudioFormat {
    fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct LiveFormat {
        rate: Cell<u32>,
    }

    impl DeliveredFormat for LiveFormat {
        fn sample_type(&self) -> SampleType {
            SampleType::Int16NativeEndian
        }
        fn sample_rate(&self) -> u32 {
            self.rate.get()
        }
        fn channels(&self) -> u16 {
            2
        }
        fn frame_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn s16_frame_size_counts_all_channels() {
        assert_eq!(AudioFormat::s16(44_100, 2).frame_size, 4);
        assert_eq!(AudioFormat::s16(48_000, 1).frame_size, 2);
        assert_eq!(AudioFormat::s16(48_000, 6).frame_size, 12);
    }

    #[test]
    fn snapshot_is_detached_from_live_format() {
        let live = LiveFormat {
            rate: Cell::new(44_100),
        };
        let snap = AudioFormat::snapshot(&live);
        live.rate.set(22_050);
        assert_eq!(snap.sample_rate, 44_100);
        assert_eq!(snap, AudioFormat::s16(44_100, 2));
    }

    #[test]
    fn bytes_for_frames_saturates() {
        let f = AudioFormat::s16(44_100, 2);
        assert_eq!(f.bytes_for_frames(1000), 4000);
        assert_eq!(f.bytes_for_frames(usize::MAX), usize::MAX);
    }
}
