//! Decoder stand-in for the streaming session.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets into interleaved native-endian `i16` frames
//! - hand each packet to the delivery pipeline from a background thread, the way a streaming
//!   session invokes its music-delivery callback

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use audio_delivery::delivery::{DeliveryHandle, DeliveryState};
use audio_delivery::format::{DeliveredFormat, SampleType};
use audio_delivery::timing::calculate_duration;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Session reference carried with every batch: the track being played.
pub type Session = Arc<str>;

/// How long the decoder backs off when the pipeline refuses a batch.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Short codec name from the codec registry.
    pub codec: Option<&'static str>,
    /// Track length, when the container reports it.
    pub duration: Option<Duration>,
}

/// Running decoder thread.
pub struct Decoder {
    pub info: SourceInfo,
    finished: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl Decoder {
    /// Whether every packet has been decoded and delivered (or decoding stopped).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn join(self) {
        if self.join.join().is_err() {
            tracing::error!("decoder thread panicked");
        }
    }
}

/// Signal spec of the decoded stream seen through the pipeline's format trait.
///
/// The decoder always converts to 16-bit native-endian PCM.
struct S16Spec(SignalSpec);

impl DeliveredFormat for S16Spec {
    fn sample_type(&self) -> SampleType {
        SampleType::Int16NativeEndian
    }

    fn sample_rate(&self) -> u32 {
        self.0.rate
    }

    fn channels(&self) -> u16 {
        self.0.channels.count() as u16
    }

    fn frame_size(&self) -> usize {
        SampleType::Int16NativeEndian.bytes_per_sample() * self.0.channels.count()
    }
}

/// Probe `path` and start a background thread delivering its audio into `pipeline`.
///
/// The thread stops at end of stream, when `stop` is raised, or when the pipeline has stopped.
pub fn start_decoder(
    path: &Path,
    pipeline: DeliveryHandle<Session>,
    stop: Arc<AtomicBool>,
) -> Result<Decoder> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let codec_params: CodecParameters = track.codec_params.clone();

    let channels = codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?;
    let rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;

    let info = SourceInfo {
        sample_rate: rate,
        channels: channels.count() as u16,
        codec: codec_label(&codec_params),
        duration: track_duration(&codec_params),
    };

    let session: Session = Arc::from(
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("track"),
    );

    let finished = Arc::new(AtomicBool::new(false));
    let finished_for_thread = finished.clone();
    let join = thread::Builder::new()
        .name("decoder".into())
        .spawn(move || {
            if let Err(e) = decode_loop(format, codec_params, session, &pipeline, &stop) {
                tracing::error!("decoder thread error: {e:#}");
            }
            finished_for_thread.store(true, Ordering::Release);
        })
        .context("spawn decoder thread")?;

    Ok(Decoder {
        info,
        finished,
        join,
    })
}

/// Decode packets and deliver each one as a batch, retrying refused batches.
fn decode_loop(
    mut format: Box<dyn FormatReader>,
    codec_params: CodecParameters,
    session: Session,
    pipeline: &DeliveryHandle<Session>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;
    let mut bytes: Vec<u8> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                tracing::debug!("stream reset requested; treating as end of track");
                break;
            }
            Err(e) => return Err(e).context("read packet"),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::debug!(ts = packet.ts(), "skipping undecodable packet: {msg}");
                continue;
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        let spec = S16Spec(*decoded.spec());
        let num_frames = decoded.frames();
        if num_frames == 0 {
            continue;
        }
        let mut sample_buf = SampleBuffer::<i16>::new(num_frames as u64, spec.0);
        sample_buf.copy_interleaved_ref(decoded);

        bytes.clear();
        bytes.extend(sample_buf.samples().iter().flat_map(|s| s.to_ne_bytes()));

        loop {
            if stop.load(Ordering::Acquire) || pipeline.state() == DeliveryState::Stopped {
                return Ok(());
            }
            let accepted = pipeline.on_music_delivery(session.clone(), &spec, &bytes, num_frames);
            if accepted > 0 {
                break;
            }
            thread::sleep(RETRY_DELAY);
        }
    }

    tracing::debug!("decoder reached end of stream");
    Ok(())
}

/// Track length from the frame count, via the time base when present.
fn track_duration(params: &CodecParameters) -> Option<Duration> {
    let frames = params.n_frames?;
    if let Some(tb) = params.time_base {
        let t = tb.calc_time(frames);
        return Some(Duration::from_secs(t.seconds) + Duration::from_secs_f64(t.frac));
    }
    let rate = params.sample_rate?;
    calculate_duration(usize::try_from(frames).ok()?, rate).ok()
}

/// Short name of the codec as registered with Symphonia.
fn codec_label(params: &CodecParameters) -> Option<&'static str> {
    symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|descriptor| descriptor.short_name)
}
