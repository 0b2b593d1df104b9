//! Terminal music player.
//!
//! ## Pipeline
//! 1. **Decode**: a background thread uses Symphonia to decode the file into 16-bit batches and
//!    hands them to the delivery pipeline, like a streaming session's delivery callback.
//! 2. **Deliver**: the `audio-delivery` worker drains batches into the output device via CPAL,
//!    reporting each one to the [`player::Player`] for position tracking.
//! 3. **Control**: stdin commands pause, resume, clear, or quit; Ctrl-C raises the shared
//!    shutdown signal.

mod cli;
mod commands;
mod config;
mod decode;
mod player;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use audio_delivery::delivery::{AudioDeliveryThread, DeliveryState};
use audio_delivery::device::{self, CpalBackend};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;
use crate::decode::Session;

const CONTROL_POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_delivery=info,player_cli=info")
        }))
        .init();
    let host = cpal::default_host();

    if args.list_devices {
        device::list_devices(&host)?;
        return Ok(());
    }

    let path = args
        .path
        .clone()
        .ok_or_else(|| anyhow!("no audio file given (see --help)"))?;
    let file_config = match &args.config {
        Some(p) => config::load(p)?,
        None => config::FileConfig::default(),
    };
    let config = config::resolve(&args, file_config);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::Release))
            .context("install Ctrl-C handler")?;
    }

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let player = Arc::new(player::Player::new(title));

    let backend = CpalBackend::new(host).with_buffer_periods(config.buffer_periods);
    let pipeline: AudioDeliveryThread<Session> = AudioDeliveryThread::spawn(
        config.delivery.clone(),
        backend,
        player.clone(),
        shutdown.clone(),
    )?;

    let decoder = match decode::start_decoder(&path, pipeline.handle(), shutdown.clone()) {
        Ok(d) => d,
        Err(e) => {
            if let Err(stop_err) = pipeline.stop() {
                tracing::warn!("audio delivery stopped with error: {stop_err}");
            }
            return Err(e);
        }
    };
    tracing::info!(
        path = ?path,
        rate_hz = decoder.info.sample_rate,
        channels = decoder.info.channels,
        codec = decoder.info.codec.unwrap_or("?"),
        device = %config.delivery.device_name,
        max_queued_batches = ?config.delivery.max_queued_batches,
        "source (local file)"
    );
    println!("{}", commands::help());

    let command_rx = commands::spawn_stdin_reader();
    let mut stdin_open = true;
    let mut end_of_track = false;

    loop {
        if shutdown.load(Ordering::Acquire) {
            tracing::info!("shutdown requested");
            break;
        }
        if pipeline.state() == DeliveryState::Stopped {
            break;
        }
        if decoder.is_finished() && pipeline.queued_batches() == 0 {
            tracing::info!("end of track");
            end_of_track = true;
            break;
        }

        if !stdin_open {
            std::thread::sleep(CONTROL_POLL);
            continue;
        }
        match command_rx.recv_timeout(CONTROL_POLL) {
            Ok(Command::Pause) => pipeline.pause(),
            Ok(Command::Resume) => pipeline.play(),
            Ok(Command::Clear) => {
                let dropped = pipeline.clear();
                println!("cleared {dropped} buffered batch(es)");
            }
            Ok(Command::Status) => {
                println!("{}", player.status_line(&decoder.info, &pipeline.handle()));
            }
            Ok(Command::Quit) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => stdin_open = false,
        }
    }

    // At end of track the device plays out what it still buffers; otherwise cut it off.
    let stats = if end_of_track {
        pipeline.finish()
    } else {
        pipeline.stop()
    };
    decoder.join();
    let stats = stats.context("audio delivery failed")?;
    tracing::info!(
        batches = stats.batches_written,
        frames = stats.frames_written,
        partial_writes = stats.partial_writes,
        rejected = stats.rejected_batches,
        dropped = stats.dropped_batches,
        flushed = stats.flushed_batches,
        position = %player::format_position(player.elapsed()),
        "playback finished"
    );
    Ok(())
}
