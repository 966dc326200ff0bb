//! Sample consumer for the lightpen pulse channel.
//!
//! Holds the exclusive handle and writes every sample it reads, either as the
//! `major,minor,aux` text line or as one JSON object per line.

use anyhow::{Context, Result};
use clap::ValueEnum;
use lightpen_common::LightpenError;
use lightpen_core::{poll_many, EdgeKind, LightpenDevice, Pollable, ReadMode, Sample};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

/// Output encoding for consumed samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `major,minor,aux` per line.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// How the consumer reads.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerOptions {
    /// Blocking reads, or non-blocking reads gated by poll.
    pub mode: ReadMode,
    /// Output encoding.
    pub format: OutputFormat,
    /// Stop after this many samples (`0` = until shutdown).
    pub max_samples: u64,
    /// Poll wait in non-blocking mode.
    pub poll_timeout: Duration,
}

fn write_sample(out: &mut dyn Write, sample: &Sample, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => out.write_all(sample.encode().as_bytes())?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, sample)?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}

/// Consume samples until the device shuts down or the sample limit is hit.
///
/// Returns the number of samples written.
pub fn run_consumer(
    device: &LightpenDevice,
    options: &ConsumerOptions,
    out: &mut dyn Write,
) -> Result<u64> {
    let handle = device
        .open(EdgeKind::Pulse)
        .context("failed to open pulse channel")?;
    info!(channel = handle.channel().name(), mode = ?options.mode, "consumer started");

    let mut consumed = 0u64;
    loop {
        match handle.read(options.mode) {
            Ok(sample) => {
                write_sample(out, &sample, options.format).context("failed to write sample")?;
                out.flush()?;
                consumed += 1;
                if options.max_samples > 0 && consumed >= options.max_samples {
                    info!(samples = consumed, "sample limit reached");
                    break;
                }
            }
            Err(LightpenError::WouldBlock) => {
                // A timeout or hangup both fall through to the next read,
                // which reports the real state.
                let ready = poll_many(&[&handle as &dyn Pollable], Some(options.poll_timeout));
                if ready.is_empty() {
                    debug!("poll timeout");
                }
            }
            Err(e) if e.is_end_of_stream() => {
                debug!(error = %e, "pulse channel ended");
                break;
            }
            Err(e) => return Err(e).context("sample read failed"),
        }
    }

    Ok(consumed)
}
