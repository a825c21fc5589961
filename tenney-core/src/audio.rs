//! # Audio Capture Module
//!
//! Real-time microphone capture through CPAL (Cross-Platform Audio Library).
//! Capture is an explicit step: [`request_capture`] either returns a running
//! [`CaptureHandle`] or says why it could not open the input.
//!
//! ## Features
//! - Default input device with its default configuration
//! - Any sample format CPAL can convert to `f32`
//! - Interleaved channels downmixed to mono
//! - Non-blocking delivery: a full channel drops the chunk
//!
//! The stream callbacks never log. Dropped chunks and stream errors are
//! recorded in a [`CaptureHealth`] that the analysis worker reads and logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::info;

use crate::error::CaptureError;
use crate::SampleChunk;

/// Capacity suggested for the chunk channel between capture and analysis.
pub const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Stream errors kept until the worker reads them; later ones are dropped.
const STREAM_ERROR_CAPACITY: usize = 16;

/// Shared view of what the capture callbacks could not deliver.
#[derive(Debug, Clone)]
pub struct CaptureHealth {
    dropped: Arc<AtomicU64>,
    errors: Receiver<cpal::StreamError>,
}

impl CaptureHealth {
    /// Total chunks dropped because the chunk channel was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Errors reported by the stream. Disconnects once the stream is gone.
    pub fn errors(&self) -> &Receiver<cpal::StreamError> {
        &self.errors
    }
}

/// The callback side of a [`CaptureHealth`].
#[derive(Debug, Clone)]
pub(crate) struct HealthRecorder {
    dropped: Arc<AtomicU64>,
    errors: Sender<cpal::StreamError>,
}

impl HealthRecorder {
    pub(crate) fn new() -> (HealthRecorder, CaptureHealth) {
        let dropped = Arc::new(AtomicU64::new(0));
        let (tx, rx) = crossbeam_channel::bounded(STREAM_ERROR_CAPACITY);
        (
            HealthRecorder {
                dropped: Arc::clone(&dropped),
                errors: tx,
            },
            CaptureHealth {
                dropped,
                errors: rx,
            },
        )
    }

    pub(crate) fn chunk_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_error(&self, err: cpal::StreamError) {
        let _ = self.errors.try_send(err);
    }
}

/// A running input stream. Dropping it stops capture.
pub struct CaptureHandle {
    stream: cpal::Stream,
    health: CaptureHealth,
    sample_rate: u32,
    channels: u16,
    device_name: String,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("device_name", &self.device_name)
            .finish()
    }
}

impl CaptureHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Counters for the analysis worker to report.
    pub fn health(&self) -> CaptureHealth {
        self.health.clone()
    }

    /// Pauses the stream and releases the device.
    pub fn stop(self) -> Result<(), CaptureError> {
        self.stream.pause()?;
        info!(device = %self.device_name, "audio capture stopped");
        Ok(())
    }
}

/// Opens the default input device and starts streaming mono chunks into `sender`.
///
/// # Errors
/// * [`CaptureError::NoInputDevice`] - The host has no input device
/// * [`CaptureError::PermissionDenied`] - The device exists but cannot be opened
/// * [`CaptureError::UnsupportedFormat`] - The device's sample format has no `f32` conversion
pub fn request_capture(sender: Sender<SampleChunk>) -> Result<CaptureHandle, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device.default_input_config()?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let (recorder, health) = HealthRecorder::new();

    let stream = match format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, sender, recorder)?,
        cpal::SampleFormat::F64 => build_stream::<f64>(&device, &config, sender, recorder)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, sender, recorder)?,
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, sender, recorder)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, sender, recorder)?,
        cpal::SampleFormat::U8 => build_stream::<u8>(&device, &config, sender, recorder)?,
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
    };
    stream.play()?;

    info!(
        device = %device_name,
        sample_rate,
        channels,
        format = ?format,
        "audio capture started"
    );
    Ok(CaptureHandle {
        stream,
        health,
        sample_rate,
        channels,
        device_name,
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sender: Sender<SampleChunk>,
    recorder: HealthRecorder,
) -> Result<cpal::Stream, CaptureError>
where
    T: Sample + SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let sample_rate = config.sample_rate.0;
    let on_error = recorder.clone();

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk = SampleChunk {
                samples: downmix(data, channels),
                sample_rate,
            };
            if let Err(TrySendError::Full(_)) = sender.try_send(chunk) {
                recorder.chunk_dropped();
            }
        },
        move |err| on_error.stream_error(err),
        None,
    )?;
    Ok(stream)
}

/// Averages each interleaved frame into one `f32` sample.
fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|s| s.to_sample::<f32>()).collect();
    }
    data.chunks_exact(channels)
        .map(|frame| {
            frame
                .iter()
                .fold(0.0f32, |acc, s| acc + s.to_sample::<f32>())
                / channels as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        let stereo = [1.0f32, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn recorder_counts_drops_and_queues_errors() {
        let (recorder, health) = HealthRecorder::new();
        let callback_side = recorder.clone();
        let handle = std::thread::spawn(move || {
            for _ in 0..5 {
                callback_side.chunk_dropped();
            }
            callback_side.stream_error(cpal::StreamError::DeviceNotAvailable);
        });
        handle.join().unwrap();
        assert_eq!(health.dropped_chunks(), 5);
        assert_eq!(
            health.errors().try_recv(),
            Ok(cpal::StreamError::DeviceNotAvailable)
        );
    }

    #[test]
    fn stream_errors_never_block_the_callback() {
        let (recorder, health) = HealthRecorder::new();
        for _ in 0..STREAM_ERROR_CAPACITY * 4 {
            recorder.stream_error(cpal::StreamError::DeviceNotAvailable);
        }
        assert_eq!(health.errors().len(), STREAM_ERROR_CAPACITY);
        drop(recorder);
        while health.errors().try_recv().is_ok() {}
        assert!(health.errors().recv().is_err());
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let mono = [0i16, i16::MIN];
        let out = downmix(&mono, 1);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
    }
}
