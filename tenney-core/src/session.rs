//! # Analysis Session
//!
//! One worker thread per capture session. It drains the chunk channel in
//! arrival order through a [`PitchPipeline`] and publishes each record to the
//! latest-wins display slot. Configuration changes and restarts reach the
//! worker as explicit commands on a second channel. When a [`CaptureHealth`]
//! is attached, the worker also logs dropped chunks and stream errors that the
//! capture callbacks recorded.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::audio::CaptureHealth;
use crate::config::PipelineConfig;
use crate::display::DisplayPublisher;
use crate::error::PipelineError;
use crate::pipeline::PitchPipeline;
use crate::SampleChunk;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Reconfigure(PipelineConfig),
    Restart,
    Shutdown,
}

/// Handle to the analysis worker. Dropping it shuts the worker down.
#[derive(Debug)]
pub struct Session {
    control: Sender<SessionCommand>,
    handle: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawns the worker thread that owns `pipeline`.
    pub fn spawn(
        pipeline: PitchPipeline,
        chunks: Receiver<SampleChunk>,
        publisher: DisplayPublisher,
    ) -> std::io::Result<Session> {
        Self::start(pipeline, chunks, publisher, None)
    }

    /// Like [`Session::spawn`], and reports the capture's `health` from the worker.
    pub fn spawn_monitored(
        pipeline: PitchPipeline,
        chunks: Receiver<SampleChunk>,
        publisher: DisplayPublisher,
        health: CaptureHealth,
    ) -> std::io::Result<Session> {
        Self::start(pipeline, chunks, publisher, Some(health))
    }

    fn start(
        pipeline: PitchPipeline,
        chunks: Receiver<SampleChunk>,
        publisher: DisplayPublisher,
        health: Option<CaptureHealth>,
    ) -> std::io::Result<Session> {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("tenney-analysis".into())
            .spawn(move || run_worker(pipeline, chunks, control_rx, publisher, health))?;
        Ok(Session {
            control: control_tx,
            handle: Some(handle),
        })
    }

    /// Validates `config` here and applies it on the worker before the next chunk.
    pub fn reconfigure(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        config.validate()?;
        self.send(SessionCommand::Reconfigure(config));
        Ok(())
    }

    pub fn restart(&self) {
        self.send(SessionCommand::Restart);
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: SessionCommand) {
        if self.control.send(command).is_err() {
            warn!("analysis worker is no longer running");
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control.send(SessionCommand::Shutdown);
            if handle.join().is_err() {
                warn!("analysis worker panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reports a growing drop total at most once per doubling.
#[derive(Debug, Default)]
struct DropReport {
    reported: u64,
}

impl DropReport {
    fn update(&mut self, total: u64) -> Option<u64> {
        if total == 0 || total < self.reported.saturating_mul(2).max(1) {
            return None;
        }
        self.reported = total;
        Some(total)
    }
}

fn run_worker(
    mut pipeline: PitchPipeline,
    chunks: Receiver<SampleChunk>,
    control: Receiver<SessionCommand>,
    publisher: DisplayPublisher,
    health: Option<CaptureHealth>,
) {
    let never = crossbeam_channel::never();
    let mut errors_open = health.is_some();
    let mut drops = DropReport::default();

    info!(
        sample_rate = pipeline.config().sample_rate,
        root_hz = pipeline.config().root_hz,
        prime_limit = pipeline.config().prime_limit,
        profile = pipeline.config().profile.name(),
        "analysis session started"
    );
    loop {
        let stream_errors = match &health {
            Some(health) if errors_open => health.errors(),
            _ => &never,
        };
        crossbeam_channel::select! {
            recv(chunks) -> msg => match msg {
                Ok(chunk) => {
                    if let Some(record) = pipeline.process_sample_chunk(&chunk) {
                        publisher.publish(record);
                    }
                    let total = health.as_ref().map_or(0, CaptureHealth::dropped_chunks);
                    if let Some(dropped) = drops.update(total) {
                        warn!(dropped, "analysis is behind, dropping input chunks");
                    }
                }
                Err(_) => {
                    debug!("capture channel closed");
                    break;
                }
            },
            recv(control) -> msg => match msg {
                Ok(SessionCommand::Reconfigure(config)) => {
                    if let Err(err) = pipeline.reconfigure(config) {
                        warn!(%err, "rejected configuration");
                    }
                }
                Ok(SessionCommand::Restart) => pipeline.restart(),
                Ok(SessionCommand::Shutdown) | Err(_) => break,
            },
            recv(stream_errors) -> msg => match msg {
                Ok(err) => warn!(%err, "an error occurred on the audio stream"),
                Err(_) => errors_open = false,
            },
        }
    }
    let dropped = health.as_ref().map_or(0, CaptureHealth::dropped_chunks);
    info!(dropped, "analysis session finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::display_slot;
    use std::time::Duration;

    fn chunks_of_tone(freq: f64, sample_rate: u32, total: usize, chunk: usize) -> Vec<SampleChunk> {
        let samples: Vec<f32> = (0..total)
            .map(|i| {
                (0.5 * (std::f64::consts::TAU * freq * i as f64 / sample_rate as f64).sin()) as f32
            })
            .collect();
        samples
            .chunks(chunk)
            .map(|c| SampleChunk {
                samples: c.to_vec(),
                sample_rate,
            })
            .collect()
    }

    #[test]
    fn publishes_records_for_incoming_audio() {
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(256);
        let (publisher, reader) = display_slot();
        let pipeline = PitchPipeline::new(PipelineConfig::new(48_000, 200.0, 5)).unwrap();
        let session = Session::spawn(pipeline, chunk_rx, publisher).unwrap();

        for chunk in chunks_of_tone(300.0, 48_000, 24_000, 480) {
            chunk_tx.send(chunk).unwrap();
        }
        let record = reader.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(record.ratio_text, "3/2");
        session.shutdown();
    }

    #[test]
    fn drop_reports_thin_out_as_the_total_doubles() {
        let mut drops = DropReport::default();
        let reported: Vec<u64> = (0..=40).filter_map(|total| drops.update(total)).collect();
        assert_eq!(reported, vec![1, 2, 4, 8, 16, 32]);
        assert_eq!(drops.update(40), None);
    }

    #[test]
    fn monitored_session_survives_stream_errors_and_drops() {
        let (recorder, health) = crate::audio::HealthRecorder::new();
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(256);
        let (publisher, reader) = display_slot();
        let pipeline = PitchPipeline::new(PipelineConfig::new(48_000, 200.0, 5)).unwrap();
        let session =
            Session::spawn_monitored(pipeline, chunk_rx, publisher, health.clone()).unwrap();

        recorder.stream_error(cpal::StreamError::DeviceNotAvailable);
        for _ in 0..3 {
            recorder.chunk_dropped();
        }
        drop(recorder);
        for chunk in chunks_of_tone(300.0, 48_000, 24_000, 480) {
            chunk_tx.send(chunk).unwrap();
        }
        let record = reader.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(record.ratio_text, "3/2");
        assert_eq!(health.dropped_chunks(), 3);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !health.errors().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(health.errors().is_empty());
        session.shutdown();
    }

    #[test]
    fn rejects_invalid_reconfiguration_up_front() {
        let (_chunk_tx, chunk_rx) = crossbeam_channel::bounded(1);
        let (publisher, _reader) = display_slot();
        let pipeline = PitchPipeline::new(PipelineConfig::default()).unwrap();
        let session = Session::spawn(pipeline, chunk_rx, publisher).unwrap();
        assert!(session.reconfigure(PipelineConfig::new(0, 220.0, 5)).is_err());
        assert!(session.reconfigure(PipelineConfig::new(44_100, 220.0, 7)).is_ok());
        session.restart();
        session.shutdown();
    }

    #[test]
    fn worker_exits_when_capture_closes() {
        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(1);
        let (publisher, _reader) = display_slot();
        let pipeline = PitchPipeline::new(PipelineConfig::default()).unwrap();
        let mut session = Session::spawn(pipeline, chunk_rx, publisher).unwrap();
        drop(chunk_tx);
        let handle = session.handle.take().unwrap();
        handle.join().unwrap();
    }
}
