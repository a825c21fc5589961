// tenney-core/src/lib.rs

//! The core logic for the Tenney just-intonation pitch tracker.
//! This crate is responsible for audio capture, pitch tracking and the
//! rational (prime-limited) description of the tracked pitch. It is
//! completely headless and contains no presentation code.

use serde::{Deserialize, Serialize};

pub mod audio;
pub mod config;
pub mod display;
pub mod error;
pub mod fft;
pub mod framing;
pub mod fusion;
pub mod inharmonicity;
pub mod phase;
pub mod pipeline;
pub mod pitch;
pub mod ratio;
pub mod session;
pub mod smoother;
pub mod spectral;
pub mod tracking;
pub mod tuning;

pub use config::{InstrumentProfile, PipelineConfig};
pub use error::{CaptureError, PipelineError};
pub use pipeline::{HopTrace, PitchPipeline};
pub use ratio::{nearest_with_neighbors, Monzo, Ratio, RatioLookupResult};

/// A block of mono samples as delivered by the capture callback.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// What the presentation side shows for one analyzed hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayRecord {
    /// Nearest ratio to the root, e.g. `"3/2"`.
    pub ratio_text: String,
    /// Deviation of the pitch from that ratio in cents.
    pub cents: f64,
    /// Smoothed pitch in Hz.
    pub hz: f64,
    /// Analysis confidence in `[0, 1]`.
    pub confidence: f64,
    /// Next candidate ratio below.
    pub lower_text: String,
    /// Next candidate ratio above.
    pub higher_text: String,
}
