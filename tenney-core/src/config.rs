//! # Pipeline Configuration
//!
//! Everything the pipeline reads but does not own: sample rate, root
//! frequency, prime limit and the instrument profile used by fusion.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Middle C, the default root.
pub const DEFAULT_ROOT_HZ: f64 = 261.625_565;
pub const DEFAULT_PRIME_LIMIT: u32 = 5;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

fn default_root_hz() -> f64 {
    DEFAULT_ROOT_HZ
}

fn default_prime_limit() -> u32 {
    DEFAULT_PRIME_LIMIT
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

/// Expected harmonic stability of the source, selecting the slow-path blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentProfile {
    /// Bowed/plucked strings and keyboards: stable partials, trust the fit more.
    #[default]
    Strings,
    /// Voice and winds: partials wander, lean on the tracking loop.
    Voice,
    /// Microtonal work where a subharmonic lock would be mistaken for a ratio.
    Microtonal,
}

impl InstrumentProfile {
    pub const ALL: [InstrumentProfile; 3] = [
        InstrumentProfile::Strings,
        InstrumentProfile::Voice,
        InstrumentProfile::Microtonal,
    ];

    /// Blend weights `(tracking, fit)` for the slow path. Tracking is always >= 0.6.
    pub fn blend_weights(self) -> (f64, f64) {
        match self {
            InstrumentProfile::Strings => (0.6, 0.4),
            InstrumentProfile::Voice => (0.8, 0.2),
            InstrumentProfile::Microtonal => (0.8, 0.2),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InstrumentProfile::Strings => "strings",
            InstrumentProfile::Voice => "voice",
            InstrumentProfile::Microtonal => "microtonal",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.name().eq_ignore_ascii_case(name))
    }
}

/// Configuration handed to [`crate::pipeline::PitchPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capture sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Reference frequency that `1/1` maps to.
    #[serde(default = "default_root_hz")]
    pub root_hz: f64,
    /// Largest prime allowed in a ratio's numerator or denominator.
    #[serde(default = "default_prime_limit")]
    pub prime_limit: u32,
    #[serde(default)]
    pub profile: InstrumentProfile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            root_hz: DEFAULT_ROOT_HZ,
            prime_limit: DEFAULT_PRIME_LIMIT,
            profile: InstrumentProfile::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new(sample_rate: u32, root_hz: f64, prime_limit: u32) -> Self {
        Self {
            sample_rate,
            root_hz,
            prime_limit,
            profile: InstrumentProfile::default(),
        }
    }

    pub fn with_profile(mut self, profile: InstrumentProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Checks the values a running pipeline cannot recover from.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_rate == 0 {
            return Err(PipelineError::InvalidSampleRate(self.sample_rate));
        }
        if !self.root_hz.is_finite() || self.root_hz <= 0.0 {
            return Err(PipelineError::InvalidRootHz(self.root_hz));
        }
        if self.prime_limit == 0 {
            return Err(PipelineError::InvalidPrimeLimit(self.prime_limit));
        }
        Ok(())
    }
}
