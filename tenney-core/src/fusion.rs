//! # Fusion & Fast-Acquire Controller
//!
//! Combines the per-hop estimates into one frequency. Normally the slow path
//! (tracking loop, optionally blended with a guarded harmonic fit) wins. When
//! the pipeline is young, or the slow path disagrees with a fresh measurement,
//! the controller snaps straight to the raw reference estimate for that hop.

use crate::config::InstrumentProfile;
use crate::tuning::relative_difference;

/// Pipeline age below which every hop fast-acquires, in seconds.
pub const STARTUP_SECONDS: f64 = 0.6;
/// Relative jump from the previous output that forces fast-acquire (~35 cents).
pub const JUMP_THRESHOLD: f64 = 0.02;
/// Relative disagreement with the reference that forces fast-acquire.
pub const REFERENCE_THRESHOLD: f64 = 0.03;
/// Normal-state output is clamped to the reference beyond this deviation.
pub const CLAMP_THRESHOLD: f64 = 0.08;
/// Smoother input confidence floor during fast-acquire.
pub const FAST_ACQUIRE_CONFIDENCE: f64 = 0.9;

/// Everything fusion needs from one hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionInput {
    /// Raw spectral reference estimate.
    pub reference_hz: f64,
    /// Tracking filter output.
    pub tracked_hz: f64,
    /// Harmonic fit f0 that already passed its guard.
    pub fit_hz: Option<f64>,
    pub confidence: f64,
    /// Seconds since the pipeline started running.
    pub elapsed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionDecision {
    pub hz: f64,
    /// Confidence to hand to the output smoother.
    pub confidence: f64,
    /// When set, the smoother must drop its history before this hop.
    pub fast_acquire: bool,
    /// Slow-path value for this hop, before any override.
    pub slow_hz: f64,
}

#[derive(Debug, Clone)]
pub struct FusionController {
    profile: InstrumentProfile,
    last_output: Option<f64>,
}

impl FusionController {
    pub fn new(profile: InstrumentProfile) -> Self {
        Self {
            profile,
            last_output: None,
        }
    }

    pub fn profile(&self) -> InstrumentProfile {
        self.profile
    }

    pub fn set_profile(&mut self, profile: InstrumentProfile) {
        self.profile = profile;
    }

    /// Weighted blend of the tracking output and the guarded fit.
    pub fn slow_path(&self, tracked_hz: f64, fit_hz: Option<f64>) -> f64 {
        match fit_hz {
            Some(fit) => {
                let (w_track, w_fit) = self.profile.blend_weights();
                w_track * tracked_hz + w_fit * fit
            }
            None => tracked_hz,
        }
    }

    /// Decides this hop's output. Evaluated fresh every hop.
    pub fn fuse(&mut self, input: FusionInput) -> FusionDecision {
        let slow_hz = self.slow_path(input.tracked_hz, input.fit_hz);
        let reference = input.reference_hz;

        let fast_acquire = input.elapsed < STARTUP_SECONDS
            || !slow_hz.is_finite()
            || self
                .last_output
                .is_none_or(|prev| relative_difference(slow_hz, prev) > JUMP_THRESHOLD)
            || relative_difference(slow_hz, reference) > REFERENCE_THRESHOLD;

        let decision = if fast_acquire {
            FusionDecision {
                hz: reference,
                confidence: input.confidence.max(FAST_ACQUIRE_CONFIDENCE),
                fast_acquire: true,
                slow_hz,
            }
        } else {
            let hz = if relative_difference(slow_hz, reference) > CLAMP_THRESHOLD {
                reference
            } else {
                slow_hz
            };
            FusionDecision {
                hz,
                confidence: input.confidence,
                fast_acquire: false,
                slow_hz,
            }
        };
        self.last_output = Some(decision.hz);
        decision
    }
}
