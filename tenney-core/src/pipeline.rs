//! # Pitch Pipeline
//!
//! [`PitchPipeline`] owns every piece of per-session DSP state and turns raw
//! sample chunks into [`DisplayRecord`]s. Each hop runs, strictly in order:
//!
//! 1. spectral analysis of the current window
//! 2. phase refinement of the strongest low partial
//! 3. the tracking loop
//! 4. the guarded inharmonicity fit
//! 5. fusion with fast-acquire override
//! 6. output smoothing
//! 7. the ratio lookup against the configured root and prime limit
//!
//! A hop with no usable estimate produces nothing and leaves the display as
//! it was.

use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::framing::{Framer, INITIAL_FRAME_SIZE};
use crate::fusion::{FusionController, FusionInput};
use crate::inharmonicity::HarmonicFit;
use crate::phase::PhaseRefiner;
use crate::ratio;
use crate::smoother::OutputSmoother;
use crate::spectral::{SpectralAnalyzer, SpectralEstimate};
use crate::tracking::TrackingFilter;
use crate::tuning::relative_difference;
use crate::{DisplayRecord, SampleChunk};

/// Hops below this confidence are not reported.
const MIN_CONFIDENCE: f64 = 0.2;
/// The phase-refined value is used only above this confidence...
const REFINE_MIN_CONFIDENCE: f64 = 0.6;
/// ...and this refinement-bin SNR.
const REFINE_MIN_SNR_DB: f64 = 8.0;
/// Weight of the fast estimate when blending with the refined one.
const REFINE_FAST_WEIGHT: f64 = 0.7;
/// A refined value further than this from the fast estimate is discarded.
const REFINE_MAX_DEVIATION: f64 = 0.03;

/// What happened on the most recent reported hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HopTrace {
    /// Zero-based index of the analyzed window.
    pub hop_index: u64,
    /// Pipeline age at the end of the analyzed window, in seconds.
    pub elapsed: f64,
    pub frame_size: usize,
    pub reference_hz: f64,
    pub tracked_hz: f64,
    pub fused_hz: f64,
    pub smoothed_hz: f64,
    pub confidence: f64,
    pub fast_acquire: bool,
    pub fit_used: bool,
}

/// Position of a window within the session.
#[derive(Debug, Clone, Copy)]
struct HopClock {
    index: u64,
    elapsed: f64,
}

/// Lifecycle of the DSP state.
#[derive(Debug)]
pub enum PipelineState {
    Uninitialized,
    Running(Box<RunningState>),
}

/// Everything created when the first samples arrive and dropped on restart.
#[derive(Debug)]
pub struct RunningState {
    sample_rate: f64,
    framer: Framer,
    analyzer: SpectralAnalyzer,
    refiner: PhaseRefiner,
    tracker: TrackingFilter,
    fusion: FusionController,
    smoother: OutputSmoother,
    last_hop: Option<HopTrace>,
}

impl RunningState {
    fn new(config: &PipelineConfig) -> Self {
        let sample_rate = config.sample_rate as f64;
        let framer = Framer::new(config.sample_rate);
        let hop = framer.hop();
        Self {
            sample_rate,
            framer,
            analyzer: SpectralAnalyzer::default(),
            refiner: PhaseRefiner::new(sample_rate, hop),
            tracker: TrackingFilter::new(sample_rate, hop),
            fusion: FusionController::new(config.profile),
            smoother: OutputSmoother::new(),
            last_hop: None,
        }
    }

    /// Runs every hop the backlog allows. Returns the last record produced.
    fn run(&mut self, config: &PipelineConfig) -> Option<DisplayRecord> {
        let mut latest = None;
        while let Some(window) = self.framer.window() {
            let clock = HopClock {
                index: self.framer.hops(),
                elapsed: self.framer.window_end_seconds(),
            };
            let estimate = self
                .analyzer
                .analyze(window, self.sample_rate, self.smoother.current());
            self.framer.advance();
            if let Some(record) = self.hop(&estimate, clock, config) {
                latest = Some(record);
            }
        }
        latest
    }

    fn hop(
        &mut self,
        estimate: &SpectralEstimate,
        clock: HopClock,
        config: &PipelineConfig,
    ) -> Option<DisplayRecord> {
        let elapsed = clock.elapsed;
        let refined = match estimate.refine {
            Some(bin) => self
                .refiner
                .observe(bin.bin, bin.phase, estimate.fft_size, bin.harmonic)
                .filter(|_| {
                    estimate.confidence >= REFINE_MIN_CONFIDENCE && bin.snr_db >= REFINE_MIN_SNR_DB
                }),
            None => {
                self.refiner.clear();
                None
            }
        };

        let confidence = estimate.confidence;
        let (Some(reference), Some(fast)) = (estimate.reference_hz(), estimate.fast_hz()) else {
            trace!(elapsed, "no estimate this hop");
            return None;
        };
        if confidence < MIN_CONFIDENCE {
            trace!(elapsed, confidence, "hop below confidence floor");
            return None;
        }

        let measured = match refined {
            Some(refined) if relative_difference(refined, fast) <= REFINE_MAX_DEVIATION => {
                REFINE_FAST_WEIGHT * fast + (1.0 - REFINE_FAST_WEIGHT) * refined
            }
            _ => fast,
        };
        let tracked = self.tracker.update(measured, confidence)?;

        let fit = HarmonicFit::fit(reference, &estimate.partials)
            .filter(|fit| fit.passes_guard(tracked, reference))
            .map(|fit| fit.f0);

        let decision = self.fusion.fuse(FusionInput {
            reference_hz: reference,
            tracked_hz: tracked,
            fit_hz: fit,
            confidence,
            elapsed,
        });
        if decision.fast_acquire {
            trace!(elapsed, reference, slow = decision.slow_hz, "fast acquire");
            self.smoother.reset();
        }
        let smoothed = self.smoother.update(decision.hz, decision.confidence)?;

        self.last_hop = Some(HopTrace {
            hop_index: clock.index,
            elapsed,
            frame_size: estimate.fft_size,
            reference_hz: reference,
            tracked_hz: tracked,
            fused_hz: decision.hz,
            smoothed_hz: smoothed,
            confidence,
            fast_acquire: decision.fast_acquire,
            fit_used: fit.is_some(),
        });

        if let Some(resize) = self.framer.observe_pitch(smoothed) {
            self.refiner.set_hop(resize.hop);
            self.tracker = TrackingFilter::new(self.sample_rate, resize.hop);
        }

        let lookup = ratio::nearest_with_neighbors(smoothed, config.root_hz, config.prime_limit)?;
        Some(DisplayRecord {
            ratio_text: lookup.main.to_string(),
            cents: lookup.cents,
            hz: smoothed,
            confidence,
            lower_text: lookup.lower.to_string(),
            higher_text: lookup.higher.to_string(),
        })
    }
}

/// The analysis pipeline for one capture session.
#[derive(Debug)]
pub struct PitchPipeline {
    config: PipelineConfig,
    state: PipelineState,
}

impl PitchPipeline {
    /// Validates `config` and builds an idle pipeline.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            state: PipelineState::Uninitialized,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, PipelineState::Running(_))
    }

    /// Current analysis window length.
    pub fn frame_size(&self) -> usize {
        match &self.state {
            PipelineState::Running(running) => running.framer.frame_size(),
            PipelineState::Uninitialized => INITIAL_FRAME_SIZE,
        }
    }

    /// Trace of the last hop that reached the smoother.
    pub fn last_hop(&self) -> Option<&HopTrace> {
        match &self.state {
            PipelineState::Running(running) => running.last_hop.as_ref(),
            PipelineState::Uninitialized => None,
        }
    }

    /// Appends `samples` and processes every complete window.
    ///
    /// Returns the record of the last hop that produced one.
    pub fn process_chunk(&mut self, samples: &[f32]) -> Option<DisplayRecord> {
        let Self { config, state } = self;
        if let PipelineState::Uninitialized = state {
            debug!(sample_rate = config.sample_rate, "pipeline starting");
            *state = PipelineState::Running(Box::new(RunningState::new(config)));
        }
        let PipelineState::Running(running) = state else {
            return None;
        };
        running.framer.push(samples);
        running.run(config)
    }

    /// Like [`Self::process_chunk`], restarting first when the chunk's sample
    /// rate differs from the configured one.
    pub fn process_sample_chunk(&mut self, chunk: &SampleChunk) -> Option<DisplayRecord> {
        if chunk.sample_rate == 0 {
            return None;
        }
        if chunk.sample_rate != self.config.sample_rate {
            debug!(
                from = self.config.sample_rate,
                to = chunk.sample_rate,
                "sample rate changed"
            );
            self.config.sample_rate = chunk.sample_rate;
            self.restart();
        }
        self.process_chunk(&chunk.samples)
    }

    /// Applies a new configuration.
    ///
    /// A new sample rate restarts the pipeline. Root, prime limit and profile
    /// take effect from the next hop.
    pub fn reconfigure(&mut self, config: PipelineConfig) -> Result<(), PipelineError> {
        config.validate()?;
        let restart = config.sample_rate != self.config.sample_rate;
        if let PipelineState::Running(running) = &mut self.state {
            running.fusion.set_profile(config.profile);
        }
        self.config = config;
        if restart {
            self.restart();
        }
        Ok(())
    }

    /// Drops all DSP state. The next chunk starts a fresh session.
    pub fn restart(&mut self) {
        if self.is_running() {
            debug!("pipeline restart");
        }
        self.state = PipelineState::Uninitialized;
    }
}
