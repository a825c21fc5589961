//! # Phase Refiner
//!
//! Sub-bin frequency from the phase advance of one FFT bin between two
//! consecutive hops, the same measurement a phase vocoder makes.

use std::f64::consts::{PI, TAU};

/// Last observation of the refinement bin.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PhaseTrack {
    bin: usize,
    phase: f64,
}

/// Sequential refiner. Needs two consecutive observations of the same bin.
#[derive(Debug, Clone)]
pub struct PhaseRefiner {
    sample_rate: f64,
    hop: usize,
    state: Option<PhaseTrack>,
}

impl PhaseRefiner {
    pub fn new(sample_rate: f64, hop: usize) -> Self {
        Self {
            sample_rate,
            hop,
            state: None,
        }
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Forgets the previous observation.
    pub fn clear(&mut self) {
        self.state = None;
    }

    /// Changes the hop length. Phase continuity does not survive a hop change,
    /// so the stored observation is dropped.
    pub fn set_hop(&mut self, hop: usize) {
        self.hop = hop;
        self.clear();
    }

    /// Records `(bin, phase)` and returns the fundamental implied by the
    /// phase advance since the previous hop, divided by `harmonic`.
    ///
    /// Returns `None` on the first observation and whenever the bin changed.
    pub fn observe(&mut self, bin: usize, phase: f64, fft_size: usize, harmonic: u32) -> Option<f64> {
        let previous = self.state.replace(PhaseTrack { bin, phase });
        let previous = previous.filter(|p| p.bin == bin)?;
        if fft_size == 0 || self.hop == 0 || harmonic == 0 || !phase.is_finite() {
            return None;
        }

        let n = fft_size as f64;
        let hop = self.hop as f64;
        let expected = TAU * bin as f64 * hop / n;
        let deviation = wrap_phase(phase - previous.phase - expected);
        let instantaneous_bin = bin as f64 + deviation * n / (TAU * hop);
        let hz = instantaneous_bin * self.sample_rate / n / harmonic as f64;

        (hz.is_finite() && hz > 0.0).then_some(hz)
    }
}

/// Wraps a phase into `(-PI, PI]`.
fn wrap_phase(phase: f64) -> f64 {
    let wrapped = (phase + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI { PI } else { wrapped }
}
