//! # Fast Fourier Transform (FFT) Module
//!
//! Frequency-domain transforms for the spectral analyzer. Window sizes
//! change at run time, so plans come from a cached `FftPlanner` and the
//! scratch buffer grows to the largest size seen.
//!
//! ## Features
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal
//! - Forward and inverse transforms without per-call allocation once warm

use rustfft::{num_complex::Complex, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [Complex<f64>]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().map(|c| c.re).sum::<f64>() / len as f64;
    if avg.abs() > 1e-12 {
        for sample in signal.iter_mut() {
            sample.re -= avg;
        }
    }
}

/// Applies a periodic Hann window in place.
fn apply_hann_window(buffer: &mut [Complex<f64>]) {
    let n = buffer.len();
    if n == 0 {
        return;
    }
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos());
        sample.re *= multiplier;
    }
}

/// Planner plus reusable scratch space.
pub struct FftEngine {
    planner: FftPlanner<f64>,
    scratch: Vec<Complex<f64>>,
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftEngine")
            .field("scratch_len", &self.scratch.len())
            .finish()
    }
}

impl FftEngine {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            scratch: Vec::new(),
        }
    }

    /// Unnormalized forward transform in place.
    pub fn forward(&mut self, buffer: &mut [Complex<f64>]) {
        let fft = self.planner.plan_fft_forward(buffer.len());
        let needed = fft.get_inplace_scratch_len();
        if self.scratch.len() < needed {
            self.scratch.resize(needed, Complex::default());
        }
        fft.process_with_scratch(buffer, &mut self.scratch[..needed]);
    }

    /// Unnormalized inverse transform in place.
    pub fn inverse(&mut self, buffer: &mut [Complex<f64>]) {
        let fft = self.planner.plan_fft_inverse(buffer.len());
        let needed = fft.get_inplace_scratch_len();
        if self.scratch.len() < needed {
            self.scratch.resize(needed, Complex::default());
        }
        fft.process_with_scratch(buffer, &mut self.scratch[..needed]);
    }

    /// DC removal, Hann window, forward FFT. `out` is resized to the signal length.
    pub fn windowed_spectrum(&mut self, signal: &[f32], out: &mut Vec<Complex<f64>>) {
        out.clear();
        out.extend(signal.iter().map(|&s| Complex::new(s as f64, 0.0)));
        remove_dc_offset(out);
        apply_hann_window(out);
        self.forward(out);
    }
}

/// Magnitudes of the non-negative frequency half of a spectrum.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f64>], out: &mut Vec<f64>) {
    out.clear();
    out.extend(spectrum.iter().take(spectrum.len() / 2 + 1).map(|c| c.norm()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_peaks_at_its_bin() {
        let n = 1024;
        let signal: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 32.0 * i as f32 / n as f32).sin())
            .collect();
        let mut engine = FftEngine::new();
        let mut spectrum = Vec::new();
        let mut mags = Vec::new();
        engine.windowed_spectrum(&signal, &mut spectrum);
        spectrum_to_magnitudes(&spectrum, &mut mags);
        assert_eq!(mags.len(), n / 2 + 1);
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(32));
    }

    #[test]
    fn inverse_undoes_forward() {
        let mut engine = FftEngine::new();
        let original: Vec<Complex<f64>> = (0..64).map(|i| Complex::new(i as f64, 0.0)).collect();
        let mut buffer = original.clone();
        engine.forward(&mut buffer);
        engine.inverse(&mut buffer);
        for (a, b) in original.iter().zip(&buffer) {
            assert!((a.re - b.re / 64.0).abs() < 1e-9);
        }
    }
}
