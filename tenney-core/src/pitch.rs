//! # Pitch Detection Module
//!
//! The two fundamental estimators behind the spectral analyzer:
//! - YIN on the time-domain window (the fast estimate), with the difference
//!   function computed through an FFT cross-correlation
//! - Peak picking on the magnitude spectrum with log-parabolic interpolation
//!   for sub-bin accuracy
//!
//! Both guard against silence and return `None` rather than a bogus value.

use rustfft::num_complex::Complex;

use crate::fft::FftEngine;

/// Below this RMS the window is treated as silence.
pub const AMPLITUDE_THRESHOLD: f64 = 1e-4;

/// YIN absolute threshold on the cumulative mean normalized difference.
const YIN_THRESHOLD: f64 = 0.15;

/// Fallback acceptance when no dip crosses the threshold.
const YIN_FALLBACK_THRESHOLD: f64 = 0.5;

/// A periodicity estimate from YIN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YinEstimate {
    pub frequency: f64,
    /// `1 - d'(tau)` at the chosen lag, in `[0, 1]`.
    pub periodicity: f64,
}

/// A spectral peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Integer bin of the local maximum.
    pub bin: usize,
    /// Interpolated fractional bin.
    pub position: f64,
    pub magnitude: f64,
}

/// YIN detector with reusable buffers.
#[derive(Debug, Default)]
pub struct YinDetector {
    head: Vec<Complex<f64>>,
    full: Vec<Complex<f64>>,
    prefix: Vec<f64>,
    cmnd: Vec<f64>,
}

impl YinDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detects the fundamental in `signal`, searching `[min_hz, max_hz]`.
    ///
    /// # Returns
    /// * `Some(estimate)` - Detected frequency and periodicity strength
    /// * `None` - Silence, no periodic dip, or a window too short for `min_hz`
    pub fn detect(
        &mut self,
        engine: &mut FftEngine,
        signal: &[f32],
        sample_rate: f64,
        min_hz: f64,
        max_hz: f64,
    ) -> Option<YinEstimate> {
        let n = signal.len();
        if n < 8 || sample_rate <= 0.0 {
            return None;
        }

        // --- Noise Gate ---
        let mean = signal.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
        let rms = (signal
            .iter()
            .map(|&s| (s as f64 - mean).powi(2))
            .sum::<f64>()
            / n as f64)
            .sqrt();
        if !rms.is_finite() || rms < AMPLITUDE_THRESHOLD {
            return None;
        }

        let tau_max = (n / 2).min((sample_rate / min_hz).ceil() as usize + 2);
        let tau_min = ((sample_rate / max_hz).floor() as usize).max(2);
        if tau_min + 2 >= tau_max {
            return None;
        }
        let width = n - tau_max;

        // --- Cross-correlation of the head window against the full frame ---
        self.head.clear();
        self.head.extend(
            signal
                .iter()
                .enumerate()
                .map(|(i, &s)| Complex::new(if i < width { s as f64 - mean } else { 0.0 }, 0.0)),
        );
        self.full.clear();
        self.full
            .extend(signal.iter().map(|&s| Complex::new(s as f64 - mean, 0.0)));
        engine.forward(&mut self.head);
        engine.forward(&mut self.full);
        for (h, f) in self.head.iter_mut().zip(&self.full) {
            *h = h.conj() * f;
        }
        engine.inverse(&mut self.head);

        self.prefix.clear();
        self.prefix.push(0.0);
        let mut acc = 0.0;
        for &s in signal {
            acc += (s as f64 - mean).powi(2);
            self.prefix.push(acc);
        }

        // --- Difference function and cumulative mean normalization ---
        let energy_head = self.prefix[width];
        self.cmnd.clear();
        self.cmnd.push(1.0);
        let mut running_sum = 0.0;
        for tau in 1..tau_max {
            let energy_lag = self.prefix[tau + width] - self.prefix[tau];
            let correlation = self.head[tau].re / n as f64;
            let diff = (energy_head + energy_lag - 2.0 * correlation).max(0.0);
            running_sum += diff;
            self.cmnd.push(if running_sum > 0.0 {
                diff * tau as f64 / running_sum
            } else {
                1.0
            });
        }

        // --- First dip below the threshold, walked down to its minimum ---
        let cmnd = &self.cmnd;
        let mut period = (tau_min..tau_max).find(|&tau| cmnd[tau] < YIN_THRESHOLD);
        if let Some(tau) = period.as_mut() {
            while *tau + 1 < tau_max && cmnd[*tau + 1] < cmnd[*tau] {
                *tau += 1;
            }
        } else {
            period = (tau_min..tau_max)
                .min_by(|&a, &b| cmnd[a].total_cmp(&cmnd[b]))
                .filter(|&tau| cmnd[tau] < YIN_FALLBACK_THRESHOLD);
        }
        let period = period?;
        if period + 1 >= tau_max {
            return None;
        }

        // --- Parabolic interpolation for sub-sample precision ---
        let y1 = cmnd[period - 1];
        let y2 = cmnd[period];
        let y3 = cmnd[period + 1];
        let denominator = y1 - 2.0 * y2 + y3;
        let period_float = if denominator.abs() > 1e-12 {
            let shift = (y1 - y3) / (2.0 * denominator);
            period as f64 + shift.clamp(-1.0, 1.0)
        } else {
            period as f64
        };

        let frequency = sample_rate / period_float;
        if frequency.is_finite() && frequency > 0.0 {
            Some(YinEstimate {
                frequency,
                periodicity: (1.0 - y2).clamp(0.0, 1.0),
            })
        } else {
            None
        }
    }
}

/// Offset in `(-0.5, 0.5]` of the true peak from `bin`, from the log magnitudes
/// of the bin and its two neighbors.
pub fn parabolic_offset(magnitudes: &[f64], bin: usize) -> f64 {
    if bin == 0 || bin + 1 >= magnitudes.len() {
        return 0.0;
    }
    let y1 = magnitudes[bin - 1].ln();
    let y2 = magnitudes[bin].ln();
    let y3 = magnitudes[bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return 0.0;
    }
    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-12 {
        return 0.0;
    }
    ((y3 - y1) / (2.0 * denominator)).clamp(-0.5, 0.5)
}

/// Finds the strongest local maximum within `radius` bins of `center`.
///
/// Only interior maxima (strictly above both neighbors) qualify, so a slope
/// running into the edge of the search range is not reported as a peak.
pub fn find_peak_near(magnitudes: &[f64], center: f64, radius: f64) -> Option<Peak> {
    if magnitudes.len() < 3 || !center.is_finite() || center < 0.0 {
        return None;
    }
    let last = magnitudes.len() - 2;
    let start = ((center - radius).floor().max(1.0)) as usize;
    let end = ((center + radius).ceil() as usize).min(last);
    if start > end {
        return None;
    }
    (start..=end)
        .filter(|&k| magnitudes[k] > magnitudes[k - 1] && magnitudes[k] >= magnitudes[k + 1])
        .max_by(|&a, &b| magnitudes[a].total_cmp(&magnitudes[b]))
        .map(|bin| Peak {
            bin,
            position: bin as f64 + parabolic_offset(magnitudes, bin),
            magnitude: magnitudes[bin],
        })
}

/// Strongest interior peak between two bins.
pub fn strongest_peak(magnitudes: &[f64], start: usize, end: usize) -> Option<Peak> {
    let center = (start + end) as f64 / 2.0;
    let radius = (end.saturating_sub(start)) as f64 / 2.0;
    find_peak_near(magnitudes, center, radius)
}

/// Median magnitude of the bins within `half_width` of `bin`, skipping the
/// `guard` bins closest to it.
pub fn local_noise_floor(magnitudes: &[f64], bin: usize, half_width: usize, guard: usize) -> f64 {
    let start = bin.saturating_sub(half_width).max(1);
    let end = (bin + half_width).min(magnitudes.len().saturating_sub(1));
    let mut values: Vec<f64> = (start..=end)
        .filter(|&k| k.abs_diff(bin) > guard)
        .map(|k| magnitudes[k])
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    values[values.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tone(freq: f64, sample_rate: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    #[test]
    fn yin_finds_a_sine() {
        let mut engine = FftEngine::new();
        let mut yin = YinDetector::new();
        let signal = tone(220.0, 48_000.0, 4096);
        let estimate = yin
            .detect(&mut engine, &signal, 48_000.0, 40.0, 2000.0)
            .unwrap();
        assert!((estimate.frequency - 220.0).abs() < 0.5, "{estimate:?}");
        assert!(estimate.periodicity > 0.9);
    }

    #[test]
    fn yin_prefers_fundamental_over_octave() {
        let mut engine = FftEngine::new();
        let mut yin = YinDetector::new();
        let signal: Vec<f32> = (0..4096)
            .map(|i| {
                let t = i as f64 / 48_000.0;
                let w = 2.0 * std::f64::consts::PI * 150.0 * t;
                (0.5 * w.sin() + 0.8 * (2.0 * w).sin() + 0.4 * (3.0 * w).sin()) as f32
            })
            .collect();
        let estimate = yin
            .detect(&mut engine, &signal, 48_000.0, 40.0, 2000.0)
            .unwrap();
        assert!((estimate.frequency - 150.0).abs() < 1.0, "{estimate:?}");
    }

    #[test]
    fn yin_rejects_silence() {
        let mut engine = FftEngine::new();
        let mut yin = YinDetector::new();
        let signal = vec![0.0f32; 2048];
        assert!(yin.detect(&mut engine, &signal, 48_000.0, 40.0, 2000.0).is_none());
    }

    #[test]
    fn peak_search_ignores_edge_slopes() {
        let mags = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(find_peak_near(&mags, 3.0, 2.0).is_none());
        let mags = [0.1, 0.2, 1.0, 4.0, 1.0, 0.2, 0.1];
        let peak = find_peak_near(&mags, 3.0, 2.0).unwrap();
        assert_eq!(peak.bin, 3);
        assert_abs_diff_eq!(peak.position, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn noise_floor_skips_guard_bins() {
        let mut mags = vec![1.0; 64];
        mags[32] = 100.0;
        mags[31] = 50.0;
        mags[33] = 50.0;
        assert_eq!(local_noise_floor(&mags, 32, 16, 2), 1.0);
    }
}
