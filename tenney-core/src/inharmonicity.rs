//! # Harmonic Inharmonicity Fitter
//!
//! Stiff strings and many real instruments place harmonic `k` slightly sharp
//! of `k * f0`. The usual model (Fletcher & Rossing) is
//!
//! ```text
//! f_k = k * f0 * sqrt(1 + B * k^2)
//! ```
//!
//! Squaring and dividing by `k^2` makes it linear in `k^2`:
//! `(f_k / k)^2 = f0^2 + f0^2 * B * k^2`, so an ordinary least-squares line
//! through `(k^2, (f_k/k)^2)` gives `f0 = sqrt(intercept)` and
//! `B = slope / intercept`.

use linreg::linear_regression;
use serde::{Deserialize, Serialize};

use crate::spectral::Partial;
use crate::tuning::relative_difference;

/// Need at least 3 points for a meaningful regression.
pub const MIN_PARTIALS: usize = 3;

/// Minimum goodness of fit before fusion may use the result.
pub const R2_THRESHOLD: f64 = 0.92;

/// The fitted f0 must lie this close to both the tracking output and the
/// raw reference, which rejects fits that locked onto a subharmonic.
pub const PROXIMITY: f64 = 0.06;

/// Partials further than this from `k * guess` are not used.
const MATCH_TOLERANCE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicFit {
    pub f0: f64,
    /// Inharmonicity coefficient `B`.
    pub beta: f64,
    /// Coefficient of determination of the predicted partial frequencies.
    pub r2: f64,
    pub partials_used: usize,
}

impl HarmonicFit {
    /// Fits `f0` and `B` to the partials that sit near multiples of `f0_guess`.
    ///
    /// Returns `None` with fewer than [`MIN_PARTIALS`] usable partials or a
    /// degenerate regression.
    pub fn fit(f0_guess: f64, partials: &[Partial]) -> Option<HarmonicFit> {
        if !f0_guess.is_finite() || f0_guess <= 0.0 {
            return None;
        }

        let usable: Vec<(f64, f64)> = partials
            .iter()
            .filter(|p| p.harmonic > 0 && p.frequency.is_finite() && p.frequency > 0.0)
            .map(|p| (p.harmonic as f64, p.frequency))
            .filter(|&(k, f)| relative_difference(f, k * f0_guess) <= MATCH_TOLERANCE)
            .collect();
        if usable.len() < MIN_PARTIALS {
            return None;
        }

        // x = k^2, y = (f_k / k)^2
        let (xs, ys): (Vec<f64>, Vec<f64>) = usable
            .iter()
            .map(|&(k, f)| (k * k, (f / k) * (f / k)))
            .unzip();
        let (slope, intercept) = linear_regression::<_, _, f64>(&xs, &ys).ok()?;
        if !(intercept.is_finite() && intercept > 1e-6) || !slope.is_finite() {
            return None;
        }

        let f0 = intercept.sqrt();
        let beta = slope / intercept;
        let mut fit = HarmonicFit {
            f0,
            beta,
            r2: 0.0,
            partials_used: usable.len(),
        };

        let mean = usable.iter().map(|&(_, f)| f).sum::<f64>() / usable.len() as f64;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for &(k, f) in &usable {
            let predicted = fit.partial_frequency(k);
            if !predicted.is_finite() {
                return None;
            }
            ss_res += (f - predicted).powi(2);
            ss_tot += (f - mean).powi(2);
        }
        if ss_tot <= 0.0 {
            return None;
        }
        fit.r2 = (1.0 - ss_res / ss_tot).clamp(0.0, 1.0);
        Some(fit)
    }

    /// Model frequency of harmonic `k`.
    pub fn partial_frequency(&self, k: f64) -> f64 {
        k * self.f0 * (1.0 + self.beta * k * k).sqrt()
    }

    /// Whether fusion may use this fit, given the tracking output and the raw
    /// reference estimate of the same hop.
    pub fn passes_guard(&self, tracked_hz: f64, reference_hz: f64) -> bool {
        self.r2 > R2_THRESHOLD
            && relative_difference(self.f0, tracked_hz) <= PROXIMITY
            && relative_difference(self.f0, reference_hz) <= PROXIMITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stiff_partials(f0: f64, beta: f64, harmonics: impl IntoIterator<Item = u32>) -> Vec<Partial> {
        harmonics
            .into_iter()
            .map(|k| {
                let kf = k as f64;
                Partial {
                    harmonic: k,
                    frequency: kf * f0 * (1.0 + beta * kf * kf).sqrt(),
                    snr_db: 40.0,
                }
            })
            .collect()
    }

    #[test]
    fn recovers_f0_and_beta() {
        let partials = stiff_partials(110.0, 4e-4, 1..=8);
        let fit = HarmonicFit::fit(110.5, &partials).unwrap();
        assert_relative_eq!(fit.f0, 110.0, max_relative = 1e-6);
        assert_relative_eq!(fit.beta, 4e-4, max_relative = 1e-4);
        assert!(fit.r2 > 0.999);
        assert_eq!(fit.partials_used, 8);
    }

    #[test]
    fn too_few_partials() {
        let partials = stiff_partials(110.0, 0.0, [1, 2]);
        assert!(HarmonicFit::fit(110.0, &partials).is_none());
    }

    #[test]
    fn far_partials_are_dropped() {
        let mut partials = stiff_partials(200.0, 0.0, 1..=4);
        partials.push(Partial {
            harmonic: 5,
            frequency: 1400.0,
            snr_db: 30.0,
        });
        let fit = HarmonicFit::fit(200.0, &partials).unwrap();
        assert_eq!(fit.partials_used, 4);
        assert_relative_eq!(fit.f0, 200.0, max_relative = 1e-9);
    }

    #[test]
    fn guard_rejects_subharmonic_lock() {
        // A 220 Hz tone whose partials were labeled as even harmonics of 110 Hz.
        let partials: Vec<Partial> = stiff_partials(220.0, 0.0, 1..=4)
            .into_iter()
            .map(|p| Partial {
                harmonic: p.harmonic * 2,
                ..p
            })
            .collect();
        let fit = HarmonicFit::fit(110.0, &partials).unwrap();
        assert_relative_eq!(fit.f0, 110.0, max_relative = 1e-9);
        assert!(fit.r2 > R2_THRESHOLD);
        assert!(!fit.passes_guard(220.0, 220.0));
        assert!(!fit.passes_guard(110.0, 220.0));
        assert!(fit.passes_guard(110.0, 112.0));
    }

    #[test]
    fn scatter_lowers_r2() {
        let clean = HarmonicFit::fit(100.0, &stiff_partials(100.0, 0.0, 1..=4)).unwrap();
        let scattered = vec![
            Partial { harmonic: 1, frequency: 100.0, snr_db: 30.0 },
            Partial { harmonic: 2, frequency: 219.0, snr_db: 30.0 },
            Partial { harmonic: 3, frequency: 271.0, snr_db: 30.0 },
            Partial { harmonic: 4, frequency: 435.0, snr_db: 30.0 },
        ];
        let noisy = HarmonicFit::fit(100.0, &scattered).unwrap();
        assert!(noisy.r2 < clean.r2);
        assert!((0.0..=1.0).contains(&noisy.r2));
    }
}
