//! # Tracking Filter
//!
//! A PLL-style second-order loop: it keeps a frequency and a rate of change,
//! predicts one hop ahead, and corrects toward the measurement with a gain
//! that grows with confidence. At low confidence the loop coasts on its own
//! prediction instead of chasing noisy input.
//!
//! Gains are the critically damped pair `alpha = 1 - theta^2`,
//! `beta = (1 - theta)^2`, where `theta` is the double pole of the loop. A
//! prediction that runs past the measurement drops the rate term for that
//! hop, so a step settles from one side without ringing.

/// Loop pole at zero confidence (slowest).
const THETA_MAX: f64 = 0.97;
/// Loop pole at full confidence (fastest).
const THETA_MIN: f64 = 0.3;
/// Below this confidence the rate term is bled off each hop.
const COAST_CONFIDENCE: f64 = 0.3;
const RATE_DECAY: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
struct LoopState {
    hz: f64,
    /// Hz per second.
    rate: f64,
}

#[derive(Debug, Clone)]
pub struct TrackingFilter {
    /// Seconds per hop.
    dt: f64,
    state: Option<LoopState>,
}

impl TrackingFilter {
    /// Builds a filter for one hop length. A different hop needs a new filter.
    pub fn new(sample_rate: f64, hop: usize) -> Self {
        Self {
            dt: hop as f64 / sample_rate,
            state: None,
        }
    }

    /// Current output, if the loop has locked onto anything yet.
    pub fn current(&self) -> Option<f64> {
        self.state.map(|s| s.hz)
    }

    /// Feeds one measurement and returns the filtered frequency.
    ///
    /// Non-finite or non-positive measurements leave the loop untouched.
    pub fn update(&mut self, measured_hz: f64, confidence: f64) -> Option<f64> {
        if !measured_hz.is_finite() || measured_hz <= 0.0 {
            return self.current();
        }
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let Some(state) = self.state.as_mut() else {
            self.state = Some(LoopState {
                hz: measured_hz,
                rate: 0.0,
            });
            return Some(measured_hz);
        };

        let mut predicted = state.hz + state.rate * self.dt;
        let mut residual = measured_hz - predicted;
        if state.rate * residual < 0.0 {
            // Overshooting prediction: correct from the last output instead.
            state.rate = 0.0;
            predicted = state.hz;
            residual = measured_hz - predicted;
        }
        let theta = THETA_MAX - (THETA_MAX - THETA_MIN) * confidence;
        let alpha = 1.0 - theta * theta;
        let beta = (1.0 - theta) * (1.0 - theta);

        state.hz = predicted + alpha * residual;
        state.rate += beta * residual / self.dt;
        if confidence < COAST_CONFIDENCE {
            state.rate *= RATE_DECAY;
        }
        if !(state.hz.is_finite() && state.hz > 0.0) {
            *state = LoopState {
                hz: measured_hz,
                rate: 0.0,
            };
        }
        Some(state.hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_measurement_passes_through() {
        let mut filter = TrackingFilter::new(48_000.0, 512);
        assert_eq!(filter.current(), None);
        assert_eq!(filter.update(220.0, 0.5), Some(220.0));
    }

    #[test]
    fn converges_on_constant_input() {
        let mut filter = TrackingFilter::new(48_000.0, 512);
        filter.update(200.0, 1.0);
        let mut out = 0.0;
        for _ in 0..40 {
            out = filter.update(220.0, 1.0).unwrap();
        }
        assert!((out - 220.0).abs() < 0.1, "{out}");
    }

    #[test]
    fn confidence_speeds_convergence() {
        let mut confident = TrackingFilter::new(48_000.0, 512);
        let mut doubtful = TrackingFilter::new(48_000.0, 512);
        confident.update(200.0, 1.0);
        doubtful.update(200.0, 0.1);
        let fast = confident.update(300.0, 1.0).unwrap();
        let slow = doubtful.update(300.0, 0.1).unwrap();
        assert!(fast - 200.0 > slow - 200.0);
        assert!(slow < 220.0);
    }

    #[test]
    fn output_moves_without_jumps() {
        let mut filter = TrackingFilter::new(48_000.0, 1024);
        let mut previous = filter.update(220.0, 0.9).unwrap();
        for _ in 0..30 {
            let next = filter.update(330.0, 0.9).unwrap();
            // Each hop covers only part of the remaining distance.
            assert!(next >= previous);
            assert!(next - previous < 110.0);
            previous = next;
        }
        assert!((previous - 330.0).abs() < 0.01);
    }

    #[test]
    fn steps_settle_without_overshoot() {
        for hop in [256, 1024, 4096] {
            for confidence in [1.0, 0.8, 0.5, 0.25, 0.05] {
                for (from, to) in [(220.0, 330.0), (330.0, 220.0), (110.0, 880.0)] {
                    let mut filter = TrackingFilter::new(48_000.0, hop);
                    for _ in 0..10 {
                        filter.update(from, confidence);
                    }
                    for _ in 0..200 {
                        let hz = filter.update(to, confidence).unwrap();
                        let past = if to > from { hz - to } else { to - hz };
                        assert!(
                            past <= to * 0.005,
                            "{from} -> {to} at confidence {confidence}, hop {hop}: {hz}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn follows_a_glide() {
        let hop = 512;
        let dt = hop as f64 / 48_000.0;
        let mut filter = TrackingFilter::new(48_000.0, hop);
        let target = |k: usize| 220.0 * 2f64.powf(k as f64 * dt / 3.0);
        let mut hz = 0.0;
        for k in 0..200 {
            hz = filter.update(target(k), 0.9).unwrap();
        }
        assert!((hz - target(199)).abs() < 0.5, "{hz}");
    }

    #[test]
    fn ignores_non_finite_measurements() {
        let mut filter = TrackingFilter::new(48_000.0, 512);
        filter.update(220.0, 1.0);
        assert_eq!(filter.update(f64::NAN, 1.0), Some(220.0));
        assert_eq!(filter.update(-5.0, 1.0), Some(220.0));
    }
}
