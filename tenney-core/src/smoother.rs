//! # Output Smoother
//!
//! Last stage before display. Smooths in the log-frequency domain with a
//! responsiveness that follows a running confidence, and snaps when the
//! nearest tempered note jumps by more than a semitone.

use crate::tuning;

/// Smallest and largest smoothing factor.
const ALPHA_FLOOR: f64 = 0.2;
const ALPHA_SPAN: f64 = 0.6;
/// Weight of the newest confidence in the running accumulator.
const CONFIDENCE_WEIGHT: f64 = 0.3;
/// Tempered-index change that counts as a discrete jump.
const JUMP_STEPS: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
struct SmootherState {
    hz: f64,
    confidence: f64,
    index: i32,
}

#[derive(Debug, Clone, Default)]
pub struct OutputSmoother {
    state: Option<SmootherState>,
}

impl OutputSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all history; the next update passes through unchanged.
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn current(&self) -> Option<f64> {
        self.state.map(|s| s.hz)
    }

    /// Consumes one hop's fused frequency and returns the display frequency.
    pub fn update(&mut self, hz: f64, confidence: f64) -> Option<f64> {
        let index = tuning::tempered_index(hz)?;
        let confidence = confidence.clamp(0.0, 1.0);

        let next = match self.state {
            Some(prev) if (index - prev.index).abs() < JUMP_STEPS => {
                let acc = (1.0 - CONFIDENCE_WEIGHT) * prev.confidence + CONFIDENCE_WEIGHT * confidence;
                let alpha = ALPHA_FLOOR + ALPHA_SPAN * acc;
                let smoothed = prev.hz * (hz / prev.hz).powf(alpha);
                SmootherState {
                    hz: smoothed,
                    confidence: acc,
                    index: tuning::tempered_index(smoothed).unwrap_or(index),
                }
            }
            _ => SmootherState {
                hz,
                confidence,
                index,
            },
        };
        self.state = Some(next);
        Some(next.hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_passes_through() {
        let mut smoother = OutputSmoother::new();
        assert_eq!(smoother.update(220.0, 0.2), Some(220.0));
    }

    #[test]
    fn small_moves_are_smoothed() {
        let mut smoother = OutputSmoother::new();
        smoother.update(220.0, 1.0);
        let out = smoother.update(222.0, 1.0).unwrap();
        assert!(out > 220.0 && out < 222.0);
    }

    #[test]
    fn confidence_controls_responsiveness() {
        let mut sure = OutputSmoother::new();
        let mut unsure = OutputSmoother::new();
        sure.update(220.0, 1.0);
        unsure.update(220.0, 0.0);
        let a = sure.update(222.0, 1.0).unwrap();
        let b = unsure.update(222.0, 0.0).unwrap();
        assert!(a > b);
    }

    #[test]
    fn large_jump_snaps() {
        let mut smoother = OutputSmoother::new();
        smoother.update(220.0, 1.0);
        assert_eq!(smoother.update(330.0, 0.1), Some(330.0));
    }

    #[test]
    fn reset_discards_history() {
        let mut smoother = OutputSmoother::new();
        smoother.update(220.0, 1.0);
        smoother.reset();
        assert_eq!(smoother.current(), None);
        assert_eq!(smoother.update(225.0, 0.5), Some(225.0));
    }

    #[test]
    fn rejects_unusable_input() {
        let mut smoother = OutputSmoother::new();
        assert_eq!(smoother.update(f64::NAN, 1.0), None);
        assert_eq!(smoother.update(0.0, 1.0), None);
    }
}
