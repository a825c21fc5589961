//! # Framing and Adaptive Windowing
//!
//! Owns the sample backlog. Windows of `frame_size` samples are read from the
//! front and the backlog advances by `hop = frame_size / 4` after each one.
//! The window length follows the played pitch so that a window holds roughly
//! eight periods, with hysteresis on both time and frequency.

use tracing::debug;

use crate::tuning::relative_difference;

pub const MIN_FRAME_SIZE: usize = 1024;
pub const MAX_FRAME_SIZE: usize = 16384;
pub const INITIAL_FRAME_SIZE: usize = 4096;

/// Periods of the fundamental a window should hold.
const TARGET_CYCLES: f64 = 8.0;
/// Smoothing factor of the stable pitch used for sizing.
const STABLE_ALPHA: f64 = 0.08;
/// Accepted hops that must pass between two resizes.
pub const RESIZE_MIN_HOPS: usize = 12;
/// Relative pitch change since the last resize needed for another one.
const RESIZE_MIN_CHANGE: f64 = 0.08;

/// A window-size change reported by [`Framer::observe_pitch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub frame_size: usize,
    pub hop: usize,
}

#[derive(Debug, Clone)]
pub struct Framer {
    sample_rate: f64,
    frame_size: usize,
    hop: usize,
    backlog: Vec<f32>,
    /// Absolute sample index of `backlog[0]`.
    offset: u64,
    hops: u64,
    /// Accepted hops since the last resize.
    accepted_since_resize: usize,
    stable_hz: Option<f64>,
    resize_hz: Option<f64>,
}

impl Framer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            frame_size: INITIAL_FRAME_SIZE,
            hop: INITIAL_FRAME_SIZE / 4,
            backlog: Vec::with_capacity(INITIAL_FRAME_SIZE * 2),
            offset: 0,
            hops: 0,
            accepted_since_resize: 0,
            stable_hz: None,
            resize_hz: None,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn stable_hz(&self) -> Option<f64> {
        self.stable_hz
    }

    /// Windows stepped past since the framer was created.
    pub fn hops(&self) -> u64 {
        self.hops
    }

    /// Samples waiting in the backlog.
    pub fn buffered(&self) -> usize {
        self.backlog.len()
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.backlog.extend_from_slice(samples);
    }

    /// The leading window, once enough samples are buffered.
    pub fn window(&self) -> Option<&[f32]> {
        self.backlog.get(..self.frame_size)
    }

    /// Absolute sample index one past the end of the current window.
    pub fn window_end(&self) -> u64 {
        self.offset + self.frame_size as u64
    }

    /// Seconds of input covered up to the end of the current window.
    pub fn window_end_seconds(&self) -> f64 {
        self.window_end() as f64 / self.sample_rate
    }

    /// Steps past the current window.
    pub fn advance(&mut self) {
        let step = self.hop.min(self.backlog.len());
        self.backlog.drain(..step);
        self.offset += step as u64;
        self.hops += 1;
    }

    /// Accepted hops since the last resize, or since the framer was created.
    pub fn accepted_since_resize(&self) -> usize {
        self.accepted_since_resize
    }

    /// Feeds the final pitch of an accepted hop into the sizing average and
    /// resizes the window when both hysteresis gates allow it.
    ///
    /// Call once per accepted hop. Windows stepped past without an estimate
    /// do not count toward the hop gate.
    pub fn observe_pitch(&mut self, hz: f64) -> Option<Resize> {
        if !(hz.is_finite() && hz > 0.0) {
            return None;
        }
        self.accepted_since_resize += 1;
        let stable = match self.stable_hz {
            Some(prev) => prev + STABLE_ALPHA * (hz - prev),
            None => hz,
        };
        self.stable_hz = Some(stable);

        if self.accepted_since_resize < RESIZE_MIN_HOPS {
            return None;
        }
        if self
            .resize_hz
            .is_some_and(|last| relative_difference(stable, last) < RESIZE_MIN_CHANGE)
        {
            return None;
        }
        let target = frame_size_for(self.sample_rate, stable);
        if target == self.frame_size {
            return None;
        }

        debug!(
            from = self.frame_size,
            to = target,
            stable_hz = stable,
            "resizing analysis window"
        );
        self.frame_size = target;
        self.hop = target / 4;
        self.accepted_since_resize = 0;
        self.resize_hz = Some(stable);

        let limit = self.frame_size + self.hop;
        if self.backlog.len() > limit {
            let excess = self.backlog.len() - limit;
            self.backlog.drain(..excess);
            self.offset += excess as u64;
        }
        Some(Resize {
            frame_size: self.frame_size,
            hop: self.hop,
        })
    }
}

/// Power of two nearest (in log2) to [`TARGET_CYCLES`] periods of `hz`,
/// clamped to the allowed window range.
pub fn frame_size_for(sample_rate: f64, hz: f64) -> usize {
    let min_exp = MIN_FRAME_SIZE.trailing_zeros() as f64;
    let max_exp = MAX_FRAME_SIZE.trailing_zeros() as f64;
    let ideal = TARGET_CYCLES * sample_rate / hz;
    let exp = if ideal.is_finite() && ideal > 0.0 {
        ideal.log2().round().clamp(min_exp, max_exp)
    } else {
        max_exp
    };
    1usize << exp as u32
}
