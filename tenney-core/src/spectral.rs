//! # Spectral Analyzer
//!
//! Turns one analysis window into a [`SpectralEstimate`]: two independent
//! fundamental candidates, a confidence, the bin used for phase refinement,
//! and the list of detected partials for the inharmonicity fit.

use rustfft::num_complex::Complex;

use crate::fft::{self, FftEngine};
use crate::pitch::{self, Peak, YinDetector};

/// Search range and detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerSettings {
    pub min_hz: f64,
    pub max_hz: f64,
    /// Highest harmonic index searched for partials.
    pub max_partials: u32,
    /// Minimum SNR for a partial to be reported.
    pub partial_snr_db: f64,
    /// Partials weaker than this relative to the strongest peak are ignored.
    pub partial_floor_db: f64,
    /// Only the first harmonics are considered for the refinement bin.
    pub refine_max_harmonic: u32,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            min_hz: 40.0,
            max_hz: 2000.0,
            max_partials: 12,
            partial_snr_db: 10.0,
            partial_floor_db: -60.0,
            refine_max_harmonic: 8,
        }
    }
}

/// One detected partial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partial {
    pub harmonic: u32,
    pub frequency: f64,
    pub snr_db: f64,
}

/// The bin handed to the phase refiner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementBin {
    pub bin: usize,
    /// Harmonic index of the partial occupying the bin (>= 1).
    pub harmonic: u32,
    pub snr_db: f64,
    /// FFT phase at `bin`, in radians.
    pub phase: f64,
}

/// Result of analyzing one window. Candidates may be NaN for degenerate input.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralEstimate {
    /// Time-domain (YIN) estimate.
    pub fast_f0: f64,
    /// Interpolated spectral peak of the fundamental.
    pub peak_freq: f64,
    pub confidence: f64,
    pub refine: Option<RefinementBin>,
    pub fft_size: usize,
    /// Ordered by harmonic index; absent harmonics are omitted.
    pub partials: Vec<Partial>,
}

impl SpectralEstimate {
    fn silent(fft_size: usize) -> Self {
        Self {
            fast_f0: f64::NAN,
            peak_freq: f64::NAN,
            confidence: 0.0,
            refine: None,
            fft_size,
            partials: Vec::new(),
        }
    }

    /// The raw reference estimate: the spectral peak, or the fast estimate
    /// when no peak was found.
    pub fn reference_hz(&self) -> Option<f64> {
        usable(self.peak_freq).or_else(|| usable(self.fast_f0))
    }

    /// The fast estimate, or the spectral peak when YIN found nothing.
    pub fn fast_hz(&self) -> Option<f64> {
        usable(self.fast_f0).or_else(|| usable(self.peak_freq))
    }
}

/// `Some(hz)` when `hz` is finite and positive.
pub fn usable(hz: f64) -> Option<f64> {
    (hz.is_finite() && hz > 0.0).then_some(hz)
}

/// Stateless apart from its reusable buffers.
#[derive(Debug, Default)]
pub struct SpectralAnalyzer {
    settings: AnalyzerSettings,
    engine: FftEngine,
    yin: YinDetector,
    spectrum: Vec<Complex<f64>>,
    magnitudes: Vec<f64>,
}

impl SpectralAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Analyzes one window. `prior_f0` resolves the fundamental when YIN fails.
    pub fn analyze(
        &mut self,
        window: &[f32],
        sample_rate: f64,
        prior_f0: Option<f64>,
    ) -> SpectralEstimate {
        let fft_size = window.len();
        if fft_size < 16 || sample_rate <= 0.0 {
            return SpectralEstimate::silent(fft_size);
        }
        let settings = self.settings;

        self.engine.windowed_spectrum(window, &mut self.spectrum);
        fft::spectrum_to_magnitudes(&self.spectrum, &mut self.magnitudes);
        let mags = &self.magnitudes;
        let bin_hz = sample_rate / fft_size as f64;

        // A Hann-windowed sine of amplitude A peaks at A * N / 4.
        let silence = pitch::AMPLITUDE_THRESHOLD * fft_size as f64 / 4.0;
        let global = match pitch::strongest_peak(mags, 1, mags.len() - 2) {
            Some(peak) if peak.magnitude >= silence => peak,
            _ => return SpectralEstimate::silent(fft_size),
        };

        let yin = self.yin.detect(
            &mut self.engine,
            window,
            sample_rate,
            settings.min_hz,
            settings.max_hz,
        );
        let fast_f0 = yin.map_or(f64::NAN, |y| y.frequency);
        let periodicity = yin.map_or(0.0, |y| y.periodicity);

        let hint = usable(fast_f0).or(prior_f0.and_then(usable));
        let peak_freq = match hint {
            Some(hz) => {
                let center = hz / bin_hz;
                pitch::find_peak_near(mags, center, (center * 0.03).max(2.0))
                    .map_or(f64::NAN, |peak| peak.position * bin_hz)
            }
            None => {
                let hz = global.position * bin_hz;
                if hz >= settings.min_hz && hz <= settings.max_hz {
                    hz
                } else {
                    f64::NAN
                }
            }
        };

        let found = match usable(peak_freq).or(usable(fast_f0)) {
            Some(f0) => self.find_partials(f0, bin_hz, global.magnitude),
            None => Vec::new(),
        };

        let refine = found
            .iter()
            .filter(|(partial, _)| partial.harmonic <= settings.refine_max_harmonic)
            .max_by(|a, b| a.1.magnitude.total_cmp(&b.1.magnitude))
            .map(|(partial, peak)| RefinementBin {
                bin: peak.bin,
                harmonic: partial.harmonic,
                snr_db: partial.snr_db,
                phase: self.spectrum[peak.bin].arg(),
            });

        let sharpness = refine.map_or(0.0, |r| ((r.snr_db - 6.0) / 30.0).clamp(0.0, 1.0));
        let confidence = (periodicity * sharpness).sqrt().clamp(0.0, 1.0);

        SpectralEstimate {
            fast_f0,
            peak_freq,
            confidence,
            refine,
            fft_size,
            partials: found.into_iter().map(|(partial, _)| partial).collect(),
        }
    }

    /// Searches each harmonic `k * f0` for a peak that clears both the
    /// absolute floor and the local SNR threshold.
    fn find_partials(&self, f0: f64, bin_hz: f64, strongest: f64) -> Vec<(Partial, Peak)> {
        let settings = &self.settings;
        let mags = &self.magnitudes;
        let f0_bin = f0 / bin_hz;
        let floor = strongest * 10f64.powf(settings.partial_floor_db / 20.0);
        let last_bin = mags.len().saturating_sub(3) as f64;

        let mut partials = Vec::new();
        for k in 1..=settings.max_partials {
            let center = k as f64 * f0_bin;
            if center > last_bin {
                break;
            }
            let radius = (center * 0.03).max(1.5).min(f0_bin * 0.4);
            let Some(peak) = pitch::find_peak_near(mags, center, radius) else {
                continue;
            };
            if peak.magnitude < floor {
                continue;
            }
            let noise = pitch::local_noise_floor(mags, peak.bin, 24, 3)
                .max(strongest * 1e-6)
                .max(f64::MIN_POSITIVE);
            let snr_db = 20.0 * (peak.magnitude / noise).log10();
            if snr_db < settings.partial_snr_db {
                continue;
            }
            partials.push((
                Partial {
                    harmonic: k,
                    frequency: peak.position * bin_hz,
                    snr_db,
                },
                peak,
            ));
        }
        partials
    }
}
