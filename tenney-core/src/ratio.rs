//! # Ratio Solver
//!
//! Maps a frequency, relative to a root, onto the nearest just-intonation
//! ratio whose numerator and denominator contain no prime larger than the
//! configured limit.
//!
//! ## Candidate tables
//! For every supported limit the reduced fractions `p/q` in `[1, 2)` with a
//! Tenney height `log2(p*q)` of at most [`MAX_TENNEY_HEIGHT`] are generated
//! once and shared read-only between all callers. Lookups are a binary search
//! over the table and never allocate.

use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Primes a ratio may contain. Limits above 31 are treated as 31.
pub const PRIMES: [u64; 11] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31];

/// Complexity bound for candidate ratios.
pub const MAX_TENNEY_HEIGHT: f64 = 14.0;
const MAX_PRODUCT: u64 = 1 << 14;

/// Inputs further than this many octaves from the root are not folded.
const MAX_OCTAVES: i32 = 40;

/// Cents differences below this are considered ties.
const TIE_EPSILON_CENTS: f64 = 1e-9;

/// A just-intonation ratio relative to the root.
///
/// `p/q` is the reduced, unfolded ratio (`3/1`, `3/4`, ...). `octave` is the
/// number of octave folds that bring it into `[1, 2)`:
/// `1 <= p/q * 2^-octave < 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub p: u64,
    pub q: u64,
    pub octave: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseRatioError {
    #[error("expected a ratio like 3/2, got {0:?}")]
    Malformed(String),
    #[error("ratio terms must be positive")]
    ZeroTerm,
}

impl Ratio {
    /// Reduces `p/q` and computes its fold count. `None` for a zero term.
    pub fn new(p: u64, q: u64) -> Option<Ratio> {
        if p == 0 || q == 0 {
            return None;
        }
        let g = gcd(p, q);
        let (p, q) = (p / g, q / g);
        // floor(log2(p/q)) from bit lengths, then fix up by one if needed.
        let mut octave = (63 - p.leading_zeros() as i32) - (63 - q.leading_zeros() as i32);
        if !in_octave(p, q, octave) {
            octave -= 1;
        }
        Some(Ratio { p, q, octave })
    }

    pub fn unison() -> Ratio {
        Ratio { p: 1, q: 1, octave: 0 }
    }

    /// Builds a ratio from a folded fraction in `[1, 2)` plus a fold count.
    fn from_folded(fp: u64, fq: u64, octave: i32) -> Option<Ratio> {
        let (p, q) = if octave >= 0 {
            (fp.checked_mul(1u64.checked_shl(octave as u32)?)?, fq)
        } else {
            (fp, fq.checked_mul(1u64.checked_shl(octave.unsigned_abs())?)?)
        };
        let g = gcd(p, q);
        Some(Ratio {
            p: p / g,
            q: q / g,
            octave,
        })
    }

    pub fn value(&self) -> f64 {
        self.p as f64 / self.q as f64
    }

    /// Size of the ratio in cents, including its octaves.
    pub fn cents(&self) -> f64 {
        1200.0 * self.value().log2()
    }

    /// The ratio folded into `[1, 2)` as `(numerator, denominator)`.
    pub fn folded(&self) -> (u64, u64) {
        let (mut p, mut q) = (self.p as u128, self.q as u128);
        if self.octave >= 0 {
            q <<= self.octave;
        } else {
            p <<= self.octave.unsigned_abs();
        }
        let g = gcd128(p, q);
        ((p / g) as u64, (q / g) as u64)
    }

    /// `log2(p * q)`: smaller is simpler.
    pub fn tenney_height(&self) -> f64 {
        (self.p as f64).log2() + (self.q as f64).log2()
    }

    /// Largest prime factor of `p` or `q` (1 for unison).
    pub fn largest_prime(&self) -> u64 {
        largest_prime_factor(self.p).max(largest_prime_factor(self.q))
    }

    /// The interval that takes `self` to `other`, i.e. `other / self`.
    pub fn interval_to(&self, other: &Ratio) -> Option<Ratio> {
        Ratio::new(other.p.checked_mul(self.q)?, other.q.checked_mul(self.p)?)
    }

    /// Signed distance from `self` to `other` in cents.
    pub fn cents_to(&self, other: &Ratio) -> f64 {
        other.cents() - self.cents()
    }

    /// Prime-exponent vector, or `None` if a factor exceeds 31.
    pub fn monzo(&self) -> Option<Monzo> {
        Monzo::from_ratio(self)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.p, self.q)
    }
}

impl FromStr for Ratio {
    type Err = ParseRatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseRatioError::Malformed(s.to_string());
        let (p, q) = match s.trim().split_once('/') {
            Some((p, q)) => (p.trim(), q.trim()),
            None => (s.trim(), "1"),
        };
        let p: u64 = p.parse().map_err(|_| malformed())?;
        let q: u64 = q.parse().map_err(|_| malformed())?;
        Ratio::new(p, q).ok_or(ParseRatioError::ZeroTerm)
    }
}

/// Distance between two ratios in cents (`b` relative to `a`).
pub fn cents_between(a: &Ratio, b: &Ratio) -> f64 {
    a.cents_to(b)
}

/// A ratio as exponents of [`PRIMES`], trailing zeros removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Monzo {
    exponents: Vec<i32>,
}

impl Monzo {
    pub fn from_ratio(ratio: &Ratio) -> Option<Monzo> {
        let mut exponents = vec![0i32; PRIMES.len()];
        let (mut p, mut q) = (ratio.p, ratio.q);
        for (i, &prime) in PRIMES.iter().enumerate() {
            while p % prime == 0 {
                p /= prime;
                exponents[i] += 1;
            }
            while q % prime == 0 {
                q /= prime;
                exponents[i] -= 1;
            }
        }
        if p != 1 || q != 1 {
            return None;
        }
        while exponents.last() == Some(&0) {
            exponents.pop();
        }
        Some(Monzo { exponents })
    }

    pub fn exponents(&self) -> &[i32] {
        &self.exponents
    }

    pub fn to_ratio(&self) -> Option<Ratio> {
        let (mut p, mut q) = (1u64, 1u64);
        for (&prime, &exp) in PRIMES.iter().zip(&self.exponents) {
            let factor = prime.checked_pow(exp.unsigned_abs())?;
            if exp > 0 {
                p = p.checked_mul(factor)?;
            } else {
                q = q.checked_mul(factor)?;
            }
        }
        Ratio::new(p, q)
    }
}

impl fmt::Display for Monzo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, exp) in self.exponents.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", exp)?;
        }
        write!(f, "\u{27e9}")
    }
}

/// The nearest ratio to a frequency and its immediate neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioLookupResult {
    pub main: Ratio,
    pub lower: Ratio,
    pub higher: Ratio,
    /// Deviation of the input from `main`, in cents.
    pub cents: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    p: u64,
    q: u64,
    cents: f64,
    height: f64,
}

static TABLES: Lazy<Vec<OnceCell<Vec<Candidate>>>> =
    Lazy::new(|| PRIMES.iter().map(|_| OnceCell::new()).collect());

/// Candidate table for a prime limit, built on first use.
fn candidates(prime_limit: u32) -> &'static [Candidate] {
    let index = PRIMES
        .iter()
        .rposition(|&p| p <= prime_limit as u64)
        .unwrap_or(0);
    TABLES[index].get_or_init(|| build_table(&PRIMES[..=index]))
}

fn build_table(primes: &[u64]) -> Vec<Candidate> {
    let mut smooth = vec![1u64];
    for &prime in primes {
        let mut next = Vec::new();
        for &n in &smooth {
            let mut m = n;
            while m <= MAX_PRODUCT {
                next.push(m);
                m *= prime;
            }
        }
        smooth = next;
    }
    smooth.sort_unstable();
    smooth.dedup();

    let mut table = Vec::new();
    for &q in smooth.iter().take_while(|&&q| q * q <= MAX_PRODUCT) {
        for &p in smooth.iter().filter(|&&p| p >= q && p < 2 * q) {
            if p * q > MAX_PRODUCT || gcd(p, q) != 1 {
                continue;
            }
            table.push(Candidate {
                p,
                q,
                cents: 1200.0 * (p as f64 / q as f64).log2(),
                height: ((p * q) as f64).log2(),
            });
        }
    }
    table.sort_by(|a, b| a.cents.total_cmp(&b.cents));
    table
}

/// Position in the infinite candidate sequence: table index plus fold count.
#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    octave: i32,
}

impl Slot {
    fn previous(self, len: usize) -> Slot {
        if self.index == 0 {
            Slot {
                index: len - 1,
                octave: self.octave - 1,
            }
        } else {
            Slot {
                index: self.index - 1,
                ..self
            }
        }
    }

    fn next(self, len: usize) -> Slot {
        if self.index + 1 == len {
            Slot {
                index: 0,
                octave: self.octave + 1,
            }
        } else {
            Slot {
                index: self.index + 1,
                ..self
            }
        }
    }

    fn cents(self, table: &[Candidate]) -> f64 {
        table[self.index].cents + 1200.0 * self.octave as f64
    }

    /// Tenney height measured within the octave that starts at `base`.
    fn height(self, table: &[Candidate], base: i32) -> f64 {
        let c = table[self.index];
        match self.octave - base {
            0 => c.height,
            shift => Ratio::from_folded(c.p, c.q, shift)
                .map_or(f64::INFINITY, |r| r.tenney_height()),
        }
    }

    fn ratio(self, table: &[Candidate]) -> Option<Ratio> {
        let c = table[self.index];
        Ratio::from_folded(c.p, c.q, self.octave)
    }
}

/// Finds the nearest ratio to `hz / root_hz` under `prime_limit`, plus the
/// candidates directly below and above it.
///
/// Returns `None` for non-finite or non-positive inputs, or when the input
/// lies more than 40 octaves from the root.
pub fn nearest_with_neighbors(hz: f64, root_hz: f64, prime_limit: u32) -> Option<RatioLookupResult> {
    if !hz.is_finite() || !root_hz.is_finite() || hz <= 0.0 || root_hz <= 0.0 {
        return None;
    }
    let log_ratio = (hz / root_hz).log2();
    if !log_ratio.is_finite() {
        return None;
    }
    let octave = log_ratio.floor();
    if octave.abs() > MAX_OCTAVES as f64 {
        return None;
    }
    let octave = octave as i32;
    let target = 1200.0 * log_ratio;

    let table = candidates(prime_limit);
    let len = table.len();
    let folded_cents = target - 1200.0 * octave as f64;
    let above = table.partition_point(|c| c.cents < folded_cents);
    let upper = if above == len {
        Slot { index: 0, octave: octave + 1 }
    } else {
        Slot { index: above, octave }
    };
    let lower = upper.previous(len);

    let err_lower = (target - lower.cents(table)).abs();
    let err_upper = (upper.cents(table) - target).abs();
    let main = if (err_lower - err_upper).abs() <= TIE_EPSILON_CENTS {
        if upper.height(table, octave) < lower.height(table, octave) {
            upper
        } else {
            lower
        }
    } else if err_upper < err_lower {
        upper
    } else {
        lower
    };

    Some(RatioLookupResult {
        main: main.ratio(table)?,
        lower: main.previous(len).ratio(table)?,
        higher: main.next(len).ratio(table)?,
        cents: target - main.cents(table),
    })
}

fn in_octave(p: u64, q: u64, octave: i32) -> bool {
    // 1 <= p / (q * 2^octave) < 2, evaluated in integers.
    let (num, den) = if octave >= 0 {
        (p as u128, (q as u128) << octave)
    } else {
        ((p as u128) << octave.unsigned_abs(), q as u128)
    };
    num >= den && num < 2 * den
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn gcd128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn largest_prime_factor(mut n: u64) -> u64 {
    let mut largest = 1;
    let mut f = 2;
    while f * f <= n {
        while n % f == 0 {
            largest = f;
            n /= f;
        }
        f += 1;
    }
    if n > 1 { n } else { largest }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(hz: f64, root: f64, limit: u32) -> RatioLookupResult {
        nearest_with_neighbors(hz, root, limit).expect("valid input")
    }

    #[test]
    fn unison_at_root() {
        let result = lookup(220.0, 220.0, 5);
        assert_eq!(result.main, Ratio { p: 1, q: 1, octave: 0 });
        assert!(result.cents.abs() < 1e-9);
    }

    #[test]
    fn perfect_fifth() {
        assert_eq!(lookup(300.0, 200.0, 5).main, Ratio { p: 3, q: 2, octave: 0 });
    }

    #[test]
    fn octave_keeps_fold_count() {
        let main = lookup(220.0, 110.0, 5).main;
        assert_eq!(main, Ratio { p: 2, q: 1, octave: 1 });
        assert_eq!(main.folded(), (1, 1));
    }

    #[test]
    fn below_root_folds_downward() {
        let main = lookup(150.0, 200.0, 5).main;
        assert_eq!(main, Ratio { p: 3, q: 4, octave: -1 });
        assert_eq!(main.folded(), (3, 2));
    }

    #[test]
    fn seventh_harmonic_needs_seven_limit() {
        let hz = 100.0 * 7.0 / 4.0;
        assert_eq!(lookup(hz, 100.0, 7).main, Ratio { p: 7, q: 4, octave: 0 });
        assert_ne!(lookup(hz, 100.0, 5).main.largest_prime(), 7);
    }

    #[test]
    fn near_octave_top_rounds_up_to_next_unison() {
        let hz = 100.0 * 2f64.powf(1199.9 / 1200.0);
        assert_eq!(lookup(hz, 100.0, 2).main, Ratio { p: 2, q: 1, octave: 1 });
    }

    #[test]
    fn equal_distance_prefers_simpler_ratio() {
        // With only octaves available, the tritone is equidistant from 1/1 and 2/1.
        let result = lookup(100.0 * 2f64.sqrt(), 100.0, 2);
        assert_eq!(result.main, Ratio::unison());
        assert_eq!(result.lower, Ratio { p: 1, q: 2, octave: -1 });
        assert_eq!(result.higher, Ratio { p: 2, q: 1, octave: 1 });
    }

    #[test]
    fn neighbors_bracket_main() {
        for limit in [3, 5, 7, 11, 13] {
            for step in 0..240 {
                let hz = 110.0 * 2f64.powf(step as f64 / 100.0);
                let r = lookup(hz, 110.0, limit);
                assert!(r.lower.cents() < r.main.cents());
                assert!(r.main.cents() < r.higher.cents());
            }
        }
    }

    #[test]
    fn results_satisfy_invariants() {
        for limit in [1, 2, 3, 5, 7, 11, 13, 17, 31, 97] {
            for step in 0..500 {
                let hz = 40.0 * 2f64.powf(step as f64 / 83.0);
                let r = lookup(hz, 261.63, limit);
                for ratio in [r.main, r.lower, r.higher] {
                    assert_eq!(gcd(ratio.p, ratio.q), 1);
                    assert!(ratio.largest_prime() <= (limit.max(2) as u64).min(31));
                    let unfolded = ratio.value() * 2f64.powi(-ratio.octave);
                    assert!((1.0..2.0).contains(&unfolded), "{ratio:?}");
                }
            }
        }
    }

    #[test]
    fn deterministic() {
        for step in 0..100 {
            let hz = 80.0 + step as f64 * 7.3;
            assert_eq!(
                nearest_with_neighbors(hz, 196.0, 7),
                nearest_with_neighbors(hz, 196.0, 7)
            );
        }
    }

    #[test]
    fn concurrent_callers_agree() {
        let expected: Vec<_> = (0..200)
            .map(|i| nearest_with_neighbors(100.0 + i as f64, 220.0, 11))
            .collect();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for (i, want) in expected.iter().enumerate() {
                        assert_eq!(&nearest_with_neighbors(100.0 + i as f64, 220.0, 11), want);
                    }
                });
            }
        });
    }

    #[test]
    fn rejects_degenerate_input() {
        assert!(nearest_with_neighbors(f64::NAN, 220.0, 5).is_none());
        assert!(nearest_with_neighbors(0.0, 220.0, 5).is_none());
        assert!(nearest_with_neighbors(220.0, -1.0, 5).is_none());
        assert!(nearest_with_neighbors(f64::INFINITY, 220.0, 5).is_none());
    }

    #[test]
    fn interval_between_ratios() {
        let fifth: Ratio = "3/2".parse().unwrap();
        let third: Ratio = "5/4".parse().unwrap();
        assert_eq!(third.interval_to(&fifth), Ratio::new(6, 5));
        assert!((cents_between(&third, &fifth) - 315.641).abs() < 1e-3);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("3:2".parse::<Ratio>().is_err());
        assert_eq!("0/2".parse::<Ratio>(), Err(ParseRatioError::ZeroTerm));
        assert_eq!("5".parse::<Ratio>(), Ok(Ratio { p: 5, q: 1, octave: 2 }));
    }

    #[test]
    fn monzo_of_syntonic_comma() {
        let comma = Ratio::new(81, 80).unwrap();
        let monzo = comma.monzo().unwrap();
        assert_eq!(monzo.exponents(), &[-4, 4, -1]);
        assert_eq!(monzo.to_string(), "[-4 4 -1\u{27e9}");
        assert_eq!(monzo.to_ratio(), Some(comma));
        assert!(Ratio::new(37, 32).unwrap().monzo().is_none());
    }

    #[test]
    fn ratio_new_computes_octave() {
        assert_eq!(Ratio::new(6, 2), Some(Ratio { p: 3, q: 1, octave: 1 }));
        assert_eq!(Ratio::new(1, 3), Some(Ratio { p: 1, q: 3, octave: -2 }));
        assert_eq!(Ratio::new(0, 3), None);
    }
}
