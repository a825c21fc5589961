//! # Equal-Temperament Helpers
//!
//! Twelve-tone equal temperament is only used as a coarse yardstick: the
//! output smoother watches the nearest tempered index to notice large pitch
//! jumps, and the console front-end prints the nearest note name next to the
//! just ratio.

/// Reference pitch for note names.
pub const A4_HZ: f64 = 440.0;

const NOTE_NAMES: [&str; 12] = [
    "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
];

/// Signed number of tempered semitones from A4 to the note nearest `freq`.
///
/// Returns `None` for non-finite or non-positive frequencies.
pub fn tempered_index(freq: f64) -> Option<i32> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    Some((12.0 * (freq / A4_HZ).log2()).round() as i32)
}

/// Frequency of the tempered note `index` semitones from A4.
pub fn tempered_frequency(index: i32) -> f64 {
    A4_HZ * 2f64.powf(index as f64 / 12.0)
}

/// Note name such as `"A4"` or `"C#3"` for a tempered index.
pub fn note_name(index: i32) -> String {
    let name = NOTE_NAMES[index.rem_euclid(12) as usize];
    // Octave numbers change at C, three semitones above A.
    let octave = 4 + (index + 9).div_euclid(12);
    format!("{}{}", name, octave)
}

/// Finds the closest tempered note to a given frequency.
///
/// # Returns
/// * `Some((note_name, target_frequency))`
/// * `None` if `freq` is not a usable frequency
pub fn find_nearest_note(freq: f64) -> Option<(String, f64)> {
    let index = tempered_index(freq)?;
    Some((note_name(index), tempered_frequency(index)))
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat.
pub fn calculate_cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

/// Relative difference `|a - b| / |b|`.
pub(crate) fn relative_difference(a: f64, b: f64) -> f64 {
    (a - b).abs() / b.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cross_octave_at_c() {
        assert_eq!(note_name(0), "A4");
        assert_eq!(note_name(2), "B4");
        assert_eq!(note_name(3), "C5");
        assert_eq!(note_name(-9), "C4");
        assert_eq!(note_name(-10), "B3");
        assert_eq!(note_name(-48), "A0");
    }

    #[test]
    fn nearest_note_of_middle_c() {
        let (name, target) = find_nearest_note(262.0).unwrap();
        assert_eq!(name, "C4");
        assert!((target - 261.6256).abs() < 1e-3);
        assert!(find_nearest_note(0.0).is_none());
    }

    #[test]
    fn cents_of_an_octave() {
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-9);
        assert!((calculate_cents_deviation(440.0, 880.0) + 1200.0).abs() < 1e-9);
    }
}
