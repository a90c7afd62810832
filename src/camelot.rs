//! Camelot wheel — the 24-position harmonic-mixing notation DJs use to find
//! key-compatible tracks. Minor keys occupy 1A–12A, major keys 1B–12B;
//! adjacent positions and the relative major/minor mix cleanly.

/// Look up the Camelot notation for a normalized key name. Enharmonic
/// spellings share one entry, so `G#m` and `Abm` both land on `1A`.
fn lookup(key: &str) -> Option<&'static str> {
    match key {
        // Minor keys (A column)
        "Abm" | "G#m" => Some("1A"),
        "Ebm" | "D#m" => Some("2A"),
        "Bbm" | "A#m" => Some("3A"),
        "Fm" => Some("4A"),
        "Cm" => Some("5A"),
        "Gm" => Some("6A"),
        "Dm" => Some("7A"),
        "Am" => Some("8A"),
        "Em" => Some("9A"),
        "Bm" => Some("10A"),
        "F#m" | "Gbm" => Some("11A"),
        "Dbm" | "C#m" => Some("12A"),

        // Major keys (B column)
        "B" => Some("1B"),
        "F#" | "Gb" => Some("2B"),
        "Db" | "C#" => Some("3B"),
        "Ab" | "G#" => Some("4B"),
        "Eb" | "D#" => Some("5B"),
        "Bb" | "A#" => Some("6B"),
        "F" => Some("7B"),
        "C" => Some("8B"),
        "G" => Some("9B"),
        "D" => Some("10B"),
        "A" => Some("11B"),
        "E" => Some("12B"),

        _ => None,
    }
}

/// Convert a (key, mode) pair to Camelot notation. A `"minor"` mode appends
/// the `m` suffix when the key doesn't already carry one; a trailing `m` on
/// the key is honored when the mode is unspecified. Unknown or empty keys
/// yield `None`, never an error — callers treat that as "no harmonic data."
pub fn notation(key: &str, mode: &str) -> Option<&'static str> {
    if key.is_empty() {
        return None;
    }
    if mode == "minor" && !key.ends_with('m') {
        let mut normalized = String::with_capacity(key.len() + 1);
        normalized.push_str(key);
        normalized.push('m');
        return lookup(&normalized);
    }
    lookup(key)
}

/// Infer a mode string from the key spelling alone: a trailing `m` marks
/// minor, anything else is taken as major.
pub fn infer_mode(key: &str) -> &'static str {
    if key.len() > 1 && key.ends_with('m') {
        "minor"
    } else {
        "major"
    }
}

/// A Camelot code split into its wheel position and column.
fn parse_code(code: &str) -> Option<(u8, char)> {
    let letter = code.chars().last()?;
    if letter != 'A' && letter != 'B' {
        return None;
    }
    let position: u8 = code[..code.len() - 1].parse().ok()?;
    if !(1..=12).contains(&position) {
        return None;
    }
    Some((position, letter))
}

fn format_code(position: u8, letter: char) -> String {
    format!("{position}{letter}")
}

/// Keys that mix harmonically with the given Camelot code: the code itself,
/// its wheel neighbors one position either way, and the relative
/// major/minor. Returns `None` for an invalid code.
pub fn compatible_keys(code: &str) -> Option<Vec<String>> {
    let (position, letter) = parse_code(code)?;
    let up = position % 12 + 1;
    let down = (position + 10) % 12 + 1;
    let relative = if letter == 'A' { 'B' } else { 'A' };
    Some(vec![
        format_code(position, letter),
        format_code(down, letter),
        format_code(up, letter),
        format_code(position, relative),
    ])
}

/// Whether two Camelot codes can be mixed harmonically.
pub fn is_compatible(a: &str, b: &str) -> bool {
    match compatible_keys(a) {
        Some(keys) => keys.iter().any(|k| k == b),
        None => false,
    }
}

/// BPM compatibility for mixing: two tempos match when their difference, or
/// the difference after halving/doubling one side, is within the tolerance.
/// Returns the direct difference and the verdict.
pub fn bpm_compatibility(bpm1: i32, bpm2: i32, tolerance: i32) -> (i32, bool) {
    if bpm1 <= 0 || bpm2 <= 0 {
        return (0, false);
    }
    let diff = (bpm1 - bpm2).abs();
    if diff <= tolerance {
        return (diff, true);
    }
    // Half-time and double-time pairings (140 against 70, 70 against 140)
    for folded in [
        (bpm1 / 2 - bpm2).abs(),
        (bpm1 - bpm2 / 2).abs(),
        (bpm1 * 2 - bpm2).abs(),
        (bpm1 - bpm2 * 2).abs(),
    ] {
        if folded <= tolerance {
            return (folded, true);
        }
    }
    (diff, false)
}
