//! Tempo estimation: multi-segment autocorrelation over the onset envelope
//! with octave-error correction and a genre-informed tie break. Several
//! stretches of the track vote on a BPM so one noisy passage can't drag the
//! whole estimate.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use super::onset;

/// Minimum energy frames a segment needs before autocorrelation is worth
/// running.
const MIN_ENERGY_FRAMES: usize = 20;

/// Tunable constants for the estimator. The defaults mirror the values the
/// detector was shipped with; they are configuration, not derivation, and a
/// labeled BPM corpus is the way to revisit them.
#[derive(Debug, Clone)]
pub struct TempoParams {
    /// Lower bound of the searched BPM range.
    pub min_bpm: i32,
    /// Upper bound of the searched BPM range.
    pub max_bpm: i32,
    /// How many segments of the track vote on the tempo.
    pub segments: usize,
    /// Length of each segment in seconds.
    pub segment_secs: usize,
    /// Segments shorter than this are skipped.
    pub min_segment_secs: usize,
    /// Sliding-window length for adaptive onset detection, in frames.
    pub onset_window: usize,
    /// Autocorrelation peaks below this fraction of the maximum are ignored.
    pub peak_floor: f64,
    /// A peak at half the winning lag must reach this fraction of the
    /// winner's value to trigger octave correction.
    pub octave_peak_ratio: f64,
    /// Segment votes below this confidence are discarded.
    pub min_confidence: f64,
    /// Ordered genre tempo bands with additive tie-break bonuses; the first
    /// matching band applies. Empty disables the bonus entirely.
    pub genre_bonus: &'static [(RangeInclusive<i32>, i32)],
}

/// Common tempo bands: house/techno gets the strongest pull, trance/D&B and
/// hip-hop a lighter one.
pub const GENRE_BONUS: &[(RangeInclusive<i32>, i32)] =
    &[(115..=135, 2), (135..=150, 1), (85..=95, 1)];

impl Default for TempoParams {
    fn default() -> Self {
        Self {
            min_bpm: 60,
            max_bpm: 200,
            segments: 4,
            segment_secs: 15,
            min_segment_secs: 5,
            onset_window: 8,
            peak_floor: 0.3,
            octave_peak_ratio: 0.7,
            min_confidence: 0.3,
            genre_bonus: GENRE_BONUS,
        }
    }
}

impl TempoParams {
    fn bonus_for(&self, bpm: i32) -> i32 {
        self.genre_bonus
            .iter()
            .find(|(band, _)| band.contains(&bpm))
            .map(|(_, bonus)| *bonus)
            .unwrap_or(0)
    }
}

/// Estimated tempo with a confidence score. `bpm == 0` means no tempo was
/// detected and always carries `confidence == 0.0`; a nonzero BPM with low
/// confidence is a valid, if weak, result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    pub bpm: i32,
    pub confidence: f64,
}

impl TempoEstimate {
    /// The defined "no tempo detected" outcome. Not an error.
    pub const fn none() -> Self {
        Self {
            bpm: 0,
            confidence: 0.0,
        }
    }
}

struct Candidate {
    votes: i32,
    confidence: f64,
}

fn cast_vote(votes: &mut HashMap<i32, Candidate>, bpm: i32, confidence: f64) {
    let entry = votes.entry(bpm).or_insert(Candidate {
        votes: 0,
        confidence: 0.0,
    });
    entry.votes += 1;
    entry.confidence = entry.confidence.max(confidence);
}

/// Estimate the tempo of a mono PCM buffer. Segments of the track are
/// filtered, reduced to onset envelopes, and autocorrelated independently;
/// their votes (plus half/double-time folds) pick the winner. Too little
/// usable audio yields [`TempoEstimate::none`].
pub fn estimate_tempo(samples: &[f64], sample_rate: u32, params: &TempoParams) -> TempoEstimate {
    let sr = sample_rate as usize;
    if sr == 0 {
        return TempoEstimate::none();
    }
    // 50 ms analysis windows with 50% overlap
    let window_size = sr / 20;
    let hop_size = window_size / 2;
    if hop_size == 0 {
        return TempoEstimate::none();
    }

    let segment_len = params.segment_secs * sr;
    let mut planned_segments = params.segments.max(1);
    let step = if samples.len() > segment_len {
        (samples.len() - segment_len) / planned_segments
    } else {
        0
    };
    if step == 0 {
        planned_segments = 1;
    }

    let mut votes: HashMap<i32, Candidate> = HashMap::new();
    for seg in 0..planned_segments {
        let start = seg * step;
        let end = (start + segment_len).min(samples.len());
        if end.saturating_sub(start) < params.min_segment_secs * sr {
            continue;
        }

        let filtered = onset::bass_emphasis_filter(&samples[start..end], sample_rate);
        let energy = onset::energy_envelope(&filtered, window_size, hop_size);
        if energy.len() < MIN_ENERGY_FRAMES {
            continue;
        }
        let envelope = onset::adaptive_onset_detection(&energy, params.onset_window);

        let estimate = autocorrelation_bpm(&envelope, hop_size, sample_rate, params);
        if estimate.bpm > 0 && estimate.confidence > params.min_confidence {
            cast_vote(&mut votes, estimate.bpm, estimate.confidence);
            // Octave-related tempos vote too, so segments that disagree by a
            // factor of two still converge
            let bpm_range = params.min_bpm..=params.max_bpm;
            let half = estimate.bpm / 2;
            let double = estimate.bpm * 2;
            if bpm_range.contains(&half) {
                cast_vote(&mut votes, half, estimate.confidence);
            }
            if bpm_range.contains(&double) {
                cast_vote(&mut votes, double, estimate.confidence);
            }
        }
    }

    if votes.is_empty() {
        return TempoEstimate::none();
    }

    let mut best_bpm = 0;
    let mut best_score = 0;
    let mut best_confidence = 0.0;
    for (&bpm, candidate) in &votes {
        let score = candidate.votes + params.bonus_for(bpm);
        if score > best_score || (score == best_score && bpm > best_bpm) {
            best_score = score;
            best_bpm = bpm;
            best_confidence = candidate.confidence;
        }
    }

    // With several usable segments, a single unseconded vote is noise
    if best_score < 2 && planned_segments > 1 {
        return TempoEstimate::none();
    }

    TempoEstimate {
        bpm: best_bpm,
        confidence: best_confidence,
    }
}

struct Peak {
    lag: usize,
    value: f64,
    prominence: f64,
}

/// Autocorrelate one onset envelope and convert the winning lag to BPM.
/// Envelopes too short to cover the slowest admissible tempo return
/// [`TempoEstimate::none`].
pub fn autocorrelation_bpm(
    envelope: &[f64],
    hop_size: usize,
    sample_rate: u32,
    params: &TempoParams,
) -> TempoEstimate {
    if hop_size == 0 || params.max_bpm <= 0 || params.min_bpm <= 0 {
        return TempoEstimate::none();
    }
    let frames_per_second = f64::from(sample_rate) / hop_size as f64;
    let min_lag = ((60.0 / f64::from(params.max_bpm)) * frames_per_second) as usize;
    let min_lag = min_lag.max(1);
    let max_lag = ((60.0 / f64::from(params.min_bpm)) * frames_per_second) as usize;
    let max_lag = max_lag.min((envelope.len() / 2).saturating_sub(1));
    if max_lag <= min_lag {
        return TempoEstimate::none();
    }

    // Normalize against the zero-lag correlation so confidence is comparable
    // across tracks
    let zero_lag: f64 = envelope.iter().map(|o| o * o).sum();
    if zero_lag <= 0.0 {
        return TempoEstimate::none();
    }

    let mut correlations = Vec::with_capacity(max_lag - min_lag + 1);
    let mut max_corr = 0.0_f64;
    for lag in min_lag..=max_lag {
        let sum: f64 = envelope[..envelope.len() - lag]
            .iter()
            .zip(&envelope[lag..])
            .map(|(a, b)| a * b)
            .sum();
        let corr = sum / zero_lag;
        max_corr = max_corr.max(corr);
        correlations.push(corr);
    }
    if max_corr <= 0.0 {
        return TempoEstimate::none();
    }

    // Local maxima over a 2-frame neighborhood, floored at a fraction of the
    // strongest correlation
    let mut peaks: Vec<Peak> = Vec::new();
    for i in 2..correlations.len().saturating_sub(2) {
        let c = correlations[i];
        if c > correlations[i - 1]
            && c > correlations[i + 1]
            && c > correlations[i - 2]
            && c > correlations[i + 2]
            && c > max_corr * params.peak_floor
        {
            let min_neighbor = correlations[i - 2]
                .min(correlations[i - 1])
                .min(correlations[i + 1])
                .min(correlations[i + 2]);
            peaks.push(Peak {
                lag: i + min_lag,
                value: c,
                prominence: c - min_neighbor,
            });
        }
    }
    if peaks.is_empty() {
        return TempoEstimate::none();
    }

    peaks.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then(b.prominence.total_cmp(&a.prominence))
    });
    let confidence = peaks[0].value;
    let mut best_lag = peaks[0].lag;

    // Octave-error correction: a strong peak near half the winning lag means
    // the winner was the second harmonic of a faster tempo
    let half_lag = best_lag / 2;
    for peak in &peaks {
        if peak.lag.abs_diff(half_lag) <= 2 && peak.value > confidence * params.octave_peak_ratio {
            best_lag = peak.lag;
            break;
        }
    }

    let bpm = (60.0 * frames_per_second / best_lag as f64).round() as i32;
    if bpm < params.min_bpm || bpm > params.max_bpm {
        return TempoEstimate::none();
    }

    TempoEstimate { bpm, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 22_050;

    // Hop chosen so 120 BPM lands on an integral lag: 22050 / 525 = 42
    // frames per second, 21 frames per beat.
    const HOP: usize = 525;

    fn params() -> TempoParams {
        TempoParams::default()
    }

    // === Autocorrelation ===

    #[test]
    fn test_autocorrelation_empty_envelope() {
        let est = autocorrelation_bpm(&[], 512, SAMPLE_RATE, &params());
        assert_eq!(est, TempoEstimate::none());
    }

    #[test]
    fn test_autocorrelation_short_envelope() {
        let est = autocorrelation_bpm(&vec![1.0; 10], 512, SAMPLE_RATE, &params());
        assert_eq!(est, TempoEstimate::none());
    }

    #[test]
    fn test_autocorrelation_silent_envelope() {
        let est = autocorrelation_bpm(&vec![0.0; 1000], 512, SAMPLE_RATE, &params());
        assert_eq!(est, TempoEstimate::none());
    }

    #[test]
    fn test_autocorrelation_exact_120_bpm() {
        // Spike every 21 frames at 42 fps = exactly 120 BPM
        let mut envelope = vec![0.0; 1000];
        for i in (0..envelope.len()).step_by(21) {
            envelope[i] = 1.0;
        }
        let est = autocorrelation_bpm(&envelope, HOP, SAMPLE_RATE, &params());
        assert_eq!(est.bpm, 120);
        assert!(est.confidence > 0.5, "confidence {}", est.confidence);
    }

    #[test]
    fn test_autocorrelation_corrects_octave_error() {
        // Strong accent every 40 frames with a weaker beat between: the raw
        // maximum lands on lag 40 but the true beat period is 20 frames
        // (126 BPM at 42 fps), and the half-lag peak should win.
        let mut envelope = vec![0.0; 1000];
        for i in (0..envelope.len()).step_by(40) {
            envelope[i] = 1.0;
        }
        for i in (20..envelope.len()).step_by(40) {
            envelope[i] = 0.6;
        }
        let est = autocorrelation_bpm(&envelope, HOP, SAMPLE_RATE, &params());
        assert_eq!(est.bpm, 126);
        assert!(est.confidence > 0.0);
    }

    #[test]
    fn test_autocorrelation_bpm_stays_in_range() {
        let mut envelope = vec![0.0; 2000];
        for i in (0..envelope.len()).step_by(13) {
            envelope[i] = 1.0;
        }
        let est = autocorrelation_bpm(&envelope, HOP, SAMPLE_RATE, &params());
        if est.bpm > 0 {
            assert!((60..=200).contains(&est.bpm));
        }
    }

    // === Genre bonus ===

    #[test]
    fn test_genre_bonus_first_match_wins() {
        let p = params();
        assert_eq!(p.bonus_for(128), 2);
        assert_eq!(p.bonus_for(115), 2);
        // 135 sits on the boundary of two bands; the ordered table resolves it
        assert_eq!(p.bonus_for(135), 2);
        assert_eq!(p.bonus_for(140), 1);
        assert_eq!(p.bonus_for(90), 1);
        assert_eq!(p.bonus_for(100), 0);
        assert_eq!(p.bonus_for(174), 0);
    }

    // === Full estimator ===

    #[test]
    fn test_estimate_tempo_empty_samples() {
        assert_eq!(
            estimate_tempo(&[], SAMPLE_RATE, &params()),
            TempoEstimate::none()
        );
    }

    #[test]
    fn test_estimate_tempo_silence() {
        let samples = vec![0.0; SAMPLE_RATE as usize * 20];
        assert_eq!(
            estimate_tempo(&samples, SAMPLE_RATE, &params()),
            TempoEstimate::none()
        );
    }

    #[test]
    fn test_estimate_tempo_too_short() {
        // Under a second of audio: every segment is below the minimum
        let samples = vec![0.3; SAMPLE_RATE as usize / 2];
        assert_eq!(
            estimate_tempo(&samples, SAMPLE_RATE, &params()),
            TempoEstimate::none()
        );
    }

    #[test]
    fn test_estimate_tempo_synthetic_120_bpm_kicks() {
        // 20 s of 100 Hz bursts every half second — a 120 BPM kick pattern
        let sr = SAMPLE_RATE as usize;
        let mut samples = vec![0.0; sr * 20];
        let burst_len = sr / 20; // 50 ms
        let period = sr / 2; // 500 ms
        for beat_start in (0..samples.len()).step_by(period) {
            for i in 0..burst_len.min(samples.len() - beat_start) {
                let t = i as f64 / sr as f64;
                samples[beat_start + i] =
                    (2.0 * std::f64::consts::PI * 100.0 * t).sin();
            }
        }

        let est = estimate_tempo(&samples, SAMPLE_RATE, &params());
        assert_eq!(est.bpm, 120);
        assert!(est.confidence > 0.3, "confidence {}", est.confidence);
    }
}
