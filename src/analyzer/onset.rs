//! Onset envelope pipeline: bass-emphasis filtering, windowed energy, and
//! adaptive-threshold onset detection. Turns raw PCM into the sparse
//! rhythmic-spike signal the tempo estimator autocorrelates.

use std::f64::consts::PI;

/// Low-pass cutoff emphasizing kick-drum fundamentals.
pub const BASS_CUTOFF_HZ: f64 = 200.0;

/// Butterworth Q for the bass filter.
const FILTER_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Apply a 2nd-order IIR low-pass at [`BASS_CUTOFF_HZ`] so kick energy
/// dominates the envelope. Output length always equals input length.
pub fn bass_emphasis_filter(samples: &[f64], sample_rate: u32) -> Vec<f64> {
    let fc = BASS_CUTOFF_HZ / f64::from(sample_rate);
    let w0 = 2.0 * PI * fc;
    let alpha = w0.sin() / (2.0 * FILTER_Q);
    let cos_w0 = w0.cos();

    let a0 = 1.0 + alpha;
    let b0 = (1.0 - cos_w0) / 2.0 / a0;
    let b1 = (1.0 - cos_w0) / a0;
    let b2 = (1.0 - cos_w0) / 2.0 / a0;
    let a1 = -2.0 * cos_w0 / a0;
    let a2 = (1.0 - alpha) / a0;

    let mut filtered = Vec::with_capacity(samples.len());
    let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
    for &x in samples {
        let y = b0 * x + b1 * x1 + b2 * x2 - a1 * y1 - a2 * y2;
        filtered.push(y);
        (x2, x1) = (x1, x);
        (y2, y1) = (y1, y);
    }
    filtered
}

/// Windowed RMS energy envelope, peak-normalized to [0, 1]. One value per
/// hop; inputs shorter than a single window produce an empty envelope.
pub fn energy_envelope(samples: &[f64], window_size: usize, hop_size: usize) -> Vec<f64> {
    if window_size == 0 || hop_size == 0 || samples.len() < window_size {
        return Vec::new();
    }
    let num_windows = (samples.len() - window_size) / hop_size;
    let mut energy = Vec::with_capacity(num_windows);
    for i in 0..num_windows {
        let start = i * hop_size;
        let window = &samples[start..start + window_size];
        let sum: f64 = window.iter().map(|s| s * s).sum();
        energy.push((sum / window_size as f64).sqrt());
    }

    let max_energy = energy.iter().copied().fold(0.0_f64, f64::max);
    if max_energy > 0.0 {
        for e in &mut energy {
            *e /= max_energy;
        }
    }
    energy
}

/// Onset strength as positive deviation from a sliding local mean. A frame
/// exceeding the mean of the preceding `window_len` frames scores by how far
/// it exceeds it; everything else clips to zero. Length is preserved, and
/// envelopes of length 0 or 1 come back untouched.
pub fn adaptive_onset_detection(energy: &[f64], window_len: usize) -> Vec<f64> {
    let mut onset = vec![0.0; energy.len()];
    for i in 1..energy.len() {
        let start = i.saturating_sub(window_len);
        let local_mean: f64 = energy[start..i].iter().sum::<f64>() / (i - start) as f64;
        let diff = energy[i] - local_mean;
        if diff > 0.0 {
            onset[i] = diff;
        }
    }
    onset
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 22_050;

    // === Bass filter ===

    #[test]
    fn test_bass_filter_preserves_length() {
        for len in [0, 1, 2, 100, 22_050] {
            let samples: Vec<f64> = (0..len).map(|i| (i % 100) as f64 / 100.0).collect();
            assert_eq!(bass_emphasis_filter(&samples, SAMPLE_RATE).len(), len);
        }
    }

    #[test]
    fn test_bass_filter_passes_bass_attenuates_treble() {
        let seconds = 1.0;
        let n = (seconds * SAMPLE_RATE as f64) as usize;
        let tone = |freq: f64| -> Vec<f64> {
            (0..n)
                .map(|i| (2.0 * PI * freq * i as f64 / SAMPLE_RATE as f64).sin())
                .collect()
        };
        let rms = |samples: &[f64]| -> f64 {
            (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
        };

        // Skip the initial transient before measuring
        let low = bass_emphasis_filter(&tone(100.0), SAMPLE_RATE);
        let high = bass_emphasis_filter(&tone(4000.0), SAMPLE_RATE);
        let low_rms = rms(&low[1000..]);
        let high_rms = rms(&high[1000..]);
        assert!(
            low_rms > 4.0 * high_rms,
            "100 Hz should pass ({low_rms:.4}) while 4 kHz is attenuated ({high_rms:.4})"
        );
    }

    #[test]
    fn test_bass_filter_produces_output_for_nonzero_input() {
        let samples: Vec<f64> = (0..SAMPLE_RATE as usize)
            .map(|i| 0.5 * (1.0 + (i % 221) as f64 / 221.0))
            .collect();
        let filtered = bass_emphasis_filter(&samples, SAMPLE_RATE);
        assert!(filtered[100..].iter().any(|&v| v != 0.0));
    }

    // === Energy envelope ===

    #[test]
    fn test_energy_envelope_empty_for_short_input() {
        assert!(energy_envelope(&[], 1102, 551).is_empty());
        assert!(energy_envelope(&[0.5], 1102, 551).is_empty());
        assert!(energy_envelope(&vec![0.5; 1101], 1102, 551).is_empty());
    }

    #[test]
    fn test_energy_envelope_normalized() {
        let mut samples = vec![0.0; 10_000];
        for s in samples[4000..5000].iter_mut() {
            *s = 0.8;
        }
        let energy = energy_envelope(&samples, 1102, 551);
        assert!(!energy.is_empty());
        let max = energy.iter().copied().fold(0.0_f64, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
        assert!(energy.iter().all(|&e| (0.0..=1.0).contains(&e)));
    }

    #[test]
    fn test_energy_envelope_all_silence() {
        let energy = energy_envelope(&vec![0.0; 10_000], 1102, 551);
        assert!(energy.iter().all(|&e| e == 0.0));
    }

    // === Onset detection ===

    #[test]
    fn test_onset_preserves_length() {
        for len in [0, 1, 2, 50, 1000] {
            let energy: Vec<f64> = (0..len).map(|i| i as f64 / 100.0).collect();
            assert_eq!(adaptive_onset_detection(&energy, 8).len(), len);
        }
    }

    #[test]
    fn test_onset_detects_spike() {
        let mut energy = vec![0.1; 20];
        energy[10] = 1.0;
        let onset = adaptive_onset_detection(&energy, 5);
        assert!(onset[10] > 0.0, "spike should register as an onset");
        assert!(onset[10] > onset[9]);
    }

    #[test]
    fn test_onset_flat_signal_is_quiet() {
        let onset = adaptive_onset_detection(&vec![0.5; 50], 8);
        assert!(onset.iter().all(|&o| o == 0.0));
    }

    #[test]
    fn test_onset_never_negative() {
        let energy: Vec<f64> = (0..100).map(|i| ((i * 37) % 11) as f64 / 10.0).collect();
        let onset = adaptive_onset_detection(&energy, 8);
        assert!(onset.iter().all(|&o| o >= 0.0));
    }
}
