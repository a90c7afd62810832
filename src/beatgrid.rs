//! Beat grid generation from BPM and duration — the timestamps a player UI
//! aligns cue points and loops against. Assumes constant tempo in 4/4; a
//! track known to drift gets `is_variable` flagged by its caller and the
//! grid suppressed.

use serde::{Deserialize, Serialize};

/// Lowest BPM a grid will be built for.
pub const MIN_BPM: i32 = 20;
/// Highest BPM a grid will be built for.
pub const MAX_BPM: i32 = 300;
/// Beats per bar; downbeats land on bar starts.
pub const BEATS_PER_BAR: usize = 4;

/// Milliseconds between beats at the given tempo. Zero for a non-positive
/// BPM rather than a division fault.
pub fn ms_per_beat(bpm: i32) -> f64 {
    if bpm <= 0 {
        return 0.0;
    }
    60_000.0 / f64::from(bpm)
}

/// Beat timing for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatGrid {
    /// Beats per minute of the track
    pub bpm: i32,
    /// Time offset to the first beat in milliseconds
    pub offset: f64,
    /// Timestamp of each beat in milliseconds, strictly increasing
    pub beats: Vec<i64>,
    /// Indices into `beats` marking downbeats (every 4th, starting at 0)
    pub downbeats: Vec<usize>,
    /// Whether the BPM varies through the track. Never set by
    /// [`BeatGrid::calculate`]; callers flag it from outside knowledge.
    pub is_variable: bool,
}

impl BeatGrid {
    /// Build a grid from BPM, track duration, and first-beat offset.
    /// Returns `None` for a BPM outside [`MIN_BPM`]..=[`MAX_BPM`] or a
    /// non-positive duration; a negative offset clamps to zero.
    pub fn calculate(bpm: i32, duration_seconds: f64, offset_ms: f64) -> Option<Self> {
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return None;
        }
        if duration_seconds <= 0.0 {
            return None;
        }
        let offset_ms = offset_ms.max(0.0);

        let ms_per_beat = ms_per_beat(bpm);
        let duration_ms = duration_seconds * 1000.0;
        let num_beats = ((duration_ms - offset_ms) / ms_per_beat).max(0.0) as usize;

        let mut beats = Vec::with_capacity(num_beats);
        let mut downbeats = Vec::with_capacity(num_beats / BEATS_PER_BAR + 1);
        for i in 0..num_beats {
            let beat_time = offset_ms + i as f64 * ms_per_beat;
            beats.push(beat_time.round() as i64);
            if i % BEATS_PER_BAR == 0 {
                downbeats.push(i);
            }
        }

        Some(Self {
            bpm,
            offset: offset_ms,
            beats,
            downbeats,
            is_variable: false,
        })
    }

    /// Invariant check for grids that did not come from [`calculate`] — a
    /// grid deserialized from storage or built by hand can violate any of
    /// these: BPM range, non-negative offset, non-empty strictly ascending
    /// beats, downbeat indices in range.
    ///
    /// [`calculate`]: BeatGrid::calculate
    pub fn validate(&self) -> bool {
        if !(MIN_BPM..=MAX_BPM).contains(&self.bpm) {
            return false;
        }
        if self.offset < 0.0 {
            return false;
        }
        if self.beats.is_empty() {
            return false;
        }
        if self.beats.windows(2).any(|w| w[1] <= w[0]) {
            return false;
        }
        if self.downbeats.iter().any(|&db| db >= self.beats.len()) {
            return false;
        }
        true
    }

    /// Index of the beat nearest to the given time. Times before the first
    /// beat clamp to index 0, times after the last clamp to the final index,
    /// and an equidistant query resolves to the earlier beat. `None` only
    /// for an empty grid.
    pub fn beat_at_time(&self, time_ms: i64) -> Option<usize> {
        let (&first, &last) = (self.beats.first()?, self.beats.last()?);
        if time_ms <= first {
            return Some(0);
        }
        if time_ms >= last {
            return Some(self.beats.len() - 1);
        }

        // First beat at or after the query time; the check above guarantees
        // it exists and has a predecessor.
        let idx = self.beats.partition_point(|&b| b < time_ms);
        let prev_diff = time_ms - self.beats[idx - 1];
        let curr_diff = self.beats[idx] - time_ms;
        if prev_diff <= curr_diff {
            Some(idx - 1)
        } else {
            Some(idx)
        }
    }

    /// Timestamp of the beat at the given index, or `None` out of range.
    pub fn time_at_beat(&self, beat_index: usize) -> Option<i64> {
        self.beats.get(beat_index).copied()
    }

    /// Whether the beat at the given index is a downbeat. Out-of-range
    /// indices are simply not downbeats.
    pub fn is_downbeat(&self, beat_index: usize) -> bool {
        beat_index < self.beats.len() && self.downbeats.contains(&beat_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === ms_per_beat ===

    #[test]
    fn test_ms_per_beat_across_range() {
        for bpm in MIN_BPM..=MAX_BPM {
            assert_eq!(ms_per_beat(bpm), 60_000.0 / f64::from(bpm));
        }
        assert_eq!(ms_per_beat(120), 500.0);
        assert_eq!(ms_per_beat(0), 0.0);
        assert_eq!(ms_per_beat(-5), 0.0);
    }

    // === calculate ===

    #[test]
    fn test_calculate_128bpm_reference_grid() {
        let grid = BeatGrid::calculate(128, 10.0, 0.0).unwrap();
        // 468.75 ms per beat over 10 s
        assert_eq!(grid.beats.len(), 21);
        assert_eq!(&grid.beats[..4], &[0, 469, 938, 1406]);
        assert_eq!(grid.downbeats, vec![0, 4, 8, 12, 16, 20]);
        assert!(!grid.is_variable);
        assert!(grid.validate());
    }

    #[test]
    fn test_calculate_rejects_bad_inputs() {
        assert!(BeatGrid::calculate(19, 10.0, 0.0).is_none());
        assert!(BeatGrid::calculate(301, 10.0, 0.0).is_none());
        assert!(BeatGrid::calculate(120, 0.0, 0.0).is_none());
        assert!(BeatGrid::calculate(120, -3.0, 0.0).is_none());
    }

    #[test]
    fn test_calculate_clamps_negative_offset() {
        let grid = BeatGrid::calculate(120, 10.0, -250.0).unwrap();
        assert_eq!(grid.offset, 0.0);
        assert_eq!(grid.beats[0], 0);
    }

    #[test]
    fn test_calculate_applies_offset() {
        let grid = BeatGrid::calculate(120, 10.0, 100.0).unwrap();
        assert_eq!(grid.offset, 100.0);
        assert_eq!(&grid.beats[..3], &[100, 600, 1100]);
        // 9900 ms of room at 500 ms per beat
        assert_eq!(grid.beats.len(), 19);
    }

    #[test]
    fn test_calculate_beats_strictly_increasing() {
        for bpm in [MIN_BPM, 77, 128, 201, MAX_BPM] {
            let grid = BeatGrid::calculate(bpm, 30.0, 12.5).unwrap();
            assert!(grid.beats.windows(2).all(|w| w[1] > w[0]), "bpm {bpm}");
            assert!(grid.validate(), "bpm {bpm}");
        }
    }

    #[test]
    fn test_calculate_downbeats_every_fourth() {
        let grid = BeatGrid::calculate(100, 60.0, 0.0).unwrap();
        for (i, &db) in grid.downbeats.iter().enumerate() {
            assert_eq!(db, i * BEATS_PER_BAR);
            assert!(db < grid.beats.len());
        }
    }

    // === validate ===

    #[test]
    fn test_validate_rejects_hand_built_violations() {
        let good = BeatGrid::calculate(120, 10.0, 0.0).unwrap();

        let mut bad = good.clone();
        bad.bpm = 500;
        assert!(!bad.validate());

        let mut bad = good.clone();
        bad.offset = -1.0;
        assert!(!bad.validate());

        let mut bad = good.clone();
        bad.beats.clear();
        assert!(!bad.validate());

        let mut bad = good.clone();
        bad.beats[5] = bad.beats[4];
        assert!(!bad.validate());

        let mut bad = good.clone();
        bad.downbeats.push(bad.beats.len());
        assert!(!bad.validate());
    }

    // === beat lookups ===

    #[test]
    fn test_beat_at_time_nearest_and_clamped() {
        let grid = BeatGrid::calculate(120, 10.0, 0.0).unwrap();
        // Beats at 0, 500, 1000, ...
        assert_eq!(grid.beat_at_time(-100), Some(0));
        assert_eq!(grid.beat_at_time(0), Some(0));
        assert_eq!(grid.beat_at_time(180), Some(0));
        assert_eq!(grid.beat_at_time(320), Some(1));
        assert_eq!(grid.beat_at_time(1000), Some(2));
        assert_eq!(grid.beat_at_time(1_000_000), Some(grid.beats.len() - 1));
    }

    #[test]
    fn test_beat_at_time_tie_breaks_earlier() {
        let grid = BeatGrid::calculate(120, 10.0, 0.0).unwrap();
        // 250 is equidistant between beats 0 and 1
        assert_eq!(grid.beat_at_time(250), Some(0));
        assert_eq!(grid.beat_at_time(750), Some(1));
    }

    #[test]
    fn test_beat_at_time_monotonic() {
        let grid = BeatGrid::calculate(97, 25.0, 40.0).unwrap();
        let mut previous = 0;
        for t in (-500..26_000).step_by(37) {
            let idx = grid.beat_at_time(t).unwrap();
            assert!(idx >= previous, "t={t}");
            previous = idx;
        }
    }

    #[test]
    fn test_time_at_beat_bounds() {
        let grid = BeatGrid::calculate(120, 10.0, 0.0).unwrap();
        assert_eq!(grid.time_at_beat(0), Some(0));
        assert_eq!(grid.time_at_beat(2), Some(1000));
        assert_eq!(grid.time_at_beat(grid.beats.len()), None);
    }

    #[test]
    fn test_is_downbeat_matches_downbeat_set() {
        let grid = BeatGrid::calculate(120, 10.0, 0.0).unwrap();
        for i in 0..grid.beats.len() {
            assert_eq!(grid.is_downbeat(i), grid.downbeats.contains(&i));
        }
        assert!(!grid.is_downbeat(grid.beats.len()));
        assert!(!grid.is_downbeat(usize::MAX));
    }

    // === serialization ===

    #[test]
    fn test_json_round_trip() {
        let grid = BeatGrid::calculate(128, 10.0, 0.0).unwrap();
        let json = serde_json::to_string(&grid).unwrap();
        assert!(json.contains("\"bpm\":128"));
        assert!(json.contains("\"isVariable\":false"));
        assert!(json.contains("\"downbeats\""));
        let back: BeatGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grid);
        assert!(back.validate());
    }
}
