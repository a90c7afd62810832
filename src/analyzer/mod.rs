pub mod decode;
pub mod onset;
pub mod tempo;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beatgrid::{self, BeatGrid};
use crate::{camelot, tags, validate};
use tempo::{TempoEstimate, TempoParams};

/// Default decoder binary, resolved via PATH.
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
/// Default probe binary, resolved via PATH.
pub const DEFAULT_FFPROBE: &str = "ffprobe";
/// Analysis sample rate. 22 kHz is plenty for beat detection and halves the
/// decode cost.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;
/// Wall-clock budget for one analysis, decoder included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);

/// Tracks shorter than this don't carry enough rhythm to estimate.
const MIN_ANALYSIS_SECONDS: usize = 5;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("invalid input: {0}")]
    Validation(#[from] validate::ValidationError),
    #[error("decode error: {0}")]
    Decode(decode::DecodeError),
    #[error("analysis cancelled")]
    Cancelled,
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("audio too short for analysis ({0:.1}s)")]
    TooShort(f64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<decode::DecodeError> for AnalyzeError {
    fn from(err: decode::DecodeError) -> Self {
        // Cancellation and timeout stay distinguishable from "file is bad"
        match err {
            decode::DecodeError::Cancelled => Self::Cancelled,
            decode::DecodeError::Timeout(t) => Self::Timeout(t),
            decode::DecodeError::Validation(v) => Self::Validation(v),
            other => Self::Decode(other),
        }
    }
}

/// Cooperative cancellation flag shared between the caller and an in-flight
/// analysis. Checked before and during the decoder subprocess; flipping it
/// kills the child promptly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Immutable analyzer configuration, constructed once at startup and passed
/// to every call site. No global state, so tests and parallel callers can
/// hold differently-configured instances side by side.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub sample_rate: u32,
    pub timeout: Duration,
    pub tempo: TempoParams,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: DEFAULT_FFMPEG.to_string(),
            ffprobe_path: DEFAULT_FFPROBE.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            timeout: DEFAULT_TIMEOUT,
            tempo: TempoParams::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Build a config honoring the `FFMPEG_PATH`/`FFPROBE_PATH` environment
    /// overrides. Both pass through the binary validator; a malicious or
    /// malformed override falls back to the bare default name.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            config.ffmpeg_path = validate::binary_path(&path, DEFAULT_FFMPEG);
        }
        if let Ok(path) = std::env::var("FFPROBE_PATH") {
            config.ffprobe_path = validate::binary_path(&path, DEFAULT_FFPROBE);
        }
        config
    }
}

/// Analysis output for one track. Serializes with the exact field names the
/// surrounding system stores and ships to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Beats per minute, 0 if not detected
    pub bpm: i32,
    /// Musical key as supplied by the caller, e.g. "Am", "C", "F#m"
    pub musical_key: String,
    /// "major", "minor", or empty
    pub key_mode: String,
    /// Camelot notation, e.g. "8A", "11B"; empty if unmapped
    pub key_camelot: String,
}

impl AnalysisResult {
    /// Fill in the key fields from an externally supplied key/mode pair. An
    /// empty mode is inferred from the key spelling; an unmappable key
    /// leaves the Camelot field empty.
    fn apply_key(&mut self, key: &str, mode: &str) {
        if key.is_empty() {
            return;
        }
        let mode = if mode.is_empty() {
            camelot::infer_mode(key)
        } else {
            mode
        };
        self.musical_key = key.to_string();
        self.key_mode = mode.to_string();
        self.key_camelot = camelot::notation(key, mode).unwrap_or_default().to_string();
    }
}

/// Stateless analysis engine: decode, onset envelope, tempo vote. Safe to
/// share across threads; each call owns its buffers.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze an audio byte stream for tempo. The filename is used only as
    /// a format hint for the decoder. An undetected tempo is a valid result
    /// (`bpm == 0`), not an error.
    pub fn analyze(
        &self,
        cancel: &CancelToken,
        data: &[u8],
        file_name: &str,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let samples = decode::decode_to_mono(
            &self.config.ffmpeg_path,
            self.config.sample_rate,
            cancel,
            self.config.timeout,
            data,
            file_name,
        )?;

        let seconds = samples.len() as f64 / f64::from(self.config.sample_rate);
        if samples.len() < MIN_ANALYSIS_SECONDS * self.config.sample_rate as usize {
            return Err(AnalyzeError::TooShort(seconds));
        }

        let TempoEstimate { bpm, confidence } =
            tempo::estimate_tempo(&samples, self.config.sample_rate, &self.config.tempo);
        log::debug!("{file_name}: bpm {bpm} (confidence {confidence:.2})");

        let mut result = AnalysisResult::default();
        if (beatgrid::MIN_BPM..=beatgrid::MAX_BPM).contains(&bpm) {
            result.bpm = bpm;
        }
        Ok(result)
    }

    /// Like [`analyze`], additionally passing through an externally supplied
    /// key/mode pair (file tags, user input) and mapping it to Camelot
    /// notation. Key is never derived from the audio itself.
    ///
    /// [`analyze`]: Analyzer::analyze
    pub fn analyze_with_key(
        &self,
        cancel: &CancelToken,
        data: &[u8],
        file_name: &str,
        key: &str,
        mode: &str,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let mut result = self.analyze(cancel, data, file_name)?;
        result.apply_key(key, mode);
        Ok(result)
    }

    /// Track duration in seconds via ffprobe.
    pub fn probe_duration(&self, cancel: &CancelToken, path: &str) -> Result<f64, AnalyzeError> {
        Ok(decode::probe_duration(
            &self.config.ffprobe_path,
            cancel,
            self.config.timeout,
            path,
        )?)
    }
}

/// Per-file outcome of a batch run.
pub struct FileReport {
    pub path: PathBuf,
    pub result: Result<AnalysisResult, AnalyzeError>,
    pub duration_secs: Option<f64>,
    pub grid: Option<BeatGrid>,
}

pub struct BatchResult {
    pub analyzed: u64,
    pub failed: u64,
    pub reports: Vec<FileReport>,
}

/// Analyze files in parallel with a rayon pool and a progress bar. Each file
/// is read, decoded, and voted on independently; key tags are picked up via
/// lofty and passed through the Camelot mapper. With `with_grid`, a beat
/// grid is derived from the detected BPM and the track duration (tags first,
/// ffprobe as fallback).
pub fn analyze_files(
    analyzer: &Analyzer,
    cancel: &CancelToken,
    paths: Vec<PathBuf>,
    jobs: usize,
    with_grid: bool,
) -> BatchResult {
    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .unwrap();

    let reports: Vec<FileReport> = pool.install(|| {
        use rayon::prelude::*;
        paths
            .into_par_iter()
            .map(|path| {
                let report = analyze_single_file(analyzer, cancel, path, with_grid);
                pb.inc(1);
                report
            })
            .collect()
    });

    let analyzed = reports.iter().filter(|r| r.result.is_ok()).count() as u64;
    let failed = reports.len() as u64 - analyzed;
    pb.finish_with_message(format!("{analyzed} analyzed, {failed} failed"));

    BatchResult {
        analyzed,
        failed,
        reports,
    }
}

fn analyze_single_file(
    analyzer: &Analyzer,
    cancel: &CancelToken,
    path: PathBuf,
    with_grid: bool,
) -> FileReport {
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unknown.mp3")
        .to_string();
    log::debug!("Analyzing: {file_name}");

    let key_tags = tags::read_key_tags(&path);

    let result = std::fs::read(&path)
        .map_err(AnalyzeError::from)
        .and_then(|data| match &key_tags.initial_key {
            Some(key) => analyzer.analyze_with_key(cancel, &data, &file_name, key, ""),
            None => analyzer.analyze(cancel, &data, &file_name),
        });

    if let Err(e) = &result {
        log::warn!("{}: {e}", path.display());
    }

    let mut duration_secs = key_tags.duration_secs;
    let mut grid = None;
    if with_grid {
        if let Ok(analysis) = &result {
            if duration_secs.is_none() {
                duration_secs = path
                    .to_str()
                    .and_then(|p| analyzer.probe_duration(cancel, p).ok());
            }
            if let Some(duration) = duration_secs {
                grid = BeatGrid::calculate(analysis.bpm, duration, 0.0);
            }
        }
    }

    FileReport {
        path,
        result,
        duration_secs,
        grid,
    }
}
