//! PCM extraction boundary: the only place cuegrid talks to an external
//! decoder. Input bytes land in a temp file, ffmpeg turns them into mono
//! s16le at the analysis rate, and the child is killed promptly on
//! cancellation or deadline. Every caller-influenced string goes through
//! `validate` before it reaches a command line.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

use super::CancelToken;
use crate::validate;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty audio input")]
    EmptyInput,
    #[error("invalid input: {0}")]
    Validation(#[from] validate::ValidationError),
    #[error("decoder error: {0}")]
    Ffmpeg(String),
    #[error("decode timed out after {0:?}")]
    Timeout(Duration),
    #[error("decode cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio container formats the engine recognizes from a filename. Anything
/// else is `Unknown` and still handed to the decoder, which sniffs the real
/// format itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Mp3,
    Flac,
    Wav,
    Aac,
    Ogg,
    Unknown,
}

impl Format {
    /// Total mapping from a filename's extension to a format variant.
    pub fn from_file_name(file_name: &str) -> Self {
        let lower = file_name.to_lowercase();
        match lower.rsplit_once('.').map(|(_, ext)| ext) {
            Some("mp3") => Self::Mp3,
            Some("flac") => Self::Flac,
            Some("wav") => Self::Wav,
            Some("aac") | Some("m4a") => Self::Aac,
            Some("ogg") => Self::Ogg,
            _ => Self::Unknown,
        }
    }
}

/// How often the child process is polled for exit, cancellation, and
/// deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Keeps concurrent decodes in one process from colliding on temp names.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Decode an audio byte stream to mono PCM at `sample_rate`, normalized to
/// [-1, 1]. The filename only hints the container format via its (sanitized)
/// extension. Fails without spawning anything on empty input, an invalid
/// filename, or a pre-cancelled token.
pub fn decode_to_mono(
    ffmpeg_path: &str,
    sample_rate: u32,
    cancel: &CancelToken,
    timeout: Duration,
    data: &[u8],
    file_name: &str,
) -> Result<Vec<f64>, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::EmptyInput);
    }
    validate::input_path(file_name)?;
    if cancel.is_cancelled() {
        return Err(DecodeError::Cancelled);
    }

    let format = Format::from_file_name(file_name);
    log::debug!("decode: {file_name} hinted as {format:?}");
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => validate::sanitize_extension(&format!(".{ext}")),
        None => validate::DEFAULT_EXTENSION,
    };
    let tmp_path = temp_audio_path(ext);
    std::fs::write(&tmp_path, data)?;

    let result = run_ffmpeg(ffmpeg_path, sample_rate, cancel, timeout, &tmp_path);
    std::fs::remove_file(&tmp_path).ok();
    result
}

fn temp_audio_path(ext: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("cuegrid-{}-{n}{ext}", std::process::id()))
}

/// Spawn ffmpeg against the temp file and collect raw s16le from stdout,
/// polling for completion so cancellation and the deadline can kill the
/// child mid-decode.
fn run_ffmpeg(
    ffmpeg_path: &str,
    sample_rate: u32,
    cancel: &CancelToken,
    timeout: Duration,
    input_path: &Path,
) -> Result<Vec<f64>, DecodeError> {
    let mut child = Command::new(ffmpeg_path)
        .arg("-i")
        .arg(input_path)
        .args([
            "-ac",
            "1",
            "-ar",
            &sample_rate.to_string(),
            "-f",
            "s16le",
            "-acodec",
            "pcm_s16le",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes off-thread so a chatty decoder can't deadlock the
    // poll loop
    let stdout = child.stdout.take();
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout {
            pipe.read_to_end(&mut buf).ok();
        }
        buf
    });
    let stderr = child.stderr.take();
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr {
            pipe.read_to_string(&mut buf).ok();
        }
        buf
    });

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            child.kill().ok();
            child.wait().ok();
            return Err(DecodeError::Cancelled);
        }
        if started.elapsed() >= timeout {
            child.kill().ok();
            child.wait().ok();
            return Err(DecodeError::Timeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let raw = stdout_reader.join().unwrap_or_default();
    let stderr_text = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(DecodeError::Ffmpeg(trim_stderr(&stderr_text)));
    }
    Ok(samples_from_s16le(&raw))
}

/// ffmpeg failure output can run to pages; the last lines carry the actual
/// error.
fn trim_stderr(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines.len().saturating_sub(4);
    lines[tail..].join("\n")
}

/// Convert signed 16-bit little-endian PCM bytes to [-1, 1] floats. A
/// trailing odd byte is dropped.
fn samples_from_s16le(data: &[u8]) -> Vec<f64> {
    data.chunks_exact(2)
        .map(|pair| f64::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Read a track's duration in seconds via ffprobe. Used when the caller
/// wants a beat grid and the container's tags don't carry a duration.
pub fn probe_duration(
    ffprobe_path: &str,
    cancel: &CancelToken,
    timeout: Duration,
    audio_path: &str,
) -> Result<f64, DecodeError> {
    validate::input_path(audio_path)?;
    if cancel.is_cancelled() {
        return Err(DecodeError::Cancelled);
    }

    let mut child = Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(audio_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = stdout {
            pipe.read_to_string(&mut buf).ok();
        }
        buf
    });
    let stderr = child.stderr.take();
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr {
            pipe.read_to_string(&mut buf).ok();
        }
        buf
    });

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            child.kill().ok();
            child.wait().ok();
            return Err(DecodeError::Cancelled);
        }
        if started.elapsed() >= timeout {
            child.kill().ok();
            child.wait().ok();
            return Err(DecodeError::Timeout(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let out = stdout_reader.join().unwrap_or_default();
    let stderr_text = stderr_reader.join().unwrap_or_default();
    if !status.success() {
        return Err(DecodeError::Ffmpeg(trim_stderr(&stderr_text)));
    }
    out.trim()
        .parse::<f64>()
        .map_err(|e| DecodeError::Ffmpeg(format!("unparseable duration: {e}")))
}
