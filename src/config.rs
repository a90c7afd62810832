use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::analyzer::{AnalyzerConfig, DEFAULT_FFMPEG, DEFAULT_FFPROBE};
use crate::validate;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the ffmpeg binary (overridden by `FFMPEG_PATH`).
    pub ffmpeg_path: Option<String>,
    /// Path to the ffprobe binary (overridden by `FFPROBE_PATH`).
    pub ffprobe_path: Option<String>,
    /// Analysis sample rate in Hz. 0 = engine default.
    pub sample_rate: u32,
    /// Per-file analysis timeout in seconds. 0 = engine default.
    pub timeout_secs: u64,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Disable the genre tempo-band tie-break bonus.
    pub no_genre_bonus: bool,
}

impl AppConfig {
    /// Load config from `~/.config/cuegrid/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Build the analyzer configuration. Environment overrides win over the
    /// config file; every binary path passes through the validator and falls
    /// back to the bare default when rejected.
    pub fn analyzer_config(&self) -> AnalyzerConfig {
        let mut config = AnalyzerConfig::default();

        if let Some(path) = &self.ffmpeg_path {
            config.ffmpeg_path = validate::binary_path(path, DEFAULT_FFMPEG);
        }
        if let Some(path) = &self.ffprobe_path {
            config.ffprobe_path = validate::binary_path(path, DEFAULT_FFPROBE);
        }
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            config.ffmpeg_path = validate::binary_path(&path, DEFAULT_FFMPEG);
        }
        if let Ok(path) = std::env::var("FFPROBE_PATH") {
            config.ffprobe_path = validate::binary_path(&path, DEFAULT_FFPROBE);
        }

        if self.sample_rate > 0 {
            config.sample_rate = self.sample_rate;
        }
        if self.timeout_secs > 0 {
            config.timeout = Duration::from_secs(self.timeout_secs);
        }
        if self.no_genre_bonus {
            config.tempo.genre_bonus = &[];
        }
        config
    }

    /// Get the config file path.
    fn config_path() -> Option<std::path::PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
