use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cuegrid::analyzer::{self, Analyzer, CancelToken};
use cuegrid::beatgrid::BeatGrid;
use cuegrid::{camelot, config::AppConfig};
use serde::Serialize;
use std::path::PathBuf;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "cuegrid", version, about = "BPM and key analysis for DJ music libraries")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze audio files or directories (BPM, key, Camelot notation)
    Analyze {
        /// Files or directories to analyze
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Print one JSON object per file instead of a table
        #[arg(long)]
        json: bool,

        /// Also compute a beat grid from the detected BPM
        #[arg(long)]
        grid: bool,
    },

    /// Compute a beat grid from BPM and duration
    Grid {
        /// Beats per minute (20-300)
        #[arg(long)]
        bpm: i32,

        /// Track duration in seconds
        #[arg(long)]
        duration: f64,

        /// Offset to the first beat in milliseconds
        #[arg(long, default_value = "0")]
        offset: f64,
    },

    /// Look up the Camelot notation and compatible keys for a musical key
    Key {
        /// Musical key, e.g. "Am", "F#", "Abm"
        key: String,

        /// "major" or "minor" (inferred from a trailing "m" if omitted)
        mode: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeLine<'a> {
    path: String,
    #[serde(flatten)]
    analysis: &'a analyzer::AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grid: Option<&'a BeatGrid>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    match cli.command {
        Commands::Analyze {
            paths,
            jobs,
            json,
            grid,
        } => {
            if paths.is_empty() {
                anyhow::bail!("No files to analyze. Pass files or directories as arguments.");
            }
            let files = collect_audio_files(&paths);
            if files.is_empty() {
                anyhow::bail!("No supported audio files found under the given paths.");
            }

            let analyzer = Analyzer::new(config.analyzer_config());
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let cancel = CancelToken::new();

            let batch = analyzer::analyze_files(&analyzer, &cancel, files, workers, grid);
            for report in &batch.reports {
                match &report.result {
                    Ok(analysis) => {
                        if json {
                            let line = AnalyzeLine {
                                path: report.path.display().to_string(),
                                analysis,
                                duration_secs: report.duration_secs,
                                grid: report.grid.as_ref(),
                            };
                            println!("{}", serde_json::to_string(&line)?);
                        } else {
                            print_report_row(report, analysis);
                        }
                    }
                    Err(e) => {
                        eprintln!("{}: {e}", report.path.display());
                    }
                }
            }
            println!(
                "Analysis complete: {} analyzed, {} failed",
                batch.analyzed, batch.failed
            );
        }

        Commands::Grid {
            bpm,
            duration,
            offset,
        } => {
            let grid = BeatGrid::calculate(bpm, duration, offset)
                .context("Invalid grid parameters: BPM must be 20-300 and duration positive")?;
            println!("{}", serde_json::to_string_pretty(&grid)?);
        }

        Commands::Key { key, mode } => {
            let mode = mode.unwrap_or_default();
            match camelot::notation(&key, &mode) {
                Some(code) => {
                    println!("{key} -> {code}");
                    if let Some(compatible) = camelot::compatible_keys(code) {
                        println!("mixes with: {}", compatible.join(", "));
                    }
                }
                None => {
                    println!("{key} -> (no harmonic data)");
                }
            }
        }
    }

    Ok(())
}

/// Expand files and directories into the list of supported audio files.
fn collect_audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if is_supported(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else if path.is_file() {
            // Explicitly named files are taken as-is; the decoder sniffs
            // the real format anyway
            files.push(path.clone());
        } else {
            log::warn!("Skipping {}: not a file or directory", path.display());
        }
    }
    files.sort();
    files
}

fn is_supported(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            cuegrid::SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

fn print_report_row(report: &analyzer::FileReport, analysis: &analyzer::AnalysisResult) {
    let bpm = if analysis.bpm > 0 {
        analysis.bpm.to_string()
    } else {
        "-".to_string()
    };
    let key = if analysis.musical_key.is_empty() {
        "-"
    } else {
        analysis.musical_key.as_str()
    };
    let camelot = if analysis.key_camelot.is_empty() {
        "-"
    } else {
        analysis.key_camelot.as_str()
    };
    let beats = report
        .grid
        .as_ref()
        .map(|g| format!("  {} beats", g.beats.len()))
        .unwrap_or_default();
    println!(
        "{:>4} BPM  {:>4} {:>4}{}  {}",
        bpm,
        key,
        camelot,
        beats,
        report.path.display()
    );
}
