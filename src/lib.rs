pub mod analyzer;
pub mod beatgrid;
pub mod camelot;
pub mod config;
pub mod tags;
pub mod validate;

/// Audio file extensions the decoder accepts
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "aac", "m4a", "ogg", "wma", "aiff",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "cuegrid";
