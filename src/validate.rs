use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("path is empty")]
    EmptyPath,
    #[error("path contains forbidden character {0:?}")]
    ForbiddenCharacter(char),
}

/// Characters that carry meaning to a shell. Every string that ends up on a
/// decoder command line must be free of these, even though we never invoke a
/// shell — a hardened binary path or filename must stay inert if it ever
/// leaks into one.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '(', ')', '{', '}', '>', '<', '\n', '\r',
];

/// Validate a caller-supplied file path before it reaches a subprocess
/// argument. Ordinary absolute or relative paths pass through unchanged,
/// spaces included. Empty strings and anything containing a shell
/// metacharacter are rejected.
pub fn input_path(path: &str) -> Result<&str, ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if let Some(c) = path.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(ValidationError::ForbiddenCharacter(c));
    }
    Ok(path)
}

/// Validate an environment-supplied decoder binary path, falling back to the
/// bare default name when the candidate is unacceptable. Accepted forms are
/// the default name itself, another bare name with no separators, or an
/// absolute path (lexically normalized, so `..` segments cannot escape
/// upward unnoticed). Relative paths with separators, whitespace, and
/// metacharacters all revert to the default.
pub fn binary_path(candidate: &str, default: &str) -> String {
    if candidate.is_empty() {
        return default.to_string();
    }
    if candidate
        .chars()
        .any(|c| SHELL_METACHARACTERS.contains(&c) || c.is_whitespace())
    {
        return default.to_string();
    }

    let path = Path::new(candidate);
    if path.is_absolute() {
        return normalize_lexically(path);
    }
    if !candidate.contains(std::path::MAIN_SEPARATOR) && !candidate.contains('/') {
        // Bare name, resolved via PATH by the OS
        return candidate.to_string();
    }
    default.to_string()
}

/// Resolve `.` and `..` segments without touching the filesystem.
fn normalize_lexically(path: &Path) -> String {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}

/// Extensions safe to hand to the decoder as a format hint.
const ALLOWED_EXTENSIONS: &[&str] = &[
    ".mp3", ".flac", ".wav", ".aac", ".m4a", ".ogg", ".wma", ".aiff",
];

/// Default extension when the original one is unrecognized.
pub const DEFAULT_EXTENSION: &str = ".mp3";

/// Map a file extension (leading dot included) onto the allow-list,
/// case-insensitively. Unknown, empty, multi-dotted, or injected extensions
/// all collapse to [`DEFAULT_EXTENSION`].
pub fn sanitize_extension(ext: &str) -> &'static str {
    let lower = ext.to_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .find(|allowed| **allowed == lower)
        .copied()
        .unwrap_or(DEFAULT_EXTENSION)
}
