use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Key-related tags read from audio file metadata.
#[derive(Debug, Default)]
pub struct KeyTags {
    /// Initial key as written by tagging tools, e.g. "Am", "F#", "Abm"
    pub initial_key: Option<String>,
    /// Track duration from the container properties
    pub duration_secs: Option<f64>,
}

/// Read the initial-key tag and duration from an audio file. Returns empty
/// tags on any failure — untagged files are the common case, not an error.
pub fn read_key_tags(path: &Path) -> KeyTags {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {}", path.display(), e);
            return KeyTags::default();
        }
    };

    let duration_secs = {
        let secs = tagged_file.properties().duration().as_secs_f64();
        if secs > 0.0 { Some(secs) } else { None }
    };

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
    let initial_key = tag
        .and_then(|t| t.get_string(&ItemKey::InitialKey))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    KeyTags {
        initial_key,
        duration_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_empty_tags() {
        let tags = read_key_tags(Path::new("/nonexistent/track.mp3"));
        assert!(tags.initial_key.is_none());
        assert!(tags.duration_secs.is_none());
    }
}
