use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::warn;

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "mp4", "ogg", "opus", "wav", "aiff", "wv", "ape",
];

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expands directories into the audio files below them. Plain file arguments
/// are kept as given, whatever their extension.
pub fn expand_inputs<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            let mut found: Vec<PathBuf> = walkdir::WalkDir::new(input)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!("skipping unreadable entry: {}", err);
                        None
                    }
                })
                .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.to_path_buf());
        }
    }
    files
}

/// Drops repeated paths, warning when any were found.
pub fn dedup_paths(paths: Vec<PathBuf>) -> BTreeSet<PathBuf> {
    let total = paths.len();
    let unique: BTreeSet<PathBuf> = paths.into_iter().collect();
    if unique.len() != total {
        warn!(
            "found and ignored {} duplicates in files list",
            total - unique.len()
        );
    }
    unique
}
