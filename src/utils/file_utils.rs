use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::shared::constants;

/// Directory name used for a topic's frames: every `/` becomes `_`.
pub fn sanitize_topic(topic: &str) -> String {
    topic.replace('/', "_")
}

pub fn topic_dir(output_dir: &Path, topic: &str) -> PathBuf {
    output_dir.join(sanitize_topic(topic))
}

pub fn frame_path(topic_dir: &Path, timestamp: u64) -> PathBuf {
    topic_dir.join(format!("{}.{}", timestamp, constants::IMAGE_EXTENSION))
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))
}

pub fn list_files(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == extension))
        .collect();

    // split bags are numbered <name>_0.mcap, <name>_1.mcap, ..., <name>_10.mcap
    files.sort_by(|a, b| {
        a.as_os_str()
            .len()
            .cmp(&b.as_os_str().len())
            .then_with(|| a.cmp(b))
    });

    Ok(files)
}
