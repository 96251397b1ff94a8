use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
            label
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Delete `path` if present and create it again, empty
pub fn create_output_directory(path: &Path) -> PipelineResult<PathBuf> {
    if path.exists() {
        log::warn!(
            "Directory {:?} already exists. Deleting and recreating it.",
            path
        );
        fs::remove_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
    }
    fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(path.to_path_buf())
}

/// Tile name prefix for a source image: its sanitized file stem
pub fn tile_prefix(image_path: &Path) -> String {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let sanitized = sanitize_filename::sanitize(stem.as_ref());
    if sanitized.is_empty() {
        "image".to_string()
    } else {
        sanitized
    }
}

/// Suffix repeated prefixes with `_1`, `_2`, ... so tile names never collide.
///
/// Input order decides which occurrence keeps the bare name.
pub fn dedupe_prefixes(prefixes: &mut [String]) {
    let mut taken: HashSet<String> = HashSet::new();
    for prefix in prefixes.iter_mut() {
        if taken.insert(prefix.clone()) {
            continue;
        }
        let mut n = 1;
        let mut candidate = format!("{}_{}", prefix, n);
        while taken.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", prefix, n);
        }
        taken.insert(candidate.clone());
        *prefix = candidate;
    }
}
