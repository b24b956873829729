use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    pub recursive: bool,
    /// Directory whose contents are never scanned (the discarded folder).
    pub exclude_dir: Option<PathBuf>,
}

/// Find image files under `dir`, sorted by path so ids are stable between runs.
pub fn discover_images(dir: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut images = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| match &options.exclude_dir {
            Some(excluded) => entry.path() != excluded.as_path(),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // The root itself failing is fatal, anything below it is skipped.
            Err(e) if e.depth() == 0 => return Err(ScanError::Walk(e)),
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if has_image_extension(entry.path(), &options.extensions) {
            images.push(entry.into_path());
        }
    }

    images.sort();
    Ok(images)
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions.iter().any(|allowed| *allowed == ext)
        })
        .unwrap_or(false)
}
