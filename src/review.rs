use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::scan::has_image_extension;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Discarded folder not found: {path}")]
    Missing { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardedFile {
    pub name: String,
    pub byte_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionGroup {
    pub width: u32,
    pub height: u32,
    pub files: Vec<DiscardedFile>,
}

impl ResolutionGroup {
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscardedReview {
    /// Largest resolution first.
    pub groups: Vec<ResolutionGroup>,
    pub unreadable: Vec<(PathBuf, String)>,
    pub total_images: usize,
    pub total_bytes: u64,
}

/// Summarise what is sitting in the discarded folder, by resolution.
pub fn review_discarded(
    discarded_dir: &Path,
    extensions: &[String],
) -> Result<DiscardedReview, ReviewError> {
    if !discarded_dir.is_dir() {
        return Err(ReviewError::Missing {
            path: discarded_dir.to_path_buf(),
        });
    }
    let read_err = |source| ReviewError::Read {
        path: discarded_dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(discarded_dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && has_image_extension(&path, extensions) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut review = DiscardedReview::default();
    let mut by_size: BTreeMap<(u32, u32), Vec<DiscardedFile>> = BTreeMap::new();
    for path in paths {
        let dimensions = match image::image_dimensions(&path) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Could not read {}: {}", path.display(), e);
                review.unreadable.push((path, e.to_string()));
                continue;
            }
        };
        let byte_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        review.total_images += 1;
        review.total_bytes += byte_size;
        by_size
            .entry(dimensions)
            .or_default()
            .push(DiscardedFile { name, byte_size });
    }

    review.groups = by_size
        .into_iter()
        .map(|((width, height), files)| ResolutionGroup {
            width,
            height,
            files,
        })
        .collect();
    review.groups.sort_by(|a, b| {
        b.pixel_count()
            .cmp(&a.pixel_count())
            .then(b.width.cmp(&a.width))
    });
    Ok(review)
}

/// Human-readable byte count, e.g. `1.5 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
