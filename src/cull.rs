//! Applying engine decisions to the filesystem.
//!
//! Discards are moved into the discarded folder; keepers are renamed to carry
//! their dimensions (`photo.jpg` -> `photo-1920x1080.jpg`). Neither step ever
//! overwrites an existing file. File names need not be valid UTF-8.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::{Decision, DecisionKind, ImageId};
use crate::extract::Catalog;
use crate::history::{CullHistoryRecord, HistoryError, HistoryLog, MovedFile};

#[derive(Debug, Error)]
pub enum CullError {
    #[error("Unknown image {0}")]
    UnknownImage(ImageId),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} → {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path has no file name: {path}")]
    NoFileName { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct CullOptions {
    pub discarded_dir: PathBuf,
    /// Compute every move and rename but leave the files alone.
    pub dry_run: bool,
}

/// What happened (or would happen, in a dry run) for one decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedDecision {
    pub kind: DecisionKind,
    pub discarded: MovedFile,
    /// Keeper location before this decision was applied.
    pub keeper_before: PathBuf,
    /// Keeper location afterwards; equal to `keeper_before` when no rename was needed.
    pub keeper_after: PathBuf,
    pub confidence: Option<f64>,
    pub dry_run: bool,
}

/// Outcome of [`Culler::apply_all`].
#[derive(Debug, Default)]
pub struct CullRun {
    pub applied: Vec<AppliedDecision>,
    /// Decisions that were skipped, by position in the input.
    pub failed: Vec<(usize, CullError)>,
}

pub struct Culler<'a> {
    catalog: &'a Catalog,
    options: CullOptions,
    /// Current location of every image touched so far.
    locations: HashMap<ImageId, PathBuf>,
    /// Destinations handed out during a dry run.
    reserved: HashSet<PathBuf>,
    /// Paths a dry run has moved away from. They still exist on disk.
    vacated: HashSet<PathBuf>,
    dir_ready: bool,
}

impl<'a> Culler<'a> {
    pub fn new(catalog: &'a Catalog, options: CullOptions) -> Self {
        Self {
            catalog,
            options,
            locations: HashMap::new(),
            reserved: HashSet::new(),
            vacated: HashSet::new(),
            dir_ready: false,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Where an image is now, taking earlier renames into account.
    pub fn location(&self, id: ImageId) -> Option<PathBuf> {
        self.locations
            .get(&id)
            .cloned()
            .or_else(|| self.catalog.get(id).map(|e| e.path.clone()))
    }

    /// Apply `decisions` in order.
    ///
    /// Each applied decision is appended to `history` before the next one is
    /// attempted, so everything that was moved can be restored even if a
    /// later decision fails. Failing decisions are logged and skipped.
    /// Nothing is recorded in a dry run.
    pub fn apply_all<F>(
        &mut self,
        decisions: &[Decision],
        history: Option<&HistoryLog>,
        mut on_applied: F,
    ) -> Result<CullRun, HistoryError>
    where
        F: FnMut(usize, &AppliedDecision),
    {
        let mut run = CullRun::default();
        for (i, decision) in decisions.iter().enumerate() {
            match self.apply(decision) {
                Ok(applied) => {
                    if let Some(history) = history.filter(|_| !applied.dry_run) {
                        history.append(&[CullHistoryRecord::from_applied(&applied)])?;
                    }
                    on_applied(i, &applied);
                    run.applied.push(applied);
                }
                Err(e) => {
                    log::warn!("Skipping decision {} ({}): {}", i + 1, decision.reason(), e);
                    run.failed.push((i, e));
                }
            }
        }
        Ok(run)
    }

    pub fn apply(&mut self, decision: &Decision) -> Result<AppliedDecision, CullError> {
        let discard_id = decision.discard();
        let keep_id = decision.keep();
        let discard_path = self
            .location(discard_id)
            .ok_or(CullError::UnknownImage(discard_id))?;
        let keeper = self
            .catalog
            .get(keep_id)
            .ok_or(CullError::UnknownImage(keep_id))?;
        let (width, height) = (keeper.width, keeper.height);
        let keeper_before = self
            .location(keep_id)
            .ok_or(CullError::UnknownImage(keep_id))?;

        let discarded = self.move_to_discarded(&discard_path, &decision.reason())?;
        self.locations.insert(discard_id, discarded.to.clone());

        // The discard has moved; a failed rename must not hide that.
        let keeper_after = match self.rename_with_dimensions(&keeper_before, width, height) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Keeping {} under its old name: {}", keeper_before.display(), e);
                keeper_before.clone()
            }
        };
        self.locations.insert(keep_id, keeper_after.clone());

        Ok(AppliedDecision {
            kind: decision.kind(),
            discarded,
            keeper_before,
            keeper_after,
            confidence: decision.confidence(),
            dry_run: self.options.dry_run,
        })
    }

    fn is_taken(&self, path: &Path) -> bool {
        self.reserved.contains(path) || (path.exists() && !self.vacated.contains(path))
    }

    fn move_to_discarded(&mut self, path: &Path, reason: &str) -> Result<MovedFile, CullError> {
        let file_name = path.file_name().ok_or_else(|| CullError::NoFileName {
            path: path.to_path_buf(),
        })?;
        let dest = unique_destination(&self.options.discarded_dir, file_name, |p| self.is_taken(p));

        if self.options.dry_run {
            log::info!("[DRY RUN] Would move: {} -> {} ({})", path.display(), dest.display(), reason);
            self.reserved.insert(dest.clone());
            self.vacated.insert(path.to_path_buf());
        } else {
            self.ensure_discarded_dir()?;
            fs::rename(path, &dest).map_err(|source| CullError::Move {
                from: path.to_path_buf(),
                to: dest.clone(),
                source,
            })?;
            log::info!("Moved: {} -> {} ({})", path.display(), dest.display(), reason);
        }

        Ok(MovedFile {
            from: path.to_path_buf(),
            to: dest,
        })
    }

    fn rename_with_dimensions(
        &mut self,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<PathBuf, CullError> {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let stem = path.file_stem().ok_or_else(|| CullError::NoFileName {
            path: path.to_path_buf(),
        })?;
        let base = dimensionless_stem(stem);
        let dims = format!("-{width}x{height}");
        let ext = path.extension();

        let mut new_path = parent.join(join_name(base, &dims, ext));
        if new_path == path {
            return Ok(new_path);
        }

        let mut counter = 1;
        while self.is_taken(&new_path) && new_path != path {
            new_path = parent.join(join_name(base, &format!("{dims}_{counter}"), ext));
            counter += 1;
        }
        if new_path == path {
            return Ok(new_path);
        }

        if self.options.dry_run {
            log::info!("[DRY RUN] Would rename: {} -> {}", path.display(), new_path.display());
            self.reserved.remove(path);
            self.vacated.insert(path.to_path_buf());
            self.reserved.insert(new_path.clone());
        } else {
            fs::rename(path, &new_path).map_err(|source| CullError::Move {
                from: path.to_path_buf(),
                to: new_path.clone(),
                source,
            })?;
            log::info!("Renamed: {} -> {}", path.display(), new_path.display());
        }
        Ok(new_path)
    }

    fn ensure_discarded_dir(&mut self) -> Result<(), CullError> {
        if self.dir_ready {
            return Ok(());
        }
        let dir = &self.options.discarded_dir;
        fs::create_dir_all(dir).map_err(|source| CullError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        self.dir_ready = true;
        Ok(())
    }
}

/// `<stem><suffix>.<ext>`, byte for byte.
fn join_name(stem: &OsStr, suffix: &str, ext: Option<&OsStr>) -> OsString {
    let mut name = stem.to_os_string();
    name.push(suffix);
    if let Some(ext) = ext {
        name.push(".");
        name.push(ext);
    }
    name
}

/// Non-UTF-8 stems are kept whole.
fn dimensionless_stem(stem: &OsStr) -> &OsStr {
    match stem.to_str() {
        Some(s) => OsStr::new(strip_dimension_suffix(s)),
        None => stem,
    }
}

/// Drop a trailing `-<W>x<H>` from a file stem.
pub fn strip_dimension_suffix(stem: &str) -> &str {
    let Some((base, suffix)) = stem.rsplit_once('-') else {
        return stem;
    };
    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match suffix.split_once('x') {
        Some((w, h)) if is_digits(w) && is_digits(h) => base,
        _ => stem,
    }
}

/// File name for a keeper of the given size, e.g. `photo-800x600.jpg`.
pub fn dimension_file_name(path: &Path, width: u32, height: u32) -> Option<OsString> {
    let stem = path.file_stem()?;
    Some(join_name(
        dimensionless_stem(stem),
        &format!("-{width}x{height}"),
        path.extension(),
    ))
}

/// `dir/file_name`, or `dir/stem_N.ext` for the first N that is not taken.
pub fn unique_destination<N, F>(dir: &Path, file_name: N, is_taken: F) -> PathBuf
where
    N: AsRef<OsStr>,
    F: Fn(&Path) -> bool,
{
    let file_name = file_name.as_ref();
    let dest = dir.join(file_name);
    if !is_taken(&dest) {
        return dest;
    }

    let as_path = Path::new(file_name);
    let stem = as_path.file_stem().unwrap_or(file_name);
    let ext = as_path.extension();
    let mut counter = 1;
    loop {
        let candidate = dir.join(join_name(stem, &format!("_{counter}"), ext));
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FeatureExtractor;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path)?;
        Ok(())
    }

    fn catalog_for(paths: &[PathBuf]) -> Catalog {
        FeatureExtractor::new().extract_all(paths, |_| {}).catalog
    }

    #[test]
    fn test_strip_dimension_suffix() {
        assert_eq!(strip_dimension_suffix("photo-1200x800"), "photo");
        assert_eq!(strip_dimension_suffix("my-photo"), "my-photo");
        assert_eq!(strip_dimension_suffix("photo-x800"), "photo-x800");
        assert_eq!(strip_dimension_suffix("a-b-10x20"), "a-b");
        assert_eq!(strip_dimension_suffix("plain"), "plain");
    }

    #[test]
    fn test_dimension_file_name() {
        let name = dimension_file_name(Path::new("/x/shot-10x10.JPG"), 640, 480);
        assert_eq!(name, Some(OsString::from("shot-640x480.JPG")));
    }

    #[test]
    fn test_unique_destination_counts_up() {
        let dir = Path::new("/d");
        let taken: HashSet<PathBuf> = [dir.join("a.png"), dir.join("a_1.png")].into();
        let dest = unique_destination(dir, "a.png", |p| taken.contains(p));
        assert_eq!(dest, dir.join("a_2.png"));
        assert_eq!(unique_destination(dir, "b.png", |p| taken.contains(p)), dir.join("b.png"));
    }

    #[test]
    fn test_apply_moves_and_renames() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let big = root.join("cat.png");
        let small = root.join("cat_small.png");
        create_test_image(&big, 64, 48).unwrap();
        create_test_image(&small, 32, 24).unwrap();

        let catalog = catalog_for(&[big.clone(), small.clone()]);
        let mut culler = Culler::new(
            &catalog,
            CullOptions {
                discarded_dir: root.join("discarded"),
                dry_run: false,
            },
        );
        let applied = culler
            .apply(&Decision::ScaledDuplicate {
                keep: ImageId(0),
                discard: ImageId(1),
                confidence: 0.97,
                reasons: Vec::new(),
            })
            .unwrap();

        assert!(!small.exists());
        assert!(root.join("discarded").join("cat_small.png").exists());
        assert!(!big.exists());
        assert_eq!(applied.keeper_after, root.join("cat-64x48.png"));
        assert!(applied.keeper_after.exists());
        assert_eq!(culler.location(ImageId(0)), Some(root.join("cat-64x48.png")));
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let a = root.join("a.png");
        let b = root.join("b.png");
        create_test_image(&a, 20, 20).unwrap();
        fs::copy(&a, &b).unwrap();

        let catalog = catalog_for(&[a.clone(), b.clone()]);
        let mut culler = Culler::new(
            &catalog,
            CullOptions {
                discarded_dir: root.join("discarded"),
                dry_run: true,
            },
        );
        let applied = culler
            .apply(&Decision::ExactDuplicate {
                keep: ImageId(0),
                discard: ImageId(1),
            })
            .unwrap();

        assert!(applied.dry_run);
        assert_eq!(applied.discarded.to, root.join("discarded").join("b.png"));
        assert_eq!(applied.keeper_after, root.join("a-20x20.png"));
        assert!(a.exists() && b.exists());
        assert!(!root.join("discarded").exists());
    }

    #[test]
    fn test_repeated_keeper_renamed_once() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let a = root.join("a.png");
        let b = root.join("b.png");
        let c = root.join("c.png");
        create_test_image(&a, 20, 20).unwrap();
        fs::copy(&a, &b).unwrap();
        fs::copy(&a, &c).unwrap();

        let catalog = catalog_for(&[a.clone(), b.clone(), c.clone()]);
        let mut culler = Culler::new(
            &catalog,
            CullOptions {
                discarded_dir: root.join("discarded"),
                dry_run: false,
            },
        );
        for discard in [1, 2] {
            culler
                .apply(&Decision::ExactDuplicate {
                    keep: ImageId(0),
                    discard: ImageId(discard),
                })
                .unwrap();
        }

        let kept = root.join("a-20x20.png");
        assert!(kept.exists());
        assert_eq!(culler.location(ImageId(0)), Some(kept));
        assert!(root.join("discarded").join("b.png").exists());
        assert!(root.join("discarded").join("c.png").exists());
    }

    #[test]
    fn test_dry_run_sees_names_freed_by_earlier_moves() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let big = root.join("a.png");
        // The smaller copy already holds the name the keeper will take.
        let small = root.join("a-40x30.png");
        create_test_image(&big, 40, 30).unwrap();
        create_test_image(&small, 20, 15).unwrap();

        let catalog = catalog_for(&[big.clone(), small.clone()]);
        let decision = Decision::ScaledDuplicate {
            keep: ImageId(0),
            discard: ImageId(1),
            confidence: 0.95,
            reasons: Vec::new(),
        };
        let options = |dry_run| CullOptions {
            discarded_dir: root.join("discarded"),
            dry_run,
        };

        let planned = Culler::new(&catalog, options(true)).apply(&decision).unwrap();
        let done = Culler::new(&catalog, options(false)).apply(&decision).unwrap();

        assert_eq!(planned.keeper_after, root.join("a-40x30.png"));
        assert_eq!(planned.keeper_after, done.keeper_after);
        assert_eq!(planned.discarded.to, done.discarded.to);
        assert!(done.keeper_after.exists());
        assert!(!big.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_file_name_is_moved() {
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let keep = root.join("a.png");
        let odd = root.join(OsStr::from_bytes(b"\xff.png"));
        create_test_image(&keep, 16, 16).unwrap();
        fs::copy(&keep, &odd).unwrap();

        let catalog = catalog_for(&[keep.clone(), odd.clone()]);
        let mut culler = Culler::new(
            &catalog,
            CullOptions {
                discarded_dir: root.join("discarded"),
                dry_run: false,
            },
        );
        let applied = culler
            .apply(&Decision::ExactDuplicate {
                keep: ImageId(0),
                discard: ImageId(1),
            })
            .unwrap();

        let expected = root.join("discarded").join(OsStr::from_bytes(b"\xff.png"));
        assert_eq!(applied.discarded.to, expected);
        assert!(expected.exists());
        assert!(!odd.exists());
    }

    #[test]
    fn test_apply_all_skips_failures_and_records_the_rest() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let paths: Vec<PathBuf> = ["a.png", "b.png", "c.png"]
            .iter()
            .map(|n| root.join(n))
            .collect();
        create_test_image(&paths[0], 20, 20).unwrap();
        fs::copy(&paths[0], &paths[1]).unwrap();
        fs::copy(&paths[0], &paths[2]).unwrap();
        let catalog = catalog_for(&paths);
        // Gone before culling starts, so its decision cannot be applied.
        fs::remove_file(&paths[1]).unwrap();

        let decisions = [
            Decision::ExactDuplicate {
                keep: ImageId(0),
                discard: ImageId(1),
            },
            Decision::ExactDuplicate {
                keep: ImageId(0),
                discard: ImageId(2),
            },
        ];
        let history = HistoryLog::new(root.join(".history.jsonl"));
        let mut culler = Culler::new(
            &catalog,
            CullOptions {
                discarded_dir: root.join("discarded"),
                dry_run: false,
            },
        );
        let mut seen = Vec::new();
        let run = culler
            .apply_all(&decisions, Some(&history), |i, _| seen.push(i))
            .unwrap();

        assert_eq!(seen, vec![1]);
        assert_eq!(run.applied.len(), 1);
        assert_eq!(run.failed.len(), 1);
        assert_eq!(run.failed[0].0, 0);
        assert!(matches!(run.failed[0].1, CullError::Move { .. }));
        assert_eq!(history.load().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_image() {
        let catalog = Catalog::default();
        let mut culler = Culler::new(
            &catalog,
            CullOptions {
                discarded_dir: PathBuf::from("discarded"),
                dry_run: true,
            },
        );
        let err = culler
            .apply(&Decision::ExactDuplicate {
                keep: ImageId(0),
                discard: ImageId(1),
            })
            .unwrap_err();
        assert!(matches!(err, CullError::UnknownImage(ImageId(1))));
    }
}
