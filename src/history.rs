//! Append-only JSON-lines log of applied decisions, and undo.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cull::AppliedDecision;
use crate::engine::DecisionKind;

pub const ACTION_MOVED: &str = "moved";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Could not open history file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write history file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize history record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("No valid 'moved' history records to restore")]
    Empty,

    #[error("Invalid history index {index}; valid range is 0..{last}")]
    InvalidIndex { index: usize, last: usize },

    #[error("Failed to restore {from} → {to}: {source}")]
    Restore {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedFile {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CullHistoryRecord {
    pub timestamp: String,
    pub kind: DecisionKind,
    /// Keeper path after the decision was applied.
    pub retained: PathBuf,
    /// Keeper path before any dimension rename.
    pub retained_original: PathBuf,
    pub culled: Vec<MovedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub action: String,
}

impl CullHistoryRecord {
    pub fn from_applied(applied: &AppliedDecision) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            kind: applied.kind,
            retained: applied.keeper_after.clone(),
            retained_original: applied.keeper_before.clone(),
            culled: vec![applied.discarded.clone()],
            confidence: applied.confidence,
            action: ACTION_MOVED.to_string(),
        }
    }
}

/// Which records `restore` should undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSelection {
    Latest,
    Index(usize),
    All,
}

#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub records: usize,
    pub restored: Vec<MovedFile>,
    /// Files left where they are, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn append(&self, records: &[CullHistoryRecord]) -> Result<(), HistoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryError::Open {
                path: self.path.clone(),
                source,
            })?;

        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(out, "{line}").map_err(|source| HistoryError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Every well-formed record, in file order. Malformed lines are skipped.
    pub fn load(&self) -> Result<Vec<CullHistoryRecord>, HistoryError> {
        let file = File::open(&self.path).map_err(|source| HistoryError::Open {
            path: self.path.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| HistoryError::Open {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CullHistoryRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
            }
        }
        Ok(records)
    }

    /// Undo the selected `moved` records and drop them from the log.
    ///
    /// Indices refer to the list of `moved` records. Records are undone
    /// newest first so keeper renames unwind in order.
    pub fn restore(&self, selection: RestoreSelection) -> Result<RestoreSummary, HistoryError> {
        let stored: Vec<CullHistoryRecord> = self
            .load()?
            .into_iter()
            .filter(|r| r.action == ACTION_MOVED)
            .collect();
        if stored.is_empty() {
            return Err(HistoryError::Empty);
        }

        let last = stored.len() - 1;
        let indices: Vec<usize> = match selection {
            RestoreSelection::All => (0..stored.len()).collect(),
            RestoreSelection::Latest => vec![last],
            RestoreSelection::Index(index) if index <= last => vec![index],
            RestoreSelection::Index(index) => {
                return Err(HistoryError::InvalidIndex { index, last });
            }
        };

        let mut summary = RestoreSummary {
            records: indices.len(),
            ..RestoreSummary::default()
        };
        for &i in indices.iter().rev() {
            restore_record(&stored[i], &mut summary)?;
        }

        let remaining: Vec<String> = stored
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, record)| serde_json::to_string(record))
            .collect::<Result<_, _>>()?;
        let content = if remaining.is_empty() {
            String::new()
        } else {
            remaining.join("\n") + "\n"
        };
        fs::write(&self.path, content).map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })?;

        Ok(summary)
    }
}

fn restore_record(
    record: &CullHistoryRecord,
    summary: &mut RestoreSummary,
) -> Result<(), HistoryError> {
    log::info!(
        "Restoring {} file(s) from record {}",
        record.culled.len(),
        record.timestamp
    );

    for moved in &record.culled {
        if !moved.to.exists() {
            summary
                .skipped
                .push((moved.to.clone(), "no longer in the discarded folder".to_string()));
            continue;
        }
        if moved.from.exists() {
            summary
                .skipped
                .push((moved.to.clone(), format!("{} already exists", moved.from.display())));
            continue;
        }
        move_back(&moved.to, &moved.from)?;
        summary.restored.push(MovedFile {
            from: moved.to.clone(),
            to: moved.from.clone(),
        });
    }

    let renamed = record.retained != record.retained_original;
    if renamed && record.retained.exists() && !record.retained_original.exists() {
        move_back(&record.retained, &record.retained_original)?;
    }
    Ok(())
}

fn move_back(from: &Path, to: &Path) -> Result<(), HistoryError> {
    fs::rename(from, to).map_err(|source| HistoryError::Restore {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    log::info!("Restored {} → {}", from.display(), to.display());
    Ok(())
}
