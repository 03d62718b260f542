//! Positional line diff
//!
//! Index-aligned comparison of two snapshots. Cheap (O(min(n, m))) and blind
//! to moved blocks: an insertion near the top shows up as a run of modified
//! lines plus a trailing addition. Good enough to measure how much a human
//! touched generated output, not an edit-distance algorithm.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("snapshot is not text: {0}")]
    NotText(String),
}

/// What happened to a run of lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Modified,
    Added,
    Removed,
}

/// Contiguous run of affected lines, `start` is a 0-based line index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub kind: RegionKind,
    pub start: usize,
    pub len: usize,
}

impl Region {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Line-difference statistics between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffStats {
    pub lines_added: usize,
    pub lines_removed: usize,
    pub lines_modified: usize,
    /// In [0, 100], one decimal
    pub change_percentage: f64,
    /// Sorted by start, non-overlapping
    pub regions: Vec<Region>,
}

impl DiffStats {
    pub fn total_changed_lines(&self) -> usize {
        self.lines_modified + self.lines_added + self.lines_removed
    }

    pub fn is_unchanged(&self) -> bool {
        self.total_changed_lines() == 0
    }
}

/// Compare two line sequences position by position
pub fn compute_diff<B, A>(before: &[B], after: &[A]) -> DiffStats
where
    B: AsRef<str>,
    A: AsRef<str>,
{
    let shared = before.len().min(after.len());
    let longest = before.len().max(after.len());

    let lines_added = after.len().saturating_sub(before.len());
    let lines_removed = before.len().saturating_sub(after.len());

    let mut regions = Vec::new();
    let mut lines_modified = 0;
    let mut run_start: Option<usize> = None;

    for i in 0..shared {
        if before[i].as_ref() != after[i].as_ref() {
            lines_modified += 1;
            run_start.get_or_insert(i);
        } else if let Some(start) = run_start.take() {
            regions.push(Region { kind: RegionKind::Modified, start, len: i - start });
        }
    }
    if let Some(start) = run_start {
        regions.push(Region { kind: RegionKind::Modified, start, len: shared - start });
    }

    // Only one of these can be non-zero
    if lines_added > 0 {
        regions.push(Region { kind: RegionKind::Added, start: shared, len: lines_added });
    } else if lines_removed > 0 {
        regions.push(Region { kind: RegionKind::Removed, start: shared, len: lines_removed });
    }

    let change_percentage = if longest == 0 {
        0.0
    } else {
        let changed = (lines_modified + lines_added + lines_removed) as f64;
        round1(100.0 * changed / longest as f64).clamp(0.0, 100.0)
    };

    DiffStats {
        lines_added,
        lines_removed,
        lines_modified,
        change_percentage,
        regions,
    }
}

/// Diff two text snapshots
pub fn diff_text(before: &str, after: &str) -> Result<DiffStats, DiffError> {
    ensure_text(before)?;
    ensure_text(after)?;

    let before: Vec<&str> = before.lines().collect();
    let after: Vec<&str> = after.lines().collect();
    Ok(compute_diff(&before, &after))
}

/// Diff two raw byte snapshots, rejecting anything that isn't UTF-8 text
pub fn diff_bytes(before: &[u8], after: &[u8]) -> Result<DiffStats, DiffError> {
    let before = std::str::from_utf8(before)
        .map_err(|e| DiffError::NotText(format!("before snapshot: {}", e)))?;
    let after = std::str::from_utf8(after)
        .map_err(|e| DiffError::NotText(format!("after snapshot: {}", e)))?;
    diff_text(before, after)
}

fn ensure_text(snapshot: &str) -> Result<(), DiffError> {
    if snapshot.contains('\0') {
        return Err(DiffError::NotText("snapshot contains NUL bytes".to_string()));
    }
    Ok(())
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
