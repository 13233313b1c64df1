//! Size-based rotation of the day-partitioned activity log.
//!
//! Live file: `activity-YYYY-MM-DD.log`. Rotated files keep the date and add a
//! time stamp plus a three-digit counter for rotations within the same
//! millisecond, `activity-YYYY-MM-DD.HHMMSSmmm-NNN.log`, so a lexical sort of
//! the names is also chronological.

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

const PREFIX: &str = "activity-";
const SUFFIX: &str = ".log";

pub(super) fn live_file_name(at: DateTime<Utc>) -> String {
    format!("{PREFIX}{}{SUFFIX}", at.format("%Y-%m-%d"))
}

fn rotated_file_name(at: DateTime<Utc>, collision: u32) -> String {
    format!(
        "{PREFIX}{}-{collision:03}{SUFFIX}",
        at.format("%Y-%m-%d.%H%M%S%3f")
    )
}

/// Rotated logs carry a `.` between the date and the time stamp; live logs do not.
fn is_rotated_name(name: &str) -> bool {
    name.strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .is_some_and(|stem| stem.contains('.'))
}

/// Rotated log files in `dir`, oldest first.
pub async fn rotated_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut names: Vec<String> = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if is_rotated_name(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// Rotate `live` once it has reached `max_bytes`.
///
/// Deletes the oldest rotated files first so that at most `max_rotated` remain
/// after the rename. Returns the new rotated path when a rotation happened.
pub async fn rotate_if_needed(
    live: &Path,
    max_bytes: u64,
    max_rotated: usize,
    now: DateTime<Utc>,
) -> io::Result<Option<PathBuf>> {
    let size = match fs::metadata(live).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if size < max_bytes {
        return Ok(None);
    }

    let dir = live.parent().unwrap_or_else(|| Path::new("."));
    let max_rotated = max_rotated.max(1);
    let mut rotated = rotated_files(dir).await?;
    while rotated.len() >= max_rotated {
        let oldest = rotated.remove(0);
        fs::remove_file(&oldest).await?;
    }

    let mut collision = 0;
    let target = loop {
        let candidate = dir.join(rotated_file_name(now, collision));
        if !fs::try_exists(&candidate).await? {
            break candidate;
        }
        collision += 1;
    };
    fs::rename(live, &target).await?;
    Ok(Some(target))
}
