//! Temp-file cleanup task
//!
//! Walks a set of target directories, deletes files and prunes the
//! directories they leave empty, and reports bytes reclaimed. Individual
//! failures (locked or vanished files) are skipped; the task keeps going.

use anyhow::Result;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::task::TaskContext;

/// Terminal result of a cleanup run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    /// Bytes reclaimed, measured before each deletion.
    pub space_saved: u64,
    pub files_removed: u64,
    /// Files or directories that could not be removed.
    pub errors: u64,
}

impl CleanupReport {
    pub fn space_human(&self) -> String {
        bytesize::to_string(self.space_saved, true)
    }
}

/// The Windows temp and cache locations the original cleanup targets.
/// Directories that don't exist are skipped during the run.
pub fn default_targets() -> Vec<PathBuf> {
    let mut targets = vec![std::env::temp_dir()];

    if let Ok(local_appdata) = std::env::var("LOCALAPPDATA") {
        let local = PathBuf::from(&local_appdata);
        targets.push(local.join("Temp"));
        targets.push(
            local
                .join("Microsoft")
                .join("Windows")
                .join("INetCache"),
        );
        targets.push(local.join("Microsoft").join("Windows").join("Explorer"));
    }

    if let Ok(windir) = std::env::var("WINDIR") {
        targets.push(PathBuf::from(windir).join("Temp"));
    }

    targets.dedup();
    targets
}

/// Task body: clean every target directory in turn.
///
/// The target roots themselves are kept; files are deleted and emptied
/// subdirectories are pruned bottom-up.
pub fn run(ctx: &TaskContext<CleanupReport>, targets: &[PathBuf]) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let total = targets.len().max(1);

    for (index, target) in targets.iter().enumerate() {
        ctx.check_cancelled()?;

        let label = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| target.display().to_string());
        let percent = ((index * 100) / total) as u8;
        ctx.progress(percent, format!("Cleaning {}...", label));

        if !target.exists() {
            continue;
        }

        clean_dir(ctx, target, &mut report);
    }

    ctx.progress(100, "Cleanup complete");
    info!(
        files_removed = report.files_removed,
        space_saved = report.space_saved,
        errors = report.errors,
        "cleanup finished"
    );
    Ok(report)
}

fn clean_dir(ctx: &TaskContext<CleanupReport>, target: &PathBuf, report: &mut CleanupReport) {
    // contents_first gives a bottom-up walk, so directories are visited
    // after the files inside them and can be pruned once emptied.
    for entry in WalkDir::new(target)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if ctx.is_cancelled() {
            return;
        }

        let path = entry.path();
        if path == target.as_path() {
            continue;
        }

        if entry.file_type().is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(path) {
                Ok(()) => {
                    report.space_saved += size;
                    report.files_removed += 1;
                }
                Err(err) => {
                    report.errors += 1;
                    warn!(path = %path.display(), %err, "failed to remove file");
                }
            }
        } else if entry.file_type().is_dir() {
            // Only succeeds for directories emptied above; anything still
            // holding files is left alone.
            let _ = fs::remove_dir(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{self, TaskKind};
    use tempfile::TempDir;

    #[test]
    fn test_reports_bytes_and_file_count() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.tmp"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("b.tmp"), vec![0u8; 200]).unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("c.tmp"), vec![0u8; 300]).unwrap();

        let targets = vec![dir.path().to_path_buf()];
        let handle =
            task::spawn(TaskKind::Cleanup, move |ctx| run(ctx, &targets)).unwrap();
        let report = handle.wait().unwrap();

        assert_eq!(report.space_saved, 600);
        assert_eq!(report.files_removed, 3);
        assert_eq!(report.errors, 0);
        // The target root survives, the emptied subdirectory does not.
        assert!(dir.path().exists());
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn test_missing_target_is_skipped() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");

        let targets = vec![missing];
        let handle =
            task::spawn(TaskKind::Cleanup, move |ctx| run(ctx, &targets)).unwrap();
        let report = handle.wait().unwrap();

        assert_eq!(report, CleanupReport::default());
    }

    #[test]
    fn test_progress_precedes_single_terminal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.tmp"), b"data").unwrap();

        let targets = vec![dir.path().to_path_buf()];
        let handle =
            task::spawn(TaskKind::Cleanup, move |ctx| run(ctx, &targets)).unwrap();

        let mut events = Vec::new();
        let report = handle.wait_with(|ev| events.push(ev.clone())).unwrap();

        assert!(!events.is_empty());
        assert_eq!(events.last().unwrap().percent, 100);
        assert_eq!(report.files_removed, 1);
    }

    #[test]
    fn test_default_targets_include_temp_dir() {
        let targets = default_targets();
        assert!(targets.contains(&std::env::temp_dir()));
    }
}
