//! Backup and restore task
//!
//! Backs selected folders up into a timestamped zip archive (or a plain
//! directory copy), with percent progress over a pre-counted file total.
//! Old archives beyond the configured limit are pruned after each run.

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::task::TaskContext;

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub compress: bool,
    /// 0 disables pruning.
    pub max_backups: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackupReport {
    pub archive: PathBuf,
    pub files_copied: u64,
    pub bytes_copied: u64,
}

/// Task body: back up every source into the destination.
pub fn run(ctx: &TaskContext<BackupReport>, options: &BackupOptions) -> Result<BackupReport> {
    if options.sources.is_empty() {
        anyhow::bail!("No backup sources selected");
    }
    fs::create_dir_all(&options.destination).with_context(|| {
        format!(
            "Failed to create backup destination: {}",
            options.destination.display()
        )
    })?;

    ctx.progress(0, "Counting files...");
    let total_files = options
        .sources
        .iter()
        .map(|source| count_files(source))
        .sum::<u64>()
        .max(1);

    let backup_name = format!("backup_{}", Local::now().format("%Y%m%d_%H%M%S"));
    let report = if options.compress {
        let archive = options.destination.join(format!("{}.zip", backup_name));
        write_archive(ctx, &options.sources, &archive, total_files)?
    } else {
        let backup_dir = options.destination.join(&backup_name);
        copy_sources(ctx, &options.sources, &backup_dir, total_files)?
    };

    if options.max_backups > 0 {
        prune_old_backups(&options.destination, options.max_backups);
    }

    ctx.progress(100, "Backup complete");
    info!(
        archive = %report.archive.display(),
        files = report.files_copied,
        bytes = report.bytes_copied,
        "backup finished"
    );
    Ok(report)
}

fn count_files(source: &Path) -> u64 {
    WalkDir::new(source)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count() as u64
}

fn write_archive(
    ctx: &TaskContext<BackupReport>,
    sources: &[PathBuf],
    archive_path: &Path,
    total_files: u64,
) -> Result<BackupReport> {
    let file = fs::File::create(archive_path)
        .with_context(|| format!("Failed to create archive: {}", archive_path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let zip_options = SimpleFileOptions::default();

    let mut files_copied = 0u64;
    let mut bytes_copied = 0u64;

    for source in sources {
        let base = source.parent().unwrap_or(source);
        for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
            ctx.check_cancelled()?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let arcname = match path.strip_prefix(base) {
                Ok(relative) => zip_entry_name(relative),
                Err(_) => continue,
            };

            // A file vanishing mid-backup is skipped, not fatal.
            let mut reader = match fs::File::open(path) {
                Ok(reader) => reader,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable file");
                    continue;
                }
            };

            zip.start_file(arcname, zip_options)
                .with_context(|| format!("Failed to add {} to archive", path.display()))?;
            bytes_copied += io::copy(&mut reader, &mut zip)
                .with_context(|| format!("Failed to write {} to archive", path.display()))?;
            files_copied += 1;

            ctx.progress(
                ((files_copied * 100) / total_files).min(99) as u8,
                format!("Backing up {}...", path.display()),
            );
        }
    }

    zip.finish().context("Failed to finalize backup archive")?;
    Ok(BackupReport {
        archive: archive_path.to_path_buf(),
        files_copied,
        bytes_copied,
    })
}

/// Zip entry names always use forward slashes.
fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn copy_sources(
    ctx: &TaskContext<BackupReport>,
    sources: &[PathBuf],
    backup_dir: &Path,
    total_files: u64,
) -> Result<BackupReport> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("Failed to create {}", backup_dir.display()))?;

    let mut files_copied = 0u64;
    let mut bytes_copied = 0u64;

    for source in sources {
        let base = source.parent().unwrap_or(source);
        for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
            ctx.check_cancelled()?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            let target = backup_dir.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            match fs::copy(path, &target) {
                Ok(bytes) => {
                    bytes_copied += bytes;
                    files_copied += 1;
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping uncopyable file");
                    continue;
                }
            }

            ctx.progress(
                ((files_copied * 100) / total_files).min(99) as u8,
                format!("Backing up {}...", path.display()),
            );
        }
    }

    Ok(BackupReport {
        archive: backup_dir.to_path_buf(),
        files_copied,
        bytes_copied,
    })
}

/// Remove the oldest `backup_*` artifacts beyond `keep`. Timestamped names
/// sort chronologically, so a name sort is enough.
fn prune_old_backups(destination: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(destination) else {
        return;
    };

    let mut backups: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("backup_"))
                .unwrap_or(false)
        })
        .collect();
    backups.sort();

    while backups.len() > keep {
        let oldest = backups.remove(0);
        let removed = if oldest.is_dir() {
            fs::remove_dir_all(&oldest)
        } else {
            fs::remove_file(&oldest)
        };
        match removed {
            Ok(()) => info!(path = %oldest.display(), "pruned old backup"),
            Err(err) => warn!(path = %oldest.display(), %err, "failed to prune old backup"),
        }
    }
}

/// Task body: extract a backup archive over a destination directory.
pub fn restore(ctx: &TaskContext<u64>, archive: &Path, destination: &Path) -> Result<u64> {
    ctx.progress(0, format!("Restoring {}...", archive.display()));

    let file = fs::File::open(archive)
        .with_context(|| format!("Failed to open backup archive: {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read backup archive: {}", archive.display()))?;

    let files = zip.len() as u64;
    zip.extract(destination)
        .with_context(|| format!("Failed to restore into {}", destination.display()))?;

    ctx.progress(100, "Restore complete");
    info!(archive = %archive.display(), files, "restore finished");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{self, TaskKind};
    use tempfile::TempDir;

    fn make_source(root: &Path) -> PathBuf {
        let source = root.join("docs");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("a.txt"), b"hello").unwrap();
        fs::write(source.join("sub").join("b.txt"), b"world!").unwrap();
        source
    }

    #[test]
    fn test_compressed_backup_and_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = make_source(dir.path());
        let dest = dir.path().join("backups");

        let options = BackupOptions {
            sources: vec![source],
            destination: dest.clone(),
            compress: true,
            max_backups: 0,
        };
        let handle =
            task::spawn(TaskKind::Backup, move |ctx| run(ctx, &options)).unwrap();
        let report = handle.wait().unwrap();

        assert_eq!(report.files_copied, 2);
        assert_eq!(report.bytes_copied, 11);
        assert!(report.archive.exists());
        assert_eq!(report.archive.extension().unwrap(), "zip");

        let restore_dir = dir.path().join("restored");
        let archive = report.archive.clone();
        let target = restore_dir.clone();
        let handle =
            task::spawn(TaskKind::Restore, move |ctx| restore(ctx, &archive, &target)).unwrap();
        let files = handle.wait().unwrap();

        assert_eq!(files, 2);
        assert_eq!(
            fs::read(restore_dir.join("docs").join("a.txt")).unwrap(),
            b"hello"
        );
        assert_eq!(
            fs::read(restore_dir.join("docs").join("sub").join("b.txt")).unwrap(),
            b"world!"
        );
    }

    #[test]
    fn test_plain_copy_backup() {
        let dir = TempDir::new().unwrap();
        let source = make_source(dir.path());
        let dest = dir.path().join("backups");

        let options = BackupOptions {
            sources: vec![source],
            destination: dest,
            compress: false,
            max_backups: 0,
        };
        let handle =
            task::spawn(TaskKind::Backup, move |ctx| run(ctx, &options)).unwrap();
        let report = handle.wait().unwrap();

        assert_eq!(report.files_copied, 2);
        assert!(report.archive.is_dir());
        assert!(report.archive.join("docs").join("a.txt").exists());
    }

    #[test]
    fn test_no_sources_fails() {
        let dir = TempDir::new().unwrap();
        let options = BackupOptions {
            sources: Vec::new(),
            destination: dir.path().to_path_buf(),
            compress: true,
            max_backups: 0,
        };
        let handle =
            task::spawn(TaskKind::Backup, move |ctx| run(ctx, &options)).unwrap();
        assert!(handle.wait().is_err());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        for name in [
            "backup_20240101_000000.zip",
            "backup_20240201_000000.zip",
            "backup_20240301_000000.zip",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), b"keep me").unwrap();

        prune_old_backups(dir.path(), 2);

        assert!(!dir.path().join("backup_20240101_000000.zip").exists());
        assert!(dir.path().join("backup_20240201_000000.zip").exists());
        assert!(dir.path().join("backup_20240301_000000.zip").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_restore_missing_archive_fails() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("nope.zip");
        let target = dir.path().join("out");
        let handle =
            task::spawn(TaskKind::Restore, move |ctx| restore(ctx, &archive, &target)).unwrap();
        assert!(handle.wait().is_err());
    }
}
