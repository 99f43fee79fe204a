//! Logging setup: console plus a size-rotated log file
//!
//! Console output goes to stderr so it never interleaves with command
//! output; the file layer writes ANSI-free lines under the config
//! directory. Rotation is size-based and happens before the file is
//! opened, mirroring a classic rotating file handler.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{self, LoggingConfig};

const LOG_FILE: &str = "sysmate.log";

/// Install the global subscriber. Returns the log file path, or None when
/// the file layer could not be set up (console-only fallback).
pub fn init(config: &LoggingConfig, verbose: u8, quiet: bool) -> Option<PathBuf> {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => match config.level.to_ascii_uppercase().as_str() {
                "DEBUG" => "debug",
                "WARNING" | "WARN" => "warn",
                "ERROR" => "error",
                _ => "info",
            },
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sysmate={level}")));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let log_file = open_log_file(config).ok();
    match log_file {
        Some((path, file)) => {
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Some(path)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .init();
            None
        }
    }
}

fn open_log_file(config: &LoggingConfig) -> Result<(PathBuf, fs::File)> {
    let dir = config::log_dir()?;
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let path = dir.join(LOG_FILE);
    rotate_if_needed(&path, config.max_size * 1024 * 1024, config.backup_count)?;

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    Ok((path, file))
}

/// Shift `sysmate.log` through `sysmate.log.1 .. .N` once it exceeds
/// `max_bytes`. The oldest file falls off the end.
fn rotate_if_needed(path: &Path, max_bytes: u64, backups: usize) -> Result<()> {
    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(_) => return Ok(()),
    };
    if max_bytes == 0 || size < max_bytes {
        return Ok(());
    }

    if backups == 0 {
        fs::remove_file(path)
            .with_context(|| format!("Failed to truncate log file: {}", path.display()))?;
        return Ok(());
    }

    let numbered = |n: usize| PathBuf::from(format!("{}.{}", path.display(), n));

    let _ = fs::remove_file(numbered(backups));
    for n in (1..backups).rev() {
        let _ = fs::rename(numbered(n), numbered(n + 1));
    }
    fs::rename(path, numbered(1))
        .with_context(|| format!("Failed to rotate log file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_rotation_below_limit() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, vec![0u8; 10]).unwrap();

        rotate_if_needed(&log, 100, 3).unwrap();

        assert!(log.exists());
        assert!(!dir.path().join("app.log.1").exists());
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, b"current").unwrap();
        fs::write(dir.path().join("app.log.1"), b"older").unwrap();
        fs::write(dir.path().join("app.log.2"), b"oldest").unwrap();

        rotate_if_needed(&log, 1, 2).unwrap();

        assert!(!log.exists());
        assert_eq!(fs::read(dir.path().join("app.log.1")).unwrap(), b"current");
        assert_eq!(fs::read(dir.path().join("app.log.2")).unwrap(), b"older");
        // The previous .2 fell off the end.
        assert!(!dir.path().join("app.log.3").exists());
    }

    #[test]
    fn test_rotation_with_zero_backups_truncates() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("app.log");
        fs::write(&log, b"current").unwrap();

        rotate_if_needed(&log, 1, 0).unwrap();

        assert!(!log.exists());
    }

    #[test]
    fn test_missing_file_is_fine() {
        let dir = TempDir::new().unwrap();
        rotate_if_needed(&dir.path().join("nope.log"), 1, 3).unwrap();
    }
}
