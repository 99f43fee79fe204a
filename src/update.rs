//! Update checks against a version manifest, plus package download
//!
//! The manifest is a JSON document published alongside releases. It can be
//! read from a local path or fetched with a plain HTTP GET. Availability is
//! decided by component-wise numeric version comparison; a current version
//! below `min_version` makes the update mandatory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::task::TaskContext;
use crate::version;

const USER_AGENT: &str = concat!("sysmate-updater/", env!("CARGO_PKG_VERSION"));

/// Release manifest, as published.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub version: String,
    #[serde(default = "default_min_version")]
    pub min_version: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub release_notes: Vec<String>,
    /// BLAKE3 hex digest of the release archive.
    #[serde(default)]
    pub hash: Option<String>,
}

fn default_min_version() -> String {
    "1.0.0".to_string()
}

/// Outcome of an update check.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpdateStatus {
    pub available: bool,
    pub required: bool,
    pub current_version: String,
    pub latest_version: String,
    pub download_url: Option<String>,
    pub release_notes: Vec<String>,
    pub hash: Option<String>,
}

/// Decide availability from a manifest and the running version.
///
/// A current version older than `min_version` forces `required` no matter
/// what the latest version is; otherwise an update is available when the
/// manifest version is strictly newer.
pub fn evaluate(manifest: &Manifest, current: &str) -> UpdateStatus {
    use std::cmp::Ordering;

    let mut status = UpdateStatus {
        available: false,
        required: false,
        current_version: current.to_string(),
        latest_version: manifest.version.clone(),
        download_url: manifest.download_url.clone(),
        release_notes: manifest.release_notes.clone(),
        hash: manifest.hash.clone(),
    };

    if version::compare(current, &manifest.min_version) == Ordering::Less {
        status.available = true;
        status.required = true;
        return status;
    }

    if version::compare(&manifest.version, current) == Ordering::Greater {
        status.available = true;
        status.required = manifest.required;
    }

    status
}

/// Read the manifest from an HTTP(S) URL or a local file path.
pub fn load_manifest(source: &str) -> Result<Manifest> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = ureq::get(source)
            .set("User-Agent", USER_AGENT)
            .call()
            .with_context(|| format!("Failed to fetch update manifest from {}", source))?;
        let manifest: Manifest = response
            .into_json()
            .context("Failed to parse update manifest")?;
        Ok(manifest)
    } else {
        let content = fs::read_to_string(source)
            .with_context(|| format!("Failed to read update manifest: {}", source))?;
        let manifest: Manifest =
            serde_json::from_str(&content).context("Failed to parse update manifest")?;
        Ok(manifest)
    }
}

/// Task body for the update check.
pub fn check(
    ctx: &TaskContext<UpdateStatus>,
    source: &str,
    current: &str,
) -> Result<UpdateStatus> {
    ctx.progress(10, "Reading update manifest...");
    let manifest = load_manifest(source)?;

    ctx.progress(80, "Comparing versions...");
    let status = evaluate(&manifest, current);
    info!(
        current,
        latest = %status.latest_version,
        available = status.available,
        required = status.required,
        "update check complete"
    );

    ctx.progress(100, "Update check complete");
    Ok(status)
}

/// Download the release archive to a temp directory, optionally verify its
/// BLAKE3 digest, and extract it next to the download. One attempt, no
/// retries; any failure surfaces as the task's failure result.
pub fn download<T>(
    ctx: &TaskContext<T>,
    url: &str,
    release_version: &str,
    expected_hash: Option<&str>,
    verify: bool,
) -> Result<PathBuf> {
    let update_dir = std::env::temp_dir()
        .join("sysmate-update")
        .join(format!("update_{}", release_version));
    fs::create_dir_all(&update_dir)
        .with_context(|| format!("Failed to create update directory: {}", update_dir.display()))?;

    let zip_path = update_dir.join("update.zip");

    ctx.progress(0, format!("Downloading version {}...", release_version));
    let response = ureq::get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .with_context(|| format!("Failed to download update from {}", url))?;

    let total: Option<u64> = response
        .header("Content-Length")
        .and_then(|v| v.parse().ok());

    let mut reader = response.into_reader();
    let mut file = fs::File::create(&zip_path)
        .with_context(|| format!("Failed to create file: {}", zip_path.display()))?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 8192];
    let mut downloaded = 0u64;
    loop {
        let read = reader
            .read(&mut buffer)
            .context("Failed to read download stream")?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .context("Failed to write downloaded file")?;
        hasher.update(&buffer[..read]);
        downloaded += read as u64;
        if let Some(total) = total.filter(|&t| t > 0) {
            let percent = ((downloaded * 90) / total) as u8;
            ctx.progress(
                percent,
                format!(
                    "Downloading... {} / {}",
                    bytesize::to_string(downloaded, true),
                    bytesize::to_string(total, true)
                ),
            );
        }
    }
    drop(file);

    if verify {
        if let Some(expected) = expected_hash {
            ctx.progress(92, "Verifying download...");
            let actual = hasher.finalize().to_hex().to_string();
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                anyhow::bail!(
                    "Update archive hash mismatch (expected {}, got {})",
                    expected,
                    actual
                );
            }
        }
    }

    ctx.progress(95, "Extracting update...");
    extract_archive(&zip_path, &update_dir)?;

    ctx.progress(100, "Update downloaded");
    info!(version = release_version, dir = %update_dir.display(), "update package ready");
    Ok(update_dir)
}

fn extract_archive(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(zip_path)
        .with_context(|| format!("Failed to open archive: {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("Failed to read update archive")?;
    archive
        .extract(dest)
        .with_context(|| format!("Failed to extract update to {}", dest.display()))?;
    Ok(())
}

/// Remove leftover download directories.
pub fn cleanup_temp() -> Result<()> {
    let dir = std::env::temp_dir().join("sysmate-update");
    if dir.exists() {
        fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(version: &str, min_version: &str) -> Manifest {
        Manifest {
            version: version.to_string(),
            min_version: min_version.to_string(),
            required: false,
            download_url: Some("https://example.com/update.zip".to_string()),
            release_notes: vec!["notes".to_string()],
            hash: None,
        }
    }

    #[test]
    fn test_newer_version_is_available_not_required() {
        let status = evaluate(&manifest("1.0.10", "1.0.0"), "1.0.3");
        assert!(status.available);
        assert!(!status.required);
        assert_eq!(status.latest_version, "1.0.10");
    }

    #[test]
    fn test_below_min_version_is_required() {
        let status = evaluate(&manifest("1.0.10", "1.0.5"), "1.0.3");
        assert!(status.available);
        assert!(status.required);

        // Required even when the latest version is not newer.
        let status = evaluate(&manifest("1.0.3", "1.0.5"), "1.0.3");
        assert!(status.available);
        assert!(status.required);
    }

    #[test]
    fn test_up_to_date() {
        let status = evaluate(&manifest("1.0.3", "1.0.0"), "1.0.3");
        assert!(!status.available);
        assert!(!status.required);
    }

    #[test]
    fn test_current_newer_than_latest() {
        let status = evaluate(&manifest("1.0.3", "1.0.0"), "1.1.0");
        assert!(!status.available);
    }

    #[test]
    fn test_manifest_required_flag_carried() {
        let mut m = manifest("2.0.0", "1.0.0");
        m.required = true;
        let status = evaluate(&m, "1.0.3");
        assert!(status.available);
        assert!(status.required);
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: Manifest = serde_json::from_str(r#"{"version": "1.2.0"}"#).unwrap();
        assert_eq!(manifest.min_version, "1.0.0");
        assert!(!manifest.required);
        assert!(manifest.download_url.is_none());
        assert!(manifest.release_notes.is_empty());
        assert!(manifest.hash.is_none());
    }

    #[test]
    fn test_load_manifest_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("version.json");
        fs::write(
            &path,
            r#"{"version": "1.0.10", "min_version": "1.0.0", "download_url": "https://example.com/u.zip"}"#,
        )
        .unwrap();

        let manifest = load_manifest(path.to_str().unwrap()).unwrap();
        assert_eq!(manifest.version, "1.0.10");
        assert_eq!(
            manifest.download_url.as_deref(),
            Some("https://example.com/u.zip")
        );
    }

    #[test]
    fn test_load_manifest_missing_file() {
        assert!(load_manifest("/no/such/version.json").is_err());
    }
}
