//! Installed-software inventory
//!
//! Enumerates the Windows uninstall registry hives (HKLM 64-bit, the
//! WOW6432Node view and HKCU) plus Microsoft Store packages via
//! PowerShell. Unreadable keys and values are skipped and enumeration
//! continues; nothing in a single broken entry fails the scan.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::task::TaskContext;

/// One installed application.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SoftwareEntry {
    pub name: String,
    pub publisher: Option<String>,
    pub version: Option<String>,
    pub install_date: Option<String>,
    /// From the registry's EstimatedSize (stored in KB).
    pub size_bytes: Option<u64>,
    pub uninstall_command: Option<String>,
    pub store_app: bool,
}

/// Scan result, keyed by display name. Later entries win, so an HKCU
/// entry shadows an HKLM one with the same name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SoftwareInventory {
    pub entries: BTreeMap<String, SoftwareEntry>,
}

impl SoftwareInventory {
    pub fn insert(&mut self, entry: SoftwareEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SoftwareEntry> {
        self.entries.get(name)
    }

    /// Exact lookup first, then case-insensitive.
    pub fn find(&self, name: &str) -> Option<&SoftwareEntry> {
        self.entries.get(name).or_else(|| {
            self.entries
                .values()
                .find(|entry| entry.name.eq_ignore_ascii_case(name))
        })
    }
}

/// Task body: full software scan.
pub fn scan(ctx: &TaskContext<SoftwareInventory>) -> Result<SoftwareInventory> {
    let mut inventory = SoftwareInventory::default();

    ctx.progress(0, "Checking registry hives...");
    scan_registry(ctx, &mut inventory)?;

    ctx.check_cancelled()?;
    ctx.progress(90, "Checking Microsoft Store apps...");
    scan_store_apps(&mut inventory);

    ctx.progress(100, format!("Scan finished: {} applications", inventory.len()));
    Ok(inventory)
}

#[cfg(windows)]
fn scan_registry(
    ctx: &TaskContext<SoftwareInventory>,
    inventory: &mut SoftwareInventory,
) -> Result<()> {
    use winreg::enums::*;
    use winreg::RegKey;

    let hives = [
        (
            RegKey::predef(HKEY_LOCAL_MACHINE),
            "SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall",
        ),
        (
            RegKey::predef(HKEY_LOCAL_MACHINE),
            "SOFTWARE\\WOW6432Node\\Microsoft\\Windows\\CurrentVersion\\Uninstall",
        ),
        (
            RegKey::predef(HKEY_CURRENT_USER),
            "SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall",
        ),
    ];
    let hive_count = hives.len();

    for (hive_index, (hive, path)) in hives.into_iter().enumerate() {
        ctx.check_cancelled()?;

        // Missing hives are expected (e.g. no WOW6432Node on 32-bit).
        let key = match hive.open_subkey(path) {
            Ok(key) => key,
            Err(_) => continue,
        };

        let subkeys: Vec<String> = key.enum_keys().flatten().collect();
        let total = subkeys.len().max(1);

        for (index, subkey_name) in subkeys.iter().enumerate() {
            let subkey = match key.open_subkey(subkey_name) {
                Ok(subkey) => subkey,
                Err(_) => continue,
            };

            let name: String = match subkey.get_value("DisplayName") {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.is_empty() {
                continue;
            }

            let size_bytes = subkey
                .get_value::<u32, _>("EstimatedSize")
                .ok()
                .map(|kb| kb as u64 * 1024);

            inventory.insert(SoftwareEntry {
                name,
                publisher: read_string(&subkey, "Publisher"),
                version: read_string(&subkey, "DisplayVersion"),
                install_date: read_string(&subkey, "InstallDate"),
                size_bytes,
                uninstall_command: read_string(&subkey, "UninstallString"),
                store_app: false,
            });

            let fraction = (hive_index * total + index + 1) as f64 / (hive_count * total) as f64;
            ctx.progress(
                (fraction * 90.0) as u8,
                format!("Scanning installed software ({} found)...", inventory.len()),
            );
        }
    }

    Ok(())
}

#[cfg(windows)]
fn read_string(key: &winreg::RegKey, value: &str) -> Option<String> {
    key.get_value::<String, _>(value)
        .ok()
        .filter(|s| !s.is_empty())
}

#[cfg(not(windows))]
fn scan_registry(
    _ctx: &TaskContext<SoftwareInventory>,
    _inventory: &mut SoftwareInventory,
) -> Result<()> {
    Ok(())
}

/// Add Microsoft Store packages. A failing PowerShell invocation degrades
/// the scan rather than failing it.
fn scan_store_apps(inventory: &mut SoftwareInventory) {
    #[cfg(windows)]
    {
        use std::process::Command;

        let output = Command::new("powershell")
            .args([
                "-NoProfile",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
                "Get-AppxPackage | Select-Object Name,Publisher,Version | ConvertTo-Json",
            ])
            .output();

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "store app enumeration failed"
                );
                return;
            }
            Err(err) => {
                warn!(%err, "could not run PowerShell for store apps");
                return;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = match serde_json::from_str(stdout.trim()) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "could not parse store app listing");
                return;
            }
        };

        // ConvertTo-Json emits a bare object for a single package.
        let packages = match parsed {
            serde_json::Value::Array(items) => items,
            object @ serde_json::Value::Object(_) => vec![object],
            _ => Vec::new(),
        };

        for package in packages {
            let Some(name) = package.get("Name").and_then(|v| v.as_str()) else {
                continue;
            };
            inventory.insert(SoftwareEntry {
                name: name.to_string(),
                publisher: package
                    .get("Publisher")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                version: package
                    .get("Version")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                install_date: None,
                size_bytes: None,
                uninstall_command: None,
                store_app: true,
            });
        }
    }

    #[cfg(not(windows))]
    {
        let _ = inventory;
    }
}

/// Launch the uninstaller registered for an entry. One attempt; entries
/// without an uninstall command (store apps) are rejected up front.
pub fn launch_uninstall(entry: &SoftwareEntry) -> Result<()> {
    let command = entry
        .uninstall_command
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("{} has no uninstall command", entry.name))?;

    #[cfg(windows)]
    {
        use anyhow::Context;
        use std::process::Command;

        Command::new("cmd")
            .args(["/C", "start", "", command])
            .spawn()
            .with_context(|| format!("Failed to launch uninstaller for {}", entry.name))?;
        Ok(())
    }

    #[cfg(not(windows))]
    {
        let _ = command;
        anyhow::bail!("Uninstall is only available on Windows")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{self, TaskKind};

    fn entry(name: &str, publisher: &str) -> SoftwareEntry {
        SoftwareEntry {
            name: name.to_string(),
            publisher: Some(publisher.to_string()),
            version: None,
            install_date: None,
            size_bytes: None,
            uninstall_command: None,
            store_app: false,
        }
    }

    #[test]
    fn test_duplicate_names_later_wins() {
        let mut inventory = SoftwareInventory::default();
        inventory.insert(entry("App", "First"));
        inventory.insert(entry("App", "Second"));

        assert_eq!(inventory.len(), 1);
        assert_eq!(
            inventory.get("App").unwrap().publisher.as_deref(),
            Some("Second")
        );
    }

    #[test]
    fn test_scan_task_delivers_single_result() {
        let handle = task::spawn(TaskKind::SoftwareScan, |ctx| scan(ctx)).unwrap();

        let mut last_percent = 0;
        let inventory = handle
            .wait_with(|ev| last_percent = ev.percent)
            .expect("scan task should not fail");

        assert_eq!(last_percent, 100);
        // On non-Windows hosts the inventory is simply empty.
        let _ = inventory.len();
    }

    #[test]
    fn test_uninstall_without_command_fails() {
        let entry = entry("Store App", "Microsoft");
        assert!(launch_uninstall(&entry).is_err());
    }
}
