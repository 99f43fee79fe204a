//! Active Directory domain membership actions
//!
//! Join, leave and secure-channel repair are each a single PowerShell
//! invocation; stderr from a non-zero exit becomes the failure result.
//! No rollback and no retries.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::task::TaskContext;

#[derive(Debug, Clone)]
pub enum DomainAction {
    Join {
        domain: String,
        username: String,
        password: String,
    },
    Leave,
    Repair,
}

impl DomainAction {
    pub fn label(&self) -> &'static str {
        match self {
            DomainAction::Join { .. } => "join",
            DomainAction::Leave => "leave",
            DomainAction::Repair => "repair",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DomainOutcome {
    pub message: String,
}

/// Current membership state, shown before any action.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DomainInfo {
    pub computer_name: String,
    pub domain: Option<String>,
}

pub fn info() -> DomainInfo {
    DomainInfo {
        computer_name: std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "unknown".to_string()),
        domain: current_domain(),
    }
}

/// Task body: run one domain action.
pub fn run(ctx: &TaskContext<DomainOutcome>, action: &DomainAction) -> Result<DomainOutcome> {
    ctx.progress(10, format!("Preparing domain {}...", action.label()));

    let member = current_domain().is_some();
    match action {
        DomainAction::Join { .. } if member => {
            anyhow::bail!("This computer is already a domain member")
        }
        DomainAction::Leave | DomainAction::Repair if !member => {
            anyhow::bail!("This computer is not a domain member")
        }
        _ => {}
    }

    let script = match action {
        DomainAction::Join {
            domain,
            username,
            password,
        } => format!(
            "Add-Computer -DomainName \"{}\" -Credential (New-Object System.Management.Automation.PSCredential(\"{}\", (ConvertTo-SecureString \"{}\" -AsPlainText -Force))) -Force",
            domain, username, password
        ),
        DomainAction::Leave => {
            "Remove-Computer -UnjoinDomainCredential (Get-Credential) -Force".to_string()
        }
        DomainAction::Repair => "Test-ComputerSecureChannel -Repair".to_string(),
    };

    ctx.progress(50, format!("Running domain {}...", action.label()));
    run_powershell(&script)?;

    let message = match action {
        DomainAction::Join { domain, .. } => {
            format!("Joined domain {}; restart to apply", domain)
        }
        DomainAction::Leave => "Left the domain; restart to apply".to_string(),
        DomainAction::Repair => "Domain secure channel repaired".to_string(),
    };

    ctx.progress(100, message.clone());
    info!(action = action.label(), "domain action complete");
    Ok(DomainOutcome { message })
}

#[cfg(windows)]
fn run_powershell(script: &str) -> Result<()> {
    use anyhow::Context;
    use std::process::Command;

    let output = Command::new("powershell")
        .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", script])
        .output()
        .context("Failed to run PowerShell")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Domain operation failed: {}", stderr.trim());
    }
    Ok(())
}

#[cfg(not(windows))]
fn run_powershell(_script: &str) -> Result<()> {
    anyhow::bail!("Domain operations are only available on Windows")
}

/// The joined domain name, read from the Tcpip parameters key. Absence of
/// the key or an empty value both mean "not a member".
#[cfg(windows)]
fn current_domain() -> Option<String> {
    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    let key = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey("SYSTEM\\CurrentControlSet\\Services\\Tcpip\\Parameters")
        .ok()?;
    key.get_value::<String, _>("Domain")
        .ok()
        .filter(|d| !d.is_empty())
}

#[cfg(not(windows))]
fn current_domain() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{self, TaskError, TaskKind};

    #[test]
    fn test_info_has_computer_name() {
        let info = info();
        assert!(!info.computer_name.is_empty());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_leave_without_membership_is_failure_result() {
        let action = DomainAction::Leave;
        let handle =
            task::spawn(TaskKind::DomainLeave, move |ctx| run(ctx, &action)).unwrap();

        match handle.wait() {
            Err(TaskError::Failed(msg)) => assert!(msg.contains("not a domain member")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn test_join_fails_off_windows() {
        let action = DomainAction::Join {
            domain: "corp.example.com".to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let handle =
            task::spawn(TaskKind::DomainJoin, move |ctx| run(ctx, &action)).unwrap();
        assert!(handle.wait().is_err());
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(DomainAction::Leave.label(), "leave");
        assert_eq!(DomainAction::Repair.label(), "repair");
    }
}
