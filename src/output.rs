//! Human and JSON output for command results

use anyhow::Result;

use crate::backup::BackupReport;
use crate::cleanup::CleanupReport;
use crate::domain::DomainInfo;
use crate::inventory::SoftwareInventory;
use crate::monitor::SystemSnapshot;
use crate::optimize::OptimizeReport;
use crate::theme::Theme;
use crate::update::UpdateStatus;

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl OutputMode {
    pub fn from_flags(verbose: u8, quiet: bool) -> OutputMode {
        if quiet {
            OutputMode::Quiet
        } else {
            match verbose {
                0 => OutputMode::Normal,
                1 => OutputMode::Verbose,
                _ => OutputMode::VeryVerbose,
            }
        }
    }
}

pub fn print_inventory(inventory: &SoftwareInventory, mode: OutputMode, filter: Option<&str>) {
    if mode == OutputMode::Quiet {
        return;
    }

    let needle = filter.map(str::to_lowercase);
    let mut shown = 0usize;

    println!("{}", Theme::header("Installed software"));
    for entry in inventory.entries.values() {
        if let Some(ref needle) = needle {
            let publisher = entry.publisher.as_deref().unwrap_or("");
            if !entry.name.to_lowercase().contains(needle)
                && !publisher.to_lowercase().contains(needle)
            {
                continue;
            }
        }
        shown += 1;

        let size = entry
            .size_bytes
            .map(|b| bytesize::to_string(b, true))
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "  {} {} {} {}{}",
            Theme::value(&entry.name),
            Theme::muted(entry.version.as_deref().unwrap_or("-")),
            Theme::secondary(entry.publisher.as_deref().unwrap_or("-")),
            Theme::size(&size),
            if entry.store_app {
                format!(" {}", Theme::muted("[store]"))
            } else {
                String::new()
            }
        );

        if mode == OutputMode::Verbose || mode == OutputMode::VeryVerbose {
            if let Some(date) = &entry.install_date {
                println!("      {} {}", Theme::muted("installed:"), date);
            }
            if mode == OutputMode::VeryVerbose {
                if let Some(cmd) = &entry.uninstall_command {
                    println!("      {} {}", Theme::muted("uninstall:"), cmd);
                }
            }
        }
    }

    println!(
        "\n{} {} applications{}",
        Theme::success("Found"),
        shown,
        match filter {
            Some(f) => format!(" matching \"{}\"", f),
            None => String::new(),
        }
    );
}

pub fn print_inventory_json(inventory: &SoftwareInventory) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(inventory)?);
    Ok(())
}

pub fn print_cleanup(report: &CleanupReport, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }
    if report.errors > 0 {
        println!(
            "{} {} files removed, {} freed, {} errors",
            Theme::warning("Cleanup complete:"),
            Theme::value(&report.files_removed.to_string()),
            Theme::size(&report.space_human()),
            Theme::error(&report.errors.to_string())
        );
    } else {
        println!(
            "{} {} files removed, {} freed",
            Theme::success("Cleanup complete:"),
            Theme::value(&report.files_removed.to_string()),
            Theme::size(&report.space_human())
        );
    }
}

pub fn print_optimize(report: &OptimizeReport, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }
    if report.steps_failed == 0 {
        println!(
            "{} {} steps completed",
            Theme::success("Optimization complete:"),
            Theme::value(&report.steps_run.to_string())
        );
    } else {
        println!(
            "{} {}/{} steps completed",
            Theme::warning("Optimization finished with failures:"),
            Theme::value(&(report.steps_run - report.steps_failed).to_string()),
            report.steps_run
        );
        for step in &report.failed_steps {
            println!("  {} {}", Theme::error("failed:"), step);
        }
    }
}

pub fn print_backup(report: &BackupReport, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }
    println!(
        "{} {} files ({}) -> {}",
        Theme::success("Backup complete:"),
        Theme::value(&report.files_copied.to_string()),
        Theme::size(&bytesize::to_string(report.bytes_copied, true)),
        report.archive.display()
    );
}

pub fn print_domain_info(info: &DomainInfo, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }
    println!("{} {}", Theme::muted("Computer:"), info.computer_name);
    match &info.domain {
        Some(domain) => println!("{} {}", Theme::muted("Domain:"), Theme::value(domain)),
        None => println!("{} {}", Theme::muted("Domain:"), Theme::warning("not joined")),
    }
}

pub fn print_update_status(status: &UpdateStatus, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }
    if !status.available {
        println!(
            "{} Already up to date (version {})",
            Theme::success("OK"),
            status.current_version
        );
        return;
    }

    if status.required {
        println!(
            "{} Update to {} is required (current: {})",
            Theme::error("Required update:"),
            Theme::value(&status.latest_version),
            status.current_version
        );
    } else {
        println!(
            "{} {} available (current: {})",
            Theme::success("Update available:"),
            Theme::value(&status.latest_version),
            status.current_version
        );
    }
    for note in &status.release_notes {
        println!("  {} {}", Theme::muted("-"), note);
    }
}

pub fn print_snapshot(snapshot: &SystemSnapshot, alerts: &[String], mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }

    println!("{}", Theme::header("System status"));
    println!("  {} {}", Theme::muted("Host:"), snapshot.hostname);
    println!("  {} {}", Theme::muted("OS:"), snapshot.os_version);
    println!(
        "  {} {}",
        Theme::muted("Uptime:"),
        format_uptime(snapshot.uptime_seconds)
    );
    println!(
        "  {} {} ({} cores) at {:.1}%",
        Theme::muted("CPU:"),
        snapshot.cpu.model,
        snapshot.cpu.cores,
        snapshot.cpu.total_usage
    );
    println!(
        "  {} {} / {} ({:.1}%)",
        Theme::muted("Memory:"),
        Theme::size(&bytesize::to_string(snapshot.memory.used_bytes, true)),
        bytesize::to_string(snapshot.memory.total_bytes, true),
        snapshot.memory.used_percent
    );
    for disk in &snapshot.disks {
        println!(
            "  {} {} {} free of {} ({:.1}% used)",
            Theme::muted("Disk:"),
            disk.mount_point,
            Theme::size(&bytesize::to_string(disk.available_bytes, true)),
            bytesize::to_string(disk.total_bytes, true),
            disk.used_percent
        );
    }

    if !alerts.is_empty() {
        println!();
        for alert in alerts {
            println!("{} {}", Theme::warning("ALERT"), alert);
        }
    }
}

pub fn print_snapshot_json(snapshot: &SystemSnapshot) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_mode_from_flags() {
        assert_eq!(OutputMode::from_flags(0, false), OutputMode::Normal);
        assert_eq!(OutputMode::from_flags(1, false), OutputMode::Verbose);
        assert_eq!(OutputMode::from_flags(2, false), OutputMode::VeryVerbose);
        assert_eq!(OutputMode::from_flags(3, true), OutputMode::Quiet);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(90), "1m");
        assert_eq!(format_uptime(3_660), "1h 1m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }
}
