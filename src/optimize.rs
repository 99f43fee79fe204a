//! System optimization task
//!
//! A fixed sequence of one-shot maintenance steps. Each step is attempted
//! once; a failing step is recorded and the sequence continues.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::task::TaskContext;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct OptimizeReport {
    pub steps_run: usize,
    pub steps_failed: usize,
    pub failed_steps: Vec<String>,
}

/// Processes whose priority gets lowered during optimization.
const LOW_PRIORITY_PROCESSES: &[&str] = &["chrome", "firefox", "msedge"];

/// Task body: run every optimization step in order.
pub fn run(ctx: &TaskContext<OptimizeReport>) -> Result<OptimizeReport> {
    let steps: Vec<(&str, fn() -> Result<()>)> = vec![
        ("Flushing DNS cache", flush_dns_cache),
        ("Lowering background process priority", deprioritize_processes),
        ("Checking disk", check_disk),
        ("Scheduling defragmentation", defragment),
    ];

    let mut report = OptimizeReport::default();
    let total = steps.len();

    for (index, (label, step)) in steps.into_iter().enumerate() {
        ctx.check_cancelled()?;
        ctx.progress((((index + 1) * 100) / total) as u8, label);

        report.steps_run += 1;
        if let Err(err) = step() {
            report.steps_failed += 1;
            report.failed_steps.push(label.to_string());
            warn!(step = label, error = %format!("{err:#}"), "optimization step failed");
        }
    }

    info!(
        steps_run = report.steps_run,
        steps_failed = report.steps_failed,
        "optimization finished"
    );
    Ok(report)
}

#[cfg(windows)]
fn run_command(program: &str, args: &[&str]) -> Result<()> {
    use anyhow::Context;
    use std::process::Command;

    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} exited with {}: {}", program, output.status, stderr.trim());
    }
    Ok(())
}

#[cfg(windows)]
fn flush_dns_cache() -> Result<()> {
    run_command("ipconfig", &["/flushdns"])
}

#[cfg(windows)]
fn deprioritize_processes() -> Result<()> {
    let names = LOW_PRIORITY_PROCESSES.join(",");
    let script = format!(
        "Get-Process {} -ErrorAction SilentlyContinue | ForEach-Object {{ $_.PriorityClass = 'BelowNormal' }}",
        names
    );
    run_command(
        "powershell",
        &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", &script],
    )
}

#[cfg(windows)]
fn check_disk() -> Result<()> {
    run_command("chkdsk", &["/scan"])
}

#[cfg(windows)]
fn defragment() -> Result<()> {
    run_command("defrag", &["/C", "/H", "/O"])
}

#[cfg(not(windows))]
fn flush_dns_cache() -> Result<()> {
    anyhow::bail!("only available on Windows")
}

#[cfg(not(windows))]
fn deprioritize_processes() -> Result<()> {
    anyhow::bail!("only available on Windows")
}

#[cfg(not(windows))]
fn check_disk() -> Result<()> {
    anyhow::bail!("only available on Windows")
}

#[cfg(not(windows))]
fn defragment() -> Result<()> {
    anyhow::bail!("only available on Windows")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{self, TaskKind};

    #[test]
    fn test_failed_steps_do_not_fail_the_task() {
        let handle = task::spawn(TaskKind::Optimize, |ctx| run(ctx)).unwrap();
        let report = handle.wait().expect("optimize task should always succeed");

        assert_eq!(report.steps_run, 4);
        // On non-Windows hosts every step fails but the task still delivers
        // a success result, mirroring the skip-and-continue policy.
        assert_eq!(report.steps_failed, report.failed_steps.len());
    }

    #[test]
    fn test_progress_reaches_100() {
        let handle = task::spawn(TaskKind::Optimize, |ctx| run(ctx)).unwrap();

        let mut last = 0;
        let _ = handle.wait_with(|ev| last = ev.percent);
        assert_eq!(last, 100);
    }
}
