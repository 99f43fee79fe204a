//! One-shot system monitoring snapshot
//!
//! Samples CPU, memory and disks through sysinfo and evaluates the
//! configured alert thresholds.

use serde::Serialize;
use sysinfo::{Disks, System};

use crate::config::MonitoringConfig;

#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub hostname: String,
    pub os_version: String,
    pub uptime_seconds: u64,
    pub cpu: CpuSnapshot,
    pub memory: MemorySnapshot,
    pub disks: Vec<DiskSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuSnapshot {
    pub model: String,
    pub cores: usize,
    /// Average across cores, percent.
    pub total_usage: f32,
    pub per_core: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub used_percent: f32,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskSnapshot {
    pub name: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_percent: f32,
}

/// Sample the system. Blocks briefly: CPU usage needs two refreshes a
/// minimum interval apart.
pub fn snapshot() -> SystemSnapshot {
    let mut system = System::new_all();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();

    let cpus = system.cpus();
    let per_core: Vec<f32> = cpus.iter().map(|c| c.cpu_usage()).collect();
    let total_usage = if per_core.is_empty() {
        0.0
    } else {
        per_core.iter().sum::<f32>() / per_core.len() as f32
    };

    let total_memory = system.total_memory();
    let used_memory = system.used_memory();
    let used_percent = if total_memory > 0 {
        (used_memory as f32 / total_memory as f32) * 100.0
    } else {
        0.0
    };

    let disks = Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| {
            let total = disk.total_space();
            let available = disk.available_space();
            let used_percent = if total > 0 {
                ((total - available) as f32 / total as f32) * 100.0
            } else {
                0.0
            };
            DiskSnapshot {
                name: disk.name().to_string_lossy().to_string(),
                mount_point: disk.mount_point().display().to_string(),
                total_bytes: total,
                available_bytes: available,
                used_percent,
            }
        })
        .collect();

    SystemSnapshot {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        os_version: System::long_os_version().unwrap_or_else(|| "Unknown".to_string()),
        uptime_seconds: System::uptime(),
        cpu: CpuSnapshot {
            model: cpus
                .first()
                .map(|c| c.brand().to_string())
                .unwrap_or_else(|| "Unknown CPU".to_string()),
            cores: cpus.len(),
            total_usage,
            per_core,
        },
        memory: MemorySnapshot {
            total_bytes: total_memory,
            used_bytes: used_memory,
            used_percent,
            swap_total_bytes: system.total_swap(),
            swap_used_bytes: system.used_swap(),
        },
        disks,
    }
}

/// Threshold violations for the given snapshot, one message each.
pub fn alerts(snapshot: &SystemSnapshot, config: &MonitoringConfig) -> Vec<String> {
    let mut alerts = Vec::new();

    if f64::from(snapshot.cpu.total_usage) > config.cpu_threshold {
        alerts.push(format!(
            "CPU usage {:.1}% exceeds threshold {:.0}%",
            snapshot.cpu.total_usage, config.cpu_threshold
        ));
    }

    if f64::from(snapshot.memory.used_percent) > config.memory_threshold {
        alerts.push(format!(
            "Memory usage {:.1}% exceeds threshold {:.0}%",
            snapshot.memory.used_percent, config.memory_threshold
        ));
    }

    for disk in &snapshot.disks {
        if f64::from(disk.used_percent) > config.disk_threshold {
            alerts.push(format!(
                "Disk {} usage {:.1}% exceeds threshold {:.0}%",
                disk.mount_point, disk.used_percent, config.disk_threshold
            ));
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot() -> SystemSnapshot {
        SystemSnapshot {
            hostname: "host".to_string(),
            os_version: "Test OS".to_string(),
            uptime_seconds: 60,
            cpu: CpuSnapshot {
                model: "Test CPU".to_string(),
                cores: 4,
                total_usage: 50.0,
                per_core: vec![50.0; 4],
            },
            memory: MemorySnapshot {
                total_bytes: 1000,
                used_bytes: 500,
                used_percent: 50.0,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
            },
            disks: vec![DiskSnapshot {
                name: "disk0".to_string(),
                mount_point: "/".to_string(),
                total_bytes: 1000,
                available_bytes: 50,
                used_percent: 95.0,
            }],
        }
    }

    #[test]
    fn test_snapshot_samples_something() {
        let snapshot = snapshot();
        assert!(snapshot.cpu.cores > 0);
        assert!(snapshot.memory.total_bytes > 0);
    }

    #[test]
    fn test_no_alerts_below_thresholds() {
        let mut snapshot = test_snapshot();
        snapshot.disks[0].used_percent = 10.0;
        let config = MonitoringConfig::default();
        assert!(alerts(&snapshot, &config).is_empty());
    }

    #[test]
    fn test_disk_threshold_alert() {
        let snapshot = test_snapshot();
        let config = MonitoringConfig::default();
        let alerts = alerts(&snapshot, &config);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Disk /"));
    }

    #[test]
    fn test_cpu_and_memory_alerts() {
        let mut snapshot = test_snapshot();
        snapshot.cpu.total_usage = 99.0;
        snapshot.memory.used_percent = 95.0;
        snapshot.disks.clear();
        let config = MonitoringConfig::default();
        let alerts = alerts(&snapshot, &config);
        assert_eq!(alerts.len(), 2);
    }
}
