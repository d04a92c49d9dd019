//! Host introspection — OS, logical CPUs and memory, compared against cluster requirements

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Operating system family of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => HostOs::Linux,
            "macos" => HostOs::MacOs,
            "windows" => HostOs::Windows,
            _ => HostOs::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostOs::Linux => "Linux",
            HostOs::MacOs => "macOS",
            HostOs::Windows => "Windows",
            HostOs::Other => "Unknown",
        }
    }
}

/// Snapshot of the host facts system checks are derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: HostOs,
    pub os_version: String,
    pub cpu_count: usize,
    pub cpu_model: String,
    pub memory_total_bytes: u64,
}

impl HostInfo {
    pub fn memory_total_gb(&self) -> f64 {
        self.memory_total_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Host introspection that keeps sysinfo state between polls
pub struct SystemMonitor {
    sys: System,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self { sys: System::new_all() }
    }

    /// Collect current host facts
    pub fn collect(&mut self) -> HostInfo {
        self.sys.refresh_memory();

        let cpu_model = self.sys.cpus().first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        HostInfo {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os: HostOs::current(),
            os_version: System::long_os_version().unwrap_or_else(|| HostOs::current().name().to_string()),
            cpu_count: self.sys.cpus().len(),
            cpu_model,
            memory_total_bytes: self.sys.total_memory(),
        }
    }
}
