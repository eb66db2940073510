use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A point-in-time view of the host, produced fresh on every tick and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// Processor usage.
    pub cpu: CpuStats,

    /// Memory usage in MB.
    pub memory: MemoryStats,

    /// Root filesystem usage and disk I/O.
    pub disk: DiskStats,

    /// Network interfaces.
    pub network: NetworkStats,

    /// Notable systemd services.
    pub services: Vec<ServiceStatus>,

    /// Seconds since boot.
    pub uptime: f64,

    /// 1, 5 and 15 minute load averages.
    pub load: [f64; 3],
}

/// Processor usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    /// User plus system time, in percent.
    pub usage: f64,

    /// Number of online processors.
    pub cores: u32,

    /// Simulated package temperature in °C.
    pub temperature: f64,
}

/// Memory usage in MB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Installed memory.
    pub total: u64,

    /// Memory in use.
    pub used: u64,

    /// Buffers and page cache.
    pub cache: u64,
}

/// Root filesystem usage in GB and disk I/O in MB since boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    /// Size of the root filesystem.
    pub total: u64,

    /// Space used on the root filesystem.
    pub used: u64,

    /// Data read from whole disks.
    pub read: f64,

    /// Data written to whole disks.
    pub write: f64,
}

/// Network interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    /// Every non-loopback interface.
    pub interfaces: Vec<InterfaceStats>,
}

/// Traffic of one interface in MB since boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStats {
    /// Interface name.
    pub name: String,

    /// First IPv4 address, if any.
    pub ip_address: Option<String>,

    /// Received.
    pub rx: f64,

    /// Transmitted.
    pub tx: f64,
}

/// One systemd service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Unit name without the `.service` suffix.
    pub name: String,

    /// Coarse state.
    pub status: ServiceState,

    /// Seconds since the unit last became active, 0 if unknown.
    pub uptime: u64,
}

/// Coarse service state shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Active and running.
    Running,

    /// Exited, failed or dead.
    Stopped,

    /// Starting, reloading or waiting to restart.
    Restarting,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServiceState {
    /// Maps a systemd sub-state to a coarse state.
    pub fn from_sub_state(sub: &str) -> Self {
        match sub {
            "running" => ServiceState::Running,
            "auto-restart" | "start" | "start-pre" | "start-post" | "reload" | "activating" => {
                ServiceState::Restarting
            }
            _ => ServiceState::Stopped,
        }
    }
}
