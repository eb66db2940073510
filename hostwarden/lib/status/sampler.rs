use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::{
    executor::{CommandExecutor, SystemCommand},
    HostwardenError, HostwardenResult,
};

use super::{
    CpuStats, DiskStats, HostSnapshot, InterfaceStats, MemoryStats, NetworkStats, ServiceState,
    ServiceStatus,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many services a snapshot lists.
const SERVICE_LIMIT: usize = 10;

const SECTOR_BYTES: f64 = 512.0;

const MEGABYTE: f64 = 1024.0 * 1024.0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Something that can produce a [`HostSnapshot`] on demand.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Takes a fresh snapshot.
    async fn sample(&self) -> HostwardenResult<HostSnapshot>;
}

/// Samples the local host by running read-only probes through a [`CommandExecutor`].
pub struct HostSampler {
    executor: Arc<dyn CommandExecutor>,
    systemctl: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostSampler {
    /// Creates a sampler that lists services with `systemctl`.
    pub fn new(executor: Arc<dyn CommandExecutor>, systemctl: impl Into<String>) -> Self {
        Self {
            executor,
            systemctl: systemctl.into(),
        }
    }

    async fn probe(&self, command: SystemCommand) -> HostwardenResult<String> {
        Ok(self.executor.execute(&command).await?.stdout)
    }

    async fn service_statuses(&self, listing: &str, uptime: f64) -> Vec<ServiceStatus> {
        let units = parse_service_units(listing, SERVICE_LIMIT);
        if units.is_empty() {
            return Vec::new();
        }

        let show = SystemCommand::new(&self.systemctl)
            .args(["show", "--property=Id", "--property=ActiveEnterTimestampMonotonic", "--"])
            .args(units.iter().map(|(unit, _)| unit.as_str()));

        let active_since = match self.probe(show).await {
            Ok(output) => parse_active_since(&output),
            Err(e) => {
                tracing::debug!(error = %e, "could not read service start times");
                HashMap::new()
            }
        };

        units
            .into_iter()
            .map(|(unit, status)| {
                let uptime = active_since
                    .get(&unit)
                    .filter(|&&usec| usec > 0)
                    .map_or(0, |&usec| (uptime - usec as f64 / 1_000_000.0).max(0.0) as u64);

                ServiceStatus {
                    name: unit.trim_end_matches(".service").to_string(),
                    status,
                    uptime,
                }
            })
            .collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl SnapshotSource for HostSampler {
    async fn sample(&self) -> HostwardenResult<HostSnapshot> {
        let (top, nproc, free, df, diskstats, net_dev, addresses, uptime, loadavg, units) = tokio::try_join!(
            self.probe(SystemCommand::new("top").args(["-b", "-n", "1"])),
            self.probe(SystemCommand::new("nproc")),
            self.probe(SystemCommand::new("free").arg("-m")),
            self.probe(SystemCommand::new("df").args(["-BG", "/"])),
            self.probe(SystemCommand::new("cat").arg("/proc/diskstats")),
            self.probe(SystemCommand::new("cat").arg("/proc/net/dev")),
            self.probe(SystemCommand::new("ip").args(["-o", "-4", "addr", "show"])),
            self.probe(SystemCommand::new("cat").arg("/proc/uptime")),
            self.probe(SystemCommand::new("cat").arg("/proc/loadavg")),
            self.probe(SystemCommand::new(&self.systemctl).args([
                "list-units",
                "--type=service",
                "--state=running,failed,exited",
                "--no-legend",
                "--plain",
                "--no-pager",
            ])),
        )?;

        let uptime = parse_uptime(&uptime).ok_or_else(|| malformed("/proc/uptime"))?;
        let (read, write) = parse_diskstats(&diskstats);
        let (disk_total, disk_used) = parse_disk_usage(&df).ok_or_else(|| malformed("df"))?;
        let addresses = parse_ipv4_addresses(&addresses);

        let interfaces = parse_net_dev(&net_dev)
            .into_iter()
            .map(|(name, rx, tx)| InterfaceStats {
                ip_address: addresses.get(&name).cloned(),
                name,
                rx,
                tx,
            })
            .collect();

        Ok(HostSnapshot {
            timestamp: Utc::now(),
            cpu: CpuStats {
                usage: parse_cpu_usage(&top).ok_or_else(|| malformed("top"))?,
                cores: parse_cores(&nproc).ok_or_else(|| malformed("nproc"))?,
                temperature: simulated_temperature(),
            },
            memory: parse_memory(&free).ok_or_else(|| malformed("free"))?,
            disk: DiskStats {
                total: disk_total,
                used: disk_used,
                read,
                write,
            },
            network: NetworkStats { interfaces },
            services: self.service_statuses(&units, uptime).await,
            uptime,
            load: parse_load(&loadavg).ok_or_else(|| malformed("/proc/loadavg"))?,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Parsers
//--------------------------------------------------------------------------------------------------

/// User plus system CPU time from the `Cpu(s)` line of `top -b -n 1`.
fn parse_cpu_usage(top: &str) -> Option<f64> {
    let line = top.lines().find(|line| line.contains("Cpu(s)"))?;
    let (_, fields) = line.split_once(':')?;

    let mut user = None;
    let mut system = None;
    for field in fields.split(',') {
        // Either `3.1 us` or `3.1%us`.
        let Some((value, label)) = field
            .trim()
            .split_once(|c: char| c == '%' || c.is_whitespace())
        else {
            continue;
        };

        match label.trim() {
            "us" => user = value.parse::<f64>().ok(),
            "sy" => system = value.parse::<f64>().ok(),
            _ => {}
        }
    }

    Some(user? + system?)
}

fn parse_cores(nproc: &str) -> Option<u32> {
    nproc.trim().parse().ok()
}

/// The `Mem:` line of `free -m`: total, used and buff/cache.
fn parse_memory(free: &str) -> Option<MemoryStats> {
    let line = free.lines().find(|line| line.starts_with("Mem:"))?;
    let parts: Vec<&str> = line.split_whitespace().collect();

    Some(MemoryStats {
        total: parts.get(1)?.parse().ok()?,
        used: parts.get(2)?.parse().ok()?,
        cache: parts.get(5)?.parse().ok()?,
    })
}

/// Size and used space in GB from the last line of `df -BG /`.
fn parse_disk_usage(df: &str) -> Option<(u64, u64)> {
    let line = df.lines().rev().find(|line| !line.trim().is_empty())?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    let gigabytes = |field: &str| field.trim_end_matches('G').parse::<u64>().ok();

    Some((gigabytes(parts.get(1)?)?, gigabytes(parts.get(2)?)?))
}

/// MB read and written by whole disks since boot, from `/proc/diskstats`.
fn parse_diskstats(diskstats: &str) -> (f64, f64) {
    diskstats
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let name = parts.get(2)?;
            if !is_whole_disk(name) {
                return None;
            }

            let read: f64 = parts.get(5)?.parse().ok()?;
            let written: f64 = parts.get(9)?.parse().ok()?;
            Some((read, written))
        })
        .fold((0.0, 0.0), |(r, w), (read, written)| {
            (
                r + read * SECTOR_BYTES / MEGABYTE,
                w + written * SECTOR_BYTES / MEGABYTE,
            )
        })
}

fn is_whole_disk(name: &str) -> bool {
    const VIRTUAL: [&str; 7] = ["loop", "ram", "zram", "dm-", "sr", "md", "fd"];
    if VIRTUAL.iter().any(|prefix| name.starts_with(prefix)) {
        return false;
    }

    // nvme0n1 and mmcblk0 are disks, nvme0n1p1 and mmcblk0p1 are partitions.
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return !name.contains('p');
    }

    name.chars().last().is_some_and(|c| c.is_ascii_alphabetic())
}

/// `(name, rx MB, tx MB)` per non-loopback interface from `/proc/net/dev`.
fn parse_net_dev(net_dev: &str) -> Vec<(String, f64, f64)> {
    net_dev
        .lines()
        .filter_map(|line| {
            let (name, counters) = line.split_once(':')?;
            let name = name.trim();
            if name == "lo" {
                return None;
            }

            let counters: Vec<&str> = counters.split_whitespace().collect();
            let rx: f64 = counters.first()?.parse().ok()?;
            let tx: f64 = counters.get(8)?.parse().ok()?;
            Some((name.to_string(), rx / MEGABYTE, tx / MEGABYTE))
        })
        .collect()
}

/// First IPv4 address per interface from `ip -o -4 addr show`.
fn parse_ipv4_addresses(ip: &str) -> HashMap<String, String> {
    let mut addresses = HashMap::new();
    for line in ip.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let (Some(name), Some(&"inet"), Some(cidr)) = (parts.get(1), parts.get(2), parts.get(3))
        {
            let address = cidr.split('/').next().unwrap_or(cidr);
            addresses
                .entry(name.to_string())
                .or_insert_with(|| address.to_string());
        }
    }
    addresses
}

fn parse_uptime(uptime: &str) -> Option<f64> {
    uptime.split_whitespace().next()?.parse().ok()
}

fn parse_load(loadavg: &str) -> Option<[f64; 3]> {
    let mut values = loadavg.split_whitespace().map(|v| v.parse::<f64>().ok());
    Some([values.next()??, values.next()??, values.next()??])
}

/// `(unit, state)` for the first `limit` services of `systemctl list-units --plain --no-legend`.
fn parse_service_units(listing: &str, limit: usize) -> Vec<(String, ServiceState)> {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line
                .split_whitespace()
                .skip_while(|part| !part.is_ascii());
            let unit = parts.next()?;
            if !unit.ends_with(".service") {
                return None;
            }

            // load, active, sub
            let sub = parts.nth(2)?;
            Some((unit.to_string(), ServiceState::from_sub_state(sub)))
        })
        .take(limit)
        .collect()
}

/// Unit id to `ActiveEnterTimestampMonotonic` (µs since boot) from `systemctl show`.
fn parse_active_since(show: &str) -> HashMap<String, u64> {
    let mut since = HashMap::new();
    for block in show.split("\n\n") {
        let mut id = None;
        let mut monotonic = None;
        for line in block.lines() {
            match line.split_once('=') {
                Some(("Id", value)) => id = Some(value.to_string()),
                Some(("ActiveEnterTimestampMonotonic", value)) => monotonic = value.parse().ok(),
                _ => {}
            }
        }

        if let (Some(id), Some(monotonic)) = (id, monotonic) {
            since.insert(id, monotonic);
        }
    }
    since
}

fn simulated_temperature() -> f64 {
    45.0 + f64::from(rand::thread_rng().gen_range(0..10u8))
}

fn malformed(probe: &str) -> HostwardenError {
    HostwardenError::custom(anyhow::anyhow!("unexpected output from {probe}"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
