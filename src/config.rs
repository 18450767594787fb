use std::{collections::HashSet, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// Engine configuration: hardware thresholds, monitor cadence, and the admin override list.
/// Loaded from a YAML file via `serde_yaml`, the same way this codebase loads its own
/// `ConfigFile` (see `src/config.rs` in the upstream tree).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    #[serde(default)]
    pub hardware: HardwareThresholds,

    /// How often the monitor sweeps hosts and clusters for a `Refresh`.
    #[serde(default = "default_monitor_period_secs")]
    pub monitor_period_secs: u64,

    /// A host with no heartbeat for longer than this is considered disconnected.
    #[serde(default = "default_connection_staleness_secs")]
    pub connection_staleness_secs: u64,

    /// User identities that bypass the `owner = <username>` filter on cross-entity listings.
    /// Enforcement of the filter itself is out of scope for the engine; this is exposed purely
    /// so a caller can ask `is_admin`.
    #[serde(default)]
    pub admins: HashSet<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            hardware: HardwareThresholds::default(),
            monitor_period_secs: default_monitor_period_secs(),
            connection_staleness_secs: default_connection_staleness_secs(),
            admins: HashSet::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn monitor_period(&self) -> Duration {
        Duration::from_secs(self.monitor_period_secs)
    }

    pub fn connection_staleness(&self) -> Duration {
        Duration::from_secs(self.connection_staleness_secs)
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.contains(user)
    }
}

fn default_monitor_period_secs() -> u64 {
    60
}

fn default_connection_staleness_secs() -> u64 {
    180
}

/// Minimum hardware a host must report before it can be considered `known`. Mirrors
/// `hwValidatorCfg` in the original system: a role-agnostic floor plus per-role floors used once
/// a role has been assigned.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct HardwareThresholds {
    #[serde(default = "default_min_ram_gib")]
    pub min_ram_gib: u64,
    #[serde(default = "default_min_ram_gib_master")]
    pub min_ram_gib_master: u64,
    #[serde(default = "default_min_ram_gib_worker")]
    pub min_ram_gib_worker: u64,

    #[serde(default = "default_min_cpu_cores")]
    pub min_cpu_cores: u32,
    #[serde(default = "default_min_cpu_cores_master")]
    pub min_cpu_cores_master: u32,
    #[serde(default = "default_min_cpu_cores_worker")]
    pub min_cpu_cores_worker: u32,

    #[serde(default = "default_min_disk_size_gib")]
    pub min_disk_size_gib: u64,
}

impl Default for HardwareThresholds {
    fn default() -> Self {
        HardwareThresholds {
            min_ram_gib: default_min_ram_gib(),
            min_ram_gib_master: default_min_ram_gib_master(),
            min_ram_gib_worker: default_min_ram_gib_worker(),
            min_cpu_cores: default_min_cpu_cores(),
            min_cpu_cores_master: default_min_cpu_cores_master(),
            min_cpu_cores_worker: default_min_cpu_cores_worker(),
            min_disk_size_gib: default_min_disk_size_gib(),
        }
    }
}

impl HardwareThresholds {
    pub fn min_ram_gib_bytes(&self) -> u64 {
        gib_to_bytes(self.min_ram_gib)
    }

    pub fn min_disk_size_bytes(&self) -> u64 {
        gib_to_bytes(self.min_disk_size_gib)
    }
}

/// Base-2 GiB to bytes, matching `gibToBytes` in the original system.
pub fn gib_to_bytes(gib: u64) -> u64 {
    gib * 1024 * 1024 * 1024
}

fn default_min_ram_gib() -> u64 {
    4
}
fn default_min_ram_gib_master() -> u64 {
    16
}
fn default_min_ram_gib_worker() -> u64 {
    8
}
fn default_min_cpu_cores() -> u32 {
    2
}
fn default_min_cpu_cores_master() -> u32 {
    4
}
fn default_min_cpu_cores_worker() -> u32 {
    2
}
fn default_min_disk_size_gib() -> u64 {
    20
}
